//! Boot descriptor passed from the menu to the second-stage loader.
//!
//! The menu writes the descriptor into internal RAM at
//! [`BootDescriptor::ADDRESS`] right before handing over; the stub reads it
//! back from the same place. Both sides go through [`BootDescriptor::encode`]
//! and [`BootDescriptor::decode`], so the byte layout below is the whole
//! contract between them.
//!
//! # Layout (packed, little-endian)
//!
//! | Offset | Size | Field                 |
//! |--------|------|-----------------------|
//! | 0      | 1    | fs_type               |
//! | 1      | 4    | cluster_table_base    |
//! | 5      | 4    | data_base             |
//! | 9      | 2    | cluster_size          |
//! | 11     | 4    | fat_entry_count       |
//! | 15     | 4    | prog.cluster          |
//! | 19     | 4    | prog.size             |
//! | 23     | 2    | rom_banks             |
//! | 25     | 1    | prog_sram_mask        |
//! | 26     | 1    | prog_pow_cnt          |
//! | 27     | 1    | prog_emu_cnt          |
//! | 28     | 1    | prog_flags            |
//! | 29     | 1    | prog_flags2           |
//! | 30     | 1    | prog_patches          |
//! | 31     | 2    | start_pointer.offset  |
//! | 33     | 2    | start_pointer.segment |

use bitflags::bitflags;

use crate::regs::{PowCnt, MAX_ROM_BANKS, MAX_SRAM_MASK};
use crate::{Error, FarPtr, FsType, Result, VolumeGeometry};

/// `prog.cluster` value meaning the image is already resident in PSRAM.
pub const CLUSTER_AT_PSRAM: u32 = 0xFFFF_FFFF;

/// Cold-boot entry point of a cartridge.
pub const COLD_BOOT_VECTOR: FarPtr = FarPtr::new(0xFFFF, 0x0000);

const OFF_FS_TYPE: usize = 0;
const OFF_TABLE_BASE: usize = 1;
const OFF_DATA_BASE: usize = 5;
const OFF_CLUSTER_SIZE: usize = 9;
const OFF_ENTRY_COUNT: usize = 11;
const OFF_PROG_CLUSTER: usize = 15;
const OFF_PROG_SIZE: usize = 19;
const OFF_ROM_BANKS: usize = 23;
const OFF_SRAM_MASK: usize = 25;
const OFF_POW_CNT: usize = 26;
const OFF_EMU_CNT: usize = 27;
const OFF_FLAGS: usize = 28;
const OFF_FLAGS2: usize = 29;
const OFF_PATCHES: usize = 30;
/// Offset of `start_pointer` inside the encoded descriptor.
pub const OFF_START_POINTER: usize = 31;

bitflags! {
    /// Program flags; the low bits mirror the image footer's flag byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct ProgFlags: u8 {
        /// Display is mounted vertically
        const VERTICAL = 0x01;
        /// 16-bit cartridge ROM bus
        const BUS_16BIT = 0x04;
        /// Extra ROM wait state
        const ROM_WAIT = 0x08;
    }
}

bitflags! {
    /// Secondary program flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct ProgFlags2: u8 {
        /// Image asks for color mode; keep it enabled across the jump
        const COLOR = 0x01;
    }
}

bitflags! {
    /// Runtime patches the stub applies after loading.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct Patches: u8 {
        /// Route the reset vector through the soft-reset shim
        const FREYA_SOFT_RESET = 0x01;
    }
}

/// Image to boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProgramInfo {
    /// First cluster, or [`CLUSTER_AT_PSRAM`].
    pub cluster: u32,
    /// Size in bytes.
    pub size: u32,
}

/// Boot descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BootDescriptor {
    pub geometry: VolumeGeometry,
    pub prog: ProgramInfo,
    /// ROM bank count the cartridge mapper exposes.
    pub rom_banks: u16,
    pub sram_mask: u8,
    pub pow_cnt: PowCnt,
    pub emu_cnt: u8,
    pub flags: ProgFlags,
    pub flags2: ProgFlags2,
    pub patches: Patches,
    pub start_pointer: FarPtr,
}

impl BootDescriptor {
    /// Internal RAM address of the descriptor.
    pub const ADDRESS: u16 = 0x0060;

    /// Encoded size in bytes.
    pub const SIZE: usize = 35;

    /// Whether the stub can skip streaming.
    pub fn is_resident(&self) -> bool {
        self.prog.cluster == CLUSTER_AT_PSRAM
    }

    /// Check the fields the stub turns into register values.
    pub fn validate(&self) -> Result<()> {
        if self.rom_banks == 0 || self.rom_banks > MAX_ROM_BANKS {
            return Err(Error::FileTooLarge);
        }
        if self.sram_mask > MAX_SRAM_MASK {
            return Err(Error::FormatInvalid);
        }
        if self.prog.size == 0 {
            return Err(Error::FormatInvalid);
        }
        if !self.is_resident() && !self.geometry.is_valid_cluster(self.prog.cluster) {
            return Err(Error::InvalidCluster(self.prog.cluster));
        }
        Ok(())
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        let g = &self.geometry;

        bytes[OFF_FS_TYPE] = g.fs_type() as u8;
        bytes[OFF_TABLE_BASE..OFF_TABLE_BASE + 4].copy_from_slice(&g.cluster_table_base().to_le_bytes());
        bytes[OFF_DATA_BASE..OFF_DATA_BASE + 4].copy_from_slice(&g.data_base().to_le_bytes());
        bytes[OFF_CLUSTER_SIZE..OFF_CLUSTER_SIZE + 2].copy_from_slice(&g.cluster_size().to_le_bytes());
        bytes[OFF_ENTRY_COUNT..OFF_ENTRY_COUNT + 4].copy_from_slice(&g.fat_entry_count().to_le_bytes());
        bytes[OFF_PROG_CLUSTER..OFF_PROG_CLUSTER + 4].copy_from_slice(&self.prog.cluster.to_le_bytes());
        bytes[OFF_PROG_SIZE..OFF_PROG_SIZE + 4].copy_from_slice(&self.prog.size.to_le_bytes());
        bytes[OFF_ROM_BANKS..OFF_ROM_BANKS + 2].copy_from_slice(&self.rom_banks.to_le_bytes());
        bytes[OFF_SRAM_MASK] = self.sram_mask;
        bytes[OFF_POW_CNT] = self.pow_cnt.bits();
        bytes[OFF_EMU_CNT] = self.emu_cnt;
        bytes[OFF_FLAGS] = self.flags.bits();
        bytes[OFF_FLAGS2] = self.flags2.bits();
        bytes[OFF_PATCHES] = self.patches.bits();
        bytes[OFF_START_POINTER..OFF_START_POINTER + 4].copy_from_slice(&self.start_pointer.to_bytes());

        bytes
    }

    /// Parse an encoded descriptor.
    ///
    /// Unknown flag bits are kept so a descriptor survives a round trip
    /// bit for bit.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(Error::FormatInvalid);
        }
        let u16_at = |off: usize| u16::from_le_bytes([bytes[off], bytes[off + 1]]);
        let u32_at = |off: usize| u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]]);

        let fs_type = FsType::from_u8(bytes[OFF_FS_TYPE]).ok_or(Error::InvalidGeometry)?;
        let geometry = VolumeGeometry::new(
            fs_type,
            u32_at(OFF_TABLE_BASE),
            u32_at(OFF_DATA_BASE),
            u16_at(OFF_CLUSTER_SIZE),
            u32_at(OFF_ENTRY_COUNT),
        )?;

        Ok(Self {
            geometry,
            prog: ProgramInfo {
                cluster: u32_at(OFF_PROG_CLUSTER),
                size: u32_at(OFF_PROG_SIZE),
            },
            rom_banks: u16_at(OFF_ROM_BANKS),
            sram_mask: bytes[OFF_SRAM_MASK],
            pow_cnt: PowCnt::from_bits_retain(bytes[OFF_POW_CNT]),
            emu_cnt: bytes[OFF_EMU_CNT],
            flags: ProgFlags::from_bits_retain(bytes[OFF_FLAGS]),
            flags2: ProgFlags2::from_bits_retain(bytes[OFF_FLAGS2]),
            patches: Patches::from_bits_retain(bytes[OFF_PATCHES]),
            start_pointer: FarPtr::from_bytes([
                bytes[OFF_START_POINTER],
                bytes[OFF_START_POINTER + 1],
                bytes[OFF_START_POINTER + 2],
                bytes[OFF_START_POINTER + 3],
            ]),
        })
    }
}
