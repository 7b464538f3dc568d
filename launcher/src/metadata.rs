//! Cartridge image metadata.
//!
//! Every image ends with a 16-byte footer that the console's boot ROM jumps
//! through. The footer also describes the save memory and mapper the game
//! expects; the launcher turns that into cartridge register values.
//!
//! # Footer layout
//!
//! ```text
//! Offset  Size  Field
//! 0x00    5     Far jump (0xEA, offset, segment)
//! 0x05    1     Maintenance
//! 0x06    1     Publisher ID
//! 0x07    1     Color (bit 0 set for color titles)
//! 0x08    1     Game ID
//! 0x09    1     Game version
//! 0x0A    1     ROM size code
//! 0x0B    1     Save type (low nibble SRAM, high nibble EEPROM)
//! 0x0C    1     Flags (orientation, bus width, ROM speed)
//! 0x0D    1     Mapper (0 = 2001, 1 = 2003)
//! 0x0E    2     Checksum
//! ```

use log::{debug, warn};

use bootcore::boot_info::{Patches, ProgFlags, ProgFlags2};
use bootcore::regs::{PowCnt, EMU_EEPROM_128B, EMU_EEPROM_1KB, EMU_EEPROM_2KB, EMU_EEPROM_NONE};
use bootcore::{Error, FarPtr, ReadStream, Result, Seek};

/// Footer size in bytes.
pub const FOOTER_SIZE: usize = 16;

/// Smallest image that can hold a footer.
pub const MIN_IMAGE_SIZE: u32 = FOOTER_SIZE as u32;

const JUMP_OPCODE: u8 = 0xEA;

/// WonderWitch images carry their system font at a fixed offset.
const ELISA_IMAGE_SIZE: u32 = 0x8_0000;
const ELISA_OFFSET: u32 = 0x7_0000;
const ELISA_SIGNATURE: &[u8; 5] = b"ELISA";
const WONDERWITCH_SAVE_TYPE: u8 = 0x04;
const WONDERWITCH_FLASH_SIZE: u32 = 0x8_0000;

/// SRAM size in KiB, by the save type's low nibble.
const SRAM_SIZES_KB: [u16; 16] = [0, 32, 32, 128, 256, 512, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];

/// EEPROM size in bytes, by the save type's high nibble.
const EEPROM_SIZES: [u16; 16] = [0, 128, 2048, 0, 0, 1024, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];

/// EMU_CNT value, by the save type's high nibble.
const EEPROM_EMU: [u8; 6] = [
    EMU_EEPROM_NONE,
    EMU_EEPROM_128B,
    EMU_EEPROM_2KB,
    EMU_EEPROM_NONE,
    EMU_EEPROM_NONE,
    EMU_EEPROM_1KB,
];

/// Athena/Freya OS images: fixed 16 banks, 256 KiB SRAM, 1 MiB resident.
const FREYA_ROM_BANKS: u16 = 16;
const FREYA_SRAM_SIZE: u32 = 256 * 1024;
const FREYA_IMAGE_SIZE: u32 = 0x10_0000;

// =============================================================================
// Footer
// =============================================================================

/// Parsed image footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RomFooter {
    pub jump: [u8; 5],
    pub maintenance: u8,
    pub publisher_id: u8,
    pub color: u8,
    pub game_id: u8,
    pub game_version: u8,
    pub rom_size: u8,
    pub save_type: u8,
    pub flags: u8,
    pub mapper: u8,
    pub checksum: u16,
}

impl RomFooter {
    pub fn from_bytes(bytes: &[u8; FOOTER_SIZE]) -> Self {
        Self {
            jump: [bytes[0], bytes[1], bytes[2], bytes[3], bytes[4]],
            maintenance: bytes[5],
            publisher_id: bytes[6],
            color: bytes[7],
            game_id: bytes[8],
            game_version: bytes[9],
            rom_size: bytes[10],
            save_type: bytes[11],
            flags: bytes[12],
            mapper: bytes[13],
            checksum: u16::from_le_bytes([bytes[14], bytes[15]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; FOOTER_SIZE] {
        let mut bytes = [0u8; FOOTER_SIZE];
        bytes[..5].copy_from_slice(&self.jump);
        bytes[5] = self.maintenance;
        bytes[6] = self.publisher_id;
        bytes[7] = self.color;
        bytes[8] = self.game_id;
        bytes[9] = self.game_version;
        bytes[10] = self.rom_size;
        bytes[11] = self.save_type;
        bytes[12] = self.flags;
        bytes[13] = self.mapper;
        bytes[14..].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Target of the footer's far jump.
    pub fn jump_target(&self) -> FarPtr {
        FarPtr::new(
            u16::from_le_bytes([self.jump[3], self.jump[4]]),
            u16::from_le_bytes([self.jump[1], self.jump[2]]),
        )
    }

    /// Whether the boot ROM would accept this footer.
    pub fn is_bootable(&self) -> bool {
        self.jump[0] == JUMP_OPCODE && self.maintenance & 0x0F == 0
    }

    pub fn validate(&self) -> Result<()> {
        if !self.is_bootable() {
            warn!(
                "footer: jump opcode {:#04x}, maintenance {:#04x}",
                self.jump[0], self.maintenance
            );
            return Err(Error::FormatInvalid);
        }
        Ok(())
    }

    pub fn is_color(&self) -> bool {
        self.color & 1 != 0
    }
}

// =============================================================================
// Metadata
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RomKind {
    /// Plain cartridge image streamed from storage.
    #[default]
    Standard,
    /// Athena/Freya OS image assembled in PSRAM by the menu.
    Freya,
}

/// Everything the launcher needs to know about an image before booting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RomMetadata {
    pub footer: RomFooter,
    /// Save identity; the image's first cluster.
    pub id: u32,
    pub size: u32,
    pub sram_size: u32,
    pub eeprom_size: u16,
    /// Non-zero for WonderWitch images, whose flash doubles as save memory.
    pub flash_size: u32,
    pub kind: RomKind,
    /// Bank count to expose instead of the one implied by `size`.
    pub rom_banks: Option<u16>,
}

impl RomMetadata {
    /// Read the metadata of the `size`-byte image behind `stream`.
    pub fn read<S: ReadStream + Seek + ?Sized>(stream: &mut S, id: u32, size: u32) -> Result<Self> {
        if size < MIN_IMAGE_SIZE {
            return Err(Error::FormatInvalid);
        }

        let mut elisa = false;
        if size == ELISA_IMAGE_SIZE {
            let mut signature = [0u8; 5];
            stream.seek(ELISA_OFFSET)?;
            stream.read(&mut signature)?;
            elisa = &signature == ELISA_SIGNATURE;
        }

        let mut bytes = [0u8; FOOTER_SIZE];
        stream.seek(size - MIN_IMAGE_SIZE)?;
        stream.read(&mut bytes)?;

        let meta = Self::from_footer(RomFooter::from_bytes(&bytes), id, size, elisa);
        debug!(
            "metadata: id {} size {:#x} sram {:#x} eeprom {:#x} flash {:#x}",
            meta.id, meta.size, meta.sram_size, meta.eeprom_size, meta.flash_size
        );
        Ok(meta)
    }

    /// Derive save memory sizes from a footer.
    ///
    /// `elisa` tells whether the WonderWitch font signature was found.
    pub fn from_footer(footer: RomFooter, id: u32, size: u32, elisa: bool) -> Self {
        let sram_size = SRAM_SIZES_KB[(footer.save_type & 0x0F) as usize] as u32 * 1024;
        let eeprom_size = EEPROM_SIZES[(footer.save_type >> 4) as usize];
        let wonderwitch = elisa
            && footer.publisher_id == 0x00
            && footer.game_id == 0x00
            && footer.save_type == WONDERWITCH_SAVE_TYPE
            && footer.mapper == 0x01;

        Self {
            footer,
            id,
            size,
            sram_size,
            eeprom_size,
            flash_size: if wonderwitch { WONDERWITCH_FLASH_SIZE } else { 0 },
            kind: RomKind::Standard,
            rom_banks: None,
        }
    }

    /// Metadata of an Athena/Freya OS image already assembled in PSRAM.
    pub fn freya(footer: RomFooter) -> Self {
        Self {
            footer,
            id: 0,
            size: FREYA_IMAGE_SIZE,
            sram_size: FREYA_SRAM_SIZE,
            eeprom_size: 0,
            flash_size: 0,
            kind: RomKind::Freya,
            rom_banks: Some(FREYA_ROM_BANKS),
        }
    }

    pub fn has_save_data(&self) -> bool {
        self.sram_size != 0 || self.eeprom_size != 0 || self.flash_size != 0
    }

    /// SRAM bank mask for SEG_MASK.
    pub fn sram_mask(&self) -> u8 {
        (self.sram_size.saturating_sub(1) >> 16) as u8
    }

    /// EMU_CNT value selecting the EEPROM size to emulate.
    pub fn emu_cnt(&self) -> u8 {
        if self.eeprom_size == 0 {
            return EMU_EEPROM_NONE;
        }
        EEPROM_EMU
            .get((self.footer.save_type >> 4) as usize)
            .copied()
            .unwrap_or(EMU_EEPROM_NONE)
    }

    /// Cartridge blocks to power for this image.
    pub fn pow_cnt(&self) -> PowCnt {
        let mut pow = PowCnt::empty();
        if self.sram_size != 0 {
            pow |= PowCnt::SRAM;
        }
        if self.footer.mapper != 1 && self.eeprom_size != 0 {
            pow |= PowCnt::IO_2001;
        }
        if self.footer.mapper != 0 {
            pow |= PowCnt::IO_2003;
        }
        pow
    }

    /// Program flags. Only the 16-bit ROM bus is supported.
    pub fn prog_flags(&self) -> ProgFlags {
        ProgFlags::from_bits_retain(self.footer.flags) | ProgFlags::BUS_16BIT
    }

    pub fn prog_flags2(&self) -> ProgFlags2 {
        if self.footer.is_color() {
            ProgFlags2::COLOR
        } else {
            ProgFlags2::empty()
        }
    }

    pub fn patches(&self) -> Patches {
        match self.kind {
            RomKind::Standard => Patches::empty(),
            RomKind::Freya => Patches::FREYA_SOFT_RESET,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bootcore::mock::SliceStream;

    fn footer(save_type: u8, mapper: u8) -> RomFooter {
        RomFooter {
            jump: [0xEA, 0x00, 0x00, 0x00, 0x40],
            save_type,
            mapper,
            ..RomFooter::default()
        }
    }

    fn image(size: usize, footer: &RomFooter) -> Vec<u8> {
        let mut data = vec![0u8; size];
        data[size - FOOTER_SIZE..].copy_from_slice(&footer.to_bytes());
        data
    }

    #[test]
    fn test_footer_fields() {
        let bytes = [0xEA, 0x10, 0x00, 0x00, 0x40, 0x00, 0x01, 0x01, 0x23, 0x02, 0x06, 0x10, 0x05, 0x01, 0x34, 0x12];
        let footer = RomFooter::from_bytes(&bytes);
        assert_eq!(footer.jump_target(), FarPtr::new(0x4000, 0x0010));
        assert_eq!(footer.save_type, 0x10);
        assert_eq!(footer.mapper, 1);
        assert_eq!(footer.checksum, 0x1234);
        assert!(footer.is_color());
        assert!(footer.is_bootable());
        assert_eq!(footer.to_bytes(), bytes);
    }

    #[test]
    fn test_footer_validation() {
        let mut footer = footer(0, 0);
        assert_eq!(footer.validate(), Ok(()));
        footer.maintenance = 0x01;
        assert_eq!(footer.validate(), Err(Error::FormatInvalid));
        footer.maintenance = 0x80;
        assert_eq!(footer.validate(), Ok(()));
        footer.jump[0] = 0xE9;
        assert_eq!(footer.validate(), Err(Error::FormatInvalid));
    }

    #[test]
    fn test_read_sram_image() {
        let data = image(0x20000, &footer(0x03, 1));
        let meta = RomMetadata::read(&mut SliceStream::new(&data), 42, data.len() as u32).unwrap();
        assert_eq!(meta.id, 42);
        assert_eq!(meta.sram_size, 128 * 1024);
        assert_eq!(meta.eeprom_size, 0);
        assert_eq!(meta.flash_size, 0);
        assert_eq!(meta.sram_mask(), 1);
        assert_eq!(meta.pow_cnt(), PowCnt::SRAM | PowCnt::IO_2003);
        assert_eq!(meta.emu_cnt(), EMU_EEPROM_NONE);
    }

    #[test]
    fn test_eeprom_on_2001_mapper() {
        let meta = RomMetadata::from_footer(footer(0x20, 0), 2, 0x10000, false);
        assert_eq!(meta.eeprom_size, 2048);
        assert_eq!(meta.sram_size, 0);
        assert_eq!(meta.sram_mask(), 0);
        assert_eq!(meta.emu_cnt(), EMU_EEPROM_2KB);
        assert_eq!(meta.pow_cnt(), PowCnt::IO_2001);
    }

    #[test]
    fn test_eeprom_on_2003_mapper() {
        let meta = RomMetadata::from_footer(footer(0x50, 1), 2, 0x10000, false);
        assert_eq!(meta.eeprom_size, 1024);
        assert_eq!(meta.emu_cnt(), EMU_EEPROM_1KB);
        assert_eq!(meta.pow_cnt(), PowCnt::IO_2003);
    }

    #[test]
    fn test_wonderwitch_detection() {
        let mut data = image(ELISA_IMAGE_SIZE as usize, &footer(0x04, 1));
        data[ELISA_OFFSET as usize..ELISA_OFFSET as usize + 5].copy_from_slice(ELISA_SIGNATURE);
        let meta = RomMetadata::read(&mut SliceStream::new(&data), 7, ELISA_IMAGE_SIZE).unwrap();
        assert_eq!(meta.flash_size, WONDERWITCH_FLASH_SIZE);
        assert_eq!(meta.sram_size, 256 * 1024);
        assert!(meta.has_save_data());

        // Same footer without the font is an ordinary SRAM game
        let data = image(ELISA_IMAGE_SIZE as usize, &footer(0x04, 1));
        let meta = RomMetadata::read(&mut SliceStream::new(&data), 7, ELISA_IMAGE_SIZE).unwrap();
        assert_eq!(meta.flash_size, 0);
    }

    #[test]
    fn test_flags_and_patches() {
        let mut f = footer(0, 0);
        f.flags = 0x01;
        f.color = 0x01;
        let meta = RomMetadata::from_footer(f, 2, 0x10000, false);
        assert_eq!(meta.prog_flags(), ProgFlags::VERTICAL | ProgFlags::BUS_16BIT);
        assert_eq!(meta.prog_flags2(), ProgFlags2::COLOR);
        assert_eq!(meta.patches(), Patches::empty());

        let freya = RomMetadata::freya(f);
        assert_eq!(freya.patches(), Patches::FREYA_SOFT_RESET);
        assert_eq!(freya.rom_banks, Some(16));
        assert_eq!(freya.sram_mask(), 3);
    }

    #[test]
    fn test_tiny_image_rejected() {
        let data = [0u8; 8];
        assert_eq!(
            RomMetadata::read(&mut SliceStream::new(&data), 2, 8),
            Err(Error::FormatInvalid)
        );
    }
}
