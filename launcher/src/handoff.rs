//! Boot handoff controller.
//!
//! Launching an image is a one-way trip through four states:
//!
//! ```text
//! Idle -> MetadataValidated -> DescriptorPopulated -> Staged -> (jump)
//! ```
//!
//! Each transition consumes the previous state. The first two are fallible
//! and leave the running menu intact on error; staging overwrites low
//! memory with interrupts off, so nothing after it may fail. The final jump
//! is typed `-> !`.

use log::{debug, info, warn};

use bootcore::boot_info::{BootDescriptor, Patches, ProgFlags, ProgFlags2, ProgramInfo, CLUSTER_AT_PSRAM, COLD_BOOT_VECTOR};
use bootcore::regs::{PowCnt, EMU_EEPROM_NONE, IO_DISPLAY_CTRL, IO_NILE_POW_CNT, MAX_ROM_BANKS};
use bootcore::{Error, FarPtr, ImageLayout, Ports, Result, VolumeGeometry};

use crate::metadata::{RomMetadata, MIN_IMAGE_SIZE};

/// Internal RAM address the second stage runs from.
pub const STUB_ADDRESS: u16 = 0x00C0;

/// Internal RAM address of the second stage's tile graphics.
pub const TILES_ADDRESS: u16 = 0x3200;

/// SRAM mask used when nothing is known about the image.
const DEFAULT_SRAM_MASK: u8 = 7;

const IRAM_SIZE: u32 = 0x1_0000;

// =============================================================================
// Platform
// =============================================================================

/// What the handoff needs from the running system.
pub trait Platform: Ports {
    /// Copy `bytes` into internal RAM at `address`.
    fn write_iram(&mut self, address: u16, bytes: &[u8]);

    /// Mask interrupts for good.
    fn disable_interrupts(&mut self);

    /// Blank all display layers.
    fn disable_display(&mut self) {
        self.outw(IO_DISPLAY_CTRL, 0);
    }

    /// Transfer control to `target`.
    fn far_jump(&mut self, target: FarPtr) -> !;
}

// =============================================================================
// Inputs
// =============================================================================

/// Launch limits and staging addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LaunchConfig {
    /// Largest image accepted, in bytes.
    pub max_image_size: u32,
    pub stub_address: u16,
    pub tiles_address: u16,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            max_image_size: 16 * 1024 * 1024,
            stub_address: STUB_ADDRESS,
            tiles_address: TILES_ADDRESS,
        }
    }
}

/// Second-stage payload bundled with the menu.
#[derive(Debug, Clone, Copy)]
pub struct StubImage<'a> {
    pub code: &'a [u8],
    pub tiles: &'a [u8],
}

impl<'a> StubImage<'a> {
    pub const fn new(code: &'a [u8], tiles: &'a [u8]) -> Self {
        Self { code, tiles }
    }

    /// Check that code and tiles fit their internal RAM slots without
    /// overlapping.
    pub fn check(&self, config: &LaunchConfig) -> Result<()> {
        let code_end = config.stub_address as u32 + self.code.len() as u32;
        let tiles_end = config.tiles_address as u32 + self.tiles.len() as u32;
        let code_fits = config.tiles_address < config.stub_address || code_end <= config.tiles_address as u32;
        if !code_fits || code_end > IRAM_SIZE || tiles_end > IRAM_SIZE {
            return Err(Error::FileTooLarge);
        }
        Ok(())
    }
}

/// The image to launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RomImage {
    /// First cluster, or [`CLUSTER_AT_PSRAM`].
    pub cluster: u32,
    pub size: u32,
    pub metadata: Option<RomMetadata>,
}

impl RomImage {
    /// Image streamed from storage by the second stage.
    pub fn on_volume(cluster: u32, size: u32, metadata: Option<RomMetadata>) -> Self {
        Self { cluster, size, metadata }
    }

    /// Image the menu already placed in PSRAM.
    pub fn resident(metadata: RomMetadata) -> Self {
        Self {
            cluster: CLUSTER_AT_PSRAM,
            size: metadata.size,
            metadata: Some(metadata),
        }
    }
}

// =============================================================================
// States
// =============================================================================

pub struct Idle;

pub struct MetadataValidated {
    image: RomImage,
    layout: ImageLayout,
    config: LaunchConfig,
}

pub struct DescriptorPopulated {
    descriptor: BootDescriptor,
    config: LaunchConfig,
}

pub struct Staged {
    descriptor: BootDescriptor,
    config: LaunchConfig,
}

/// Launch state machine.
pub struct Handoff<S> {
    state: S,
}

impl Handoff<Idle> {
    pub fn new() -> Self {
        Self { state: Idle }
    }

    /// Check the image against the footer rules and the launch limits.
    ///
    /// Touches no hardware.
    pub fn validate(self, image: &RomImage, config: LaunchConfig) -> Result<Handoff<MetadataValidated>> {
        if image.size < MIN_IMAGE_SIZE {
            warn!("handoff: image of {} bytes has no footer", image.size);
            return Err(Error::FormatInvalid);
        }
        if image.size > config.max_image_size {
            warn!("handoff: image of {:#x} bytes exceeds {:#x}", image.size, config.max_image_size);
            return Err(Error::FileTooLarge);
        }
        if image.cluster != CLUSTER_AT_PSRAM && image.cluster < 2 {
            return Err(Error::InvalidCluster(image.cluster));
        }

        let layout = ImageLayout::for_size(image.size)?;
        if layout.total_banks() > MAX_ROM_BANKS {
            return Err(Error::FileTooLarge);
        }

        if let Some(meta) = &image.metadata {
            meta.footer.validate()?;
            if meta.size != image.size {
                warn!("handoff: metadata size {:#x} != image size {:#x}", meta.size, image.size);
                return Err(Error::FormatInvalid);
            }
            if let Some(banks) = meta.rom_banks {
                if banks < layout.total_banks() || banks > MAX_ROM_BANKS {
                    return Err(Error::FileTooLarge);
                }
            }
        }

        debug!(
            "handoff: validated {:#x} bytes at {:#06x}:{:04x}, {} banks",
            image.size,
            layout.start().bank,
            layout.start().offset,
            layout.total_banks()
        );
        Ok(Handoff {
            state: MetadataValidated {
                image: *image,
                layout,
                config,
            },
        })
    }
}

impl Default for Handoff<Idle> {
    fn default() -> Self {
        Self::new()
    }
}

impl Handoff<MetadataValidated> {
    pub fn layout(&self) -> &ImageLayout {
        &self.state.layout
    }

    /// Build the boot descriptor for `geometry` and write it to internal
    /// RAM.
    ///
    /// Everything is checked before the write; on error the platform has
    /// only been read from.
    pub fn populate<P: Platform + ?Sized>(self, geometry: &VolumeGeometry, platform: &mut P) -> Result<Handoff<DescriptorPopulated>> {
        let MetadataValidated { image, layout, config } = self.state;

        let mut descriptor = BootDescriptor {
            geometry: *geometry,
            prog: ProgramInfo {
                cluster: image.cluster,
                size: image.size,
            },
            rom_banks: layout.total_banks(),
            sram_mask: DEFAULT_SRAM_MASK,
            pow_cnt: PowCnt::from_bits_retain(platform.inb(IO_NILE_POW_CNT)),
            emu_cnt: EMU_EEPROM_NONE,
            flags: ProgFlags::BUS_16BIT,
            flags2: ProgFlags2::empty(),
            patches: Patches::empty(),
            start_pointer: COLD_BOOT_VECTOR,
        };
        if let Some(meta) = &image.metadata {
            descriptor.rom_banks = meta.rom_banks.unwrap_or(descriptor.rom_banks);
            descriptor.sram_mask = meta.sram_mask();
            descriptor.pow_cnt = meta.pow_cnt();
            descriptor.emu_cnt = meta.emu_cnt();
            descriptor.flags = meta.prog_flags();
            descriptor.flags2 = meta.prog_flags2();
            descriptor.patches = meta.patches();
        }

        if let Err(err) = descriptor.validate() {
            warn!("handoff: descriptor rejected: {}", err);
            return Err(err);
        }

        platform.write_iram(BootDescriptor::ADDRESS, &descriptor.encode());
        debug!(
            "handoff: descriptor written, pow {:#04x} emu {:#04x} flags {:#04x} banks {}",
            descriptor.pow_cnt.bits(),
            descriptor.emu_cnt,
            descriptor.flags.bits(),
            descriptor.rom_banks
        );
        Ok(Handoff {
            state: DescriptorPopulated { descriptor, config },
        })
    }
}

impl Handoff<DescriptorPopulated> {
    pub fn descriptor(&self) -> &BootDescriptor {
        &self.state.descriptor
    }

    /// Blank the display, mask interrupts and copy the second stage into
    /// internal RAM.
    pub fn stage<P: Platform + ?Sized>(self, platform: &mut P, stub: &StubImage<'_>) -> Handoff<Staged> {
        let DescriptorPopulated { descriptor, config } = self.state;

        platform.disable_display();
        platform.disable_interrupts();
        platform.write_iram(config.tiles_address, stub.tiles);
        platform.write_iram(config.stub_address, stub.code);

        Handoff {
            state: Staged { descriptor, config },
        }
    }
}

impl Handoff<Staged> {
    pub fn descriptor(&self) -> &BootDescriptor {
        &self.state.descriptor
    }

    /// Jump into the second stage.
    pub fn commit<P: Platform + ?Sized>(self, platform: &mut P) -> ! {
        let target = FarPtr::new(0x0000, self.state.config.stub_address);
        info!("handoff: jumping to {}", target);
        platform.far_jump(target)
    }
}

/// Run the whole handoff.
///
/// Only returns if a step before staging failed.
pub fn launch<P: Platform + ?Sized>(
    image: &RomImage,
    geometry: &VolumeGeometry,
    config: LaunchConfig,
    stub: &StubImage<'_>,
    platform: &mut P,
) -> Error {
    let populated = stub
        .check(&config)
        .and_then(|()| Handoff::new().validate(image, config))
        .and_then(|validated| validated.populate(geometry, platform));

    match populated {
        Ok(populated) => populated.stage(platform, stub).commit(platform),
        Err(err) => {
            warn!("handoff: launch aborted: {} (code {:#04x})", err, err.code());
            err
        }
    }
}
