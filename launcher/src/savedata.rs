//! Save memory plumbing.
//!
//! Before a game starts, its save file is copied into cartridge SRAM; when
//! the menu comes back up, SRAM (or, for WonderWitch images, the flash image
//! in PSRAM) is written back over the same file. Save files are preallocated
//! by the file layer, so every transfer here overwrites an existing chain.

use log::{debug, warn};

use bootcore::banked::{read_sram_banked, write_rom_banked, write_sram_banked, BankScope};
use bootcore::{
    BankPort, BankedAddr, BankedMemory, BlockDevice, Error, Progress, ReadStream, Result, Seek, Volume, WriteStream,
    BANK_SIZE, SECTOR_SIZE,
};

use crate::metadata::RomMetadata;

/// Fill byte of erased save memory.
pub const ERASED: u8 = 0xFF;

/// Offset of the image footer inside the last bank.
const FOOTER_OFFSET: usize = 0xFFF0;
const JUMP_OPCODE: u8 = 0xEA;

/// Lowest footer jump segment byte considered valid for a flash image.
const MIN_JUMP_SEGMENT_LO: u8 = 0x10;

/// Bring a preallocated save file up to `size` bytes of content.
///
/// `written` bytes at the start of the file are kept; the rest is filled
/// with [`ERASED`]. The stream is left at offset 0.
pub fn prepare_save<S: WriteStream + Seek + ?Sized>(stream: &mut S, written: u32, size: u32) -> Result<()> {
    if written < size {
        debug!("save: erase {:#x}..{:#x}", written, size);
        stream.seek(written)?;
        stream.fill(ERASED, size - written)?;
    }
    stream.seek(0)
}

/// Bring a preallocated flash file up to `size` bytes, seeding it from the
/// `source_len`-byte image at `source`.
///
/// A file that already holds `size` bytes is left alone. Otherwise the image
/// is copied over its start and the rest is filled with [`ERASED`].
pub fn seed_flash_save<D: BlockDevice>(
    volume: &mut Volume<D>,
    file: SaveFile,
    source: u32,
    source_len: u32,
    size: u32,
) -> Result<()> {
    if file.written >= size {
        return Ok(());
    }
    if source_len > size {
        warn!("save: image of {:#x} bytes does not fit a {:#x} byte flash", source_len, size);
        return Err(Error::Integrity);
    }
    debug!("save: seed flash file from cluster {} ({:#x} bytes)", source, source_len);

    // Both files live on the same volume; only one stream may be open
    let mut buf = [0u8; SECTOR_SIZE];
    let mut pos = 0;
    while pos < source_len {
        let n = (source_len - pos).min(SECTOR_SIZE as u32);
        let chunk = &mut buf[..n as usize];
        let mut reader = volume.open(source);
        reader.seek(pos)?;
        reader.read(chunk)?;
        let mut writer = volume.open(file.cluster);
        writer.seek(pos)?;
        writer.write(chunk)?;
        pos += n;
    }
    prepare_save(&mut volume.open(file.cluster), source_len, size)
}

/// A preallocated save file: its first cluster and how many bytes of it
/// hold data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveFile {
    pub cluster: u32,
    pub written: u32,
}

/// Prepare the save memory `meta` asks for before booting the image at
/// `image_cluster`.
///
/// SRAM saves are erased up to size and copied into cartridge SRAM. A
/// WonderWitch flash file is seeded from the image itself on first launch.
/// A save the image needs but that has no file is an error.
pub fn restore_save_data<D, M, P>(
    volume: &mut Volume<D>,
    memory: &mut M,
    meta: &RomMetadata,
    image_cluster: u32,
    sram: Option<SaveFile>,
    flash: Option<SaveFile>,
    progress: &mut P,
) -> Result<()>
where
    D: BlockDevice,
    M: BankedMemory + ?Sized,
    P: Progress + ?Sized,
{
    if meta.sram_size != 0 {
        let file = sram.ok_or(Error::Integrity)?;
        let mut stream = volume.open(file.cluster);
        prepare_save(&mut stream, file.written, meta.sram_size)?;
        restore_sram(&mut stream, memory, meta.sram_size, progress)?;
    }
    if meta.flash_size != 0 {
        let file = flash.ok_or(Error::Integrity)?;
        seed_flash_save(volume, file, image_cluster, meta.size, meta.flash_size)?;
    }
    Ok(())
}

/// Copy `len` bytes of save file into SRAM.
pub fn restore_sram<S, M, P>(stream: &mut S, memory: &mut M, len: u32, progress: &mut P) -> Result<()>
where
    S: ReadStream + ?Sized,
    M: BankedMemory + ?Sized,
    P: Progress + ?Sized,
{
    debug!("save: restore {:#x} bytes of SRAM", len);
    read_sram_banked(stream, memory, BankedAddr::default(), len, progress)
}

/// Write `len` bytes of SRAM back to the save file.
pub fn backup_sram<S, M, P>(stream: &mut S, memory: &mut M, len: u32, progress: &mut P) -> Result<()>
where
    S: WriteStream + ?Sized,
    M: BankedMemory + ?Sized,
    P: Progress + ?Sized,
{
    debug!("save: back up {:#x} bytes of SRAM", len);
    write_sram_banked(stream, memory, BankedAddr::default(), len, progress)
}

/// Whether the `len`-byte flash image in ROM space still ends in a
/// bootable footer.
pub fn flash_is_bootable<M: BankedMemory + ?Sized>(memory: &mut M, len: u32) -> bool {
    if len == 0 {
        return false;
    }
    let last_bank = ((len - 1) / BANK_SIZE) as u16;
    let mut scope = BankScope::new(memory, BankPort::Rom0);
    scope.set_bank(BankPort::Rom0, last_bank);
    let footer = &scope.window(BankPort::Rom0)[FOOTER_OFFSET..];
    footer[0] == JUMP_OPCODE && footer[4] > MIN_JUMP_SEGMENT_LO
}

/// Write a WonderWitch flash image back to its file.
///
/// A game that crashed mid-write can leave the flash unbootable; such an
/// image is not written back, so the last good copy on storage survives.
pub fn backup_flash<S, M, P>(stream: &mut S, memory: &mut M, len: u32, progress: &mut P) -> Result<()>
where
    S: WriteStream + ?Sized,
    M: BankedMemory + ?Sized,
    P: Progress + ?Sized,
{
    if !flash_is_bootable(memory, len) {
        warn!("save: flash image of {:#x} bytes is not bootable", len);
        return Err(Error::SaveCorrupt);
    }
    debug!("save: back up {:#x} bytes of flash", len);
    write_rom_banked(stream, memory, BankedAddr::default(), len, progress)
}
