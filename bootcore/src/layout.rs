//! Placement of a cartridge image in PSRAM.
//!
//! Images are mapped at the top of a power-of-two ROM space of at least one
//! bank, so the footer always lands at the end of the last bank where the
//! CPU's reset vector expects it.

use crate::banked::CHUNK_SIZE;
use crate::{BankedAddr, Error, Result, BANK_SIZE};

/// Where an image of a given size goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLayout {
    size: u32,
    start: BankedAddr,
    total_banks: u16,
}

impl ImageLayout {
    pub fn for_size(size: u32) -> Result<Self> {
        if size == 0 {
            return Err(Error::FormatInvalid);
        }
        let real_size = if size < BANK_SIZE {
            BANK_SIZE
        } else {
            size.checked_next_power_of_two().ok_or(Error::FileTooLarge)?
        };
        let total_banks = u16::try_from(real_size / BANK_SIZE).map_err(|_| Error::FileTooLarge)?;

        Ok(Self {
            size,
            start: BankedAddr::from_linear(real_size - size),
            total_banks,
        })
    }

    /// Image size in bytes.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// First byte of the image.
    pub fn start(&self) -> BankedAddr {
        self.start
    }

    /// Size of the power-of-two ROM space.
    pub fn real_size(&self) -> u32 {
        self.total_banks as u32 * BANK_SIZE
    }

    /// Banks in the ROM space, including any left empty below the image.
    pub fn total_banks(&self) -> u16 {
        self.total_banks
    }

    pub fn last_bank(&self) -> u16 {
        self.total_banks - 1
    }

    /// Number of progress reports a banked copy of the image will make.
    pub fn chunk_count(&self) -> u32 {
        self.real_size() / CHUNK_SIZE - self.start.linear() / CHUNK_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_image_fills_top_of_one_bank() {
        let layout = ImageLayout::for_size(0x2000).unwrap();
        assert_eq!(layout.total_banks(), 1);
        assert_eq!(layout.start(), BankedAddr::new(0, 0xE000));
        assert_eq!(layout.chunk_count(), 1);
    }

    #[test]
    fn test_power_of_two_image() {
        let layout = ImageLayout::for_size(0x10_0000).unwrap();
        assert_eq!(layout.total_banks(), 16);
        assert_eq!(layout.start(), BankedAddr::new(0, 0));
        assert_eq!(layout.last_bank(), 15);
        assert_eq!(layout.chunk_count(), 32);
    }

    #[test]
    fn test_odd_image_rounds_up() {
        // 3 MiB + 0x4000 lands in a 4 MiB space
        let size = 0x30_4000;
        let layout = ImageLayout::for_size(size).unwrap();
        assert_eq!(layout.total_banks(), 64);
        assert_eq!(layout.start().linear(), 0x40_0000 - size);
        assert_eq!(layout.start(), BankedAddr::new(0x0F, 0xC000));
        assert_eq!(layout.chunk_count(), 97);
    }

    #[test]
    fn test_rejects_empty_and_huge() {
        assert_eq!(ImageLayout::for_size(0), Err(Error::FormatInvalid));
        assert_eq!(ImageLayout::for_size(0x8000_0001), Err(Error::FileTooLarge));
    }
}
