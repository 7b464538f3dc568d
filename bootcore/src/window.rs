//! Single-sector window cache.
//!
//! Every table lookup and every sub-sector transfer goes through one 512-byte
//! buffer. A different sector number replaces the cached one; there is no
//! other eviction.

use log::trace;

use crate::{BlockDevice, Result, SECTOR_SIZE};

/// One cached sector.
pub struct SectorWindow {
    sector: Option<u32>,
    data: [u8; SECTOR_SIZE],
}

impl SectorWindow {
    pub const fn new() -> Self {
        Self {
            sector: None,
            data: [0u8; SECTOR_SIZE],
        }
    }

    /// Sector currently held, if any.
    pub fn sector(&self) -> Option<u32> {
        self.sector
    }

    /// Make `sector` the cached sector and return its contents.
    ///
    /// A hit does not touch the device. A miss issues exactly one
    /// single-sector read; if it fails the window is left empty and the
    /// device error is returned as is.
    pub fn ensure<D: BlockDevice + ?Sized>(
        &mut self,
        device: &mut D,
        sector: u32,
    ) -> Result<&[u8; SECTOR_SIZE]> {
        if self.sector != Some(sector) {
            trace!("window: load sector {}", sector);
            self.sector = None;
            device.read_sectors(sector, 1, &mut self.data)?;
            self.sector = Some(sector);
        }
        Ok(&self.data)
    }

    /// Patch `bytes` into `sector` at `offset` and write the sector back.
    pub fn write_through<D: BlockDevice + ?Sized>(
        &mut self,
        device: &mut D,
        sector: u32,
        offset: usize,
        bytes: &[u8],
    ) -> Result<()> {
        self.ensure(device, sector)?;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        if let Err(err) = device.write_sectors(sector, 1, &self.data) {
            // The buffer no longer matches the medium
            self.sector = None;
            return Err(err);
        }
        Ok(())
    }

    pub fn invalidate(&mut self) {
        self.sector = None;
    }

    /// Drop the cached sector if it lies in `first..first + count`.
    pub fn invalidate_range(&mut self, first: u32, count: u32) {
        if let Some(sector) = self.sector {
            if sector >= first && sector - first < count {
                self.sector = None;
            }
        }
    }
}

impl Default for SectorWindow {
    fn default() -> Self {
        Self::new()
    }
}
