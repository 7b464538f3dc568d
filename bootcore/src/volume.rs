//! Storage context.
//!
//! A [`Volume`] owns everything a stream needs: the block device, the
//! volume geometry and the sector window. Streams borrow the volume
//! mutably, so at most one can be open at a time.

use log::{debug, warn};

use crate::window::SectorWindow;
use crate::{BlockDevice, Error, Result, VolumeGeometry, SECTOR_SIZE};

/// Stream tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StreamConfig {
    /// Fold physically adjacent clusters into a single bulk transfer.
    pub contiguous_runs: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            contiguous_runs: cfg!(feature = "fast-contiguous-read"),
        }
    }
}

/// A mounted volume.
pub struct Volume<D: BlockDevice> {
    pub(crate) device: D,
    pub(crate) geometry: VolumeGeometry,
    pub(crate) window: SectorWindow,
    pub(crate) config: StreamConfig,
}

impl<D: BlockDevice> Volume<D> {
    /// Wrap a device whose geometry is already known.
    pub fn new(device: D, geometry: VolumeGeometry, config: StreamConfig) -> Self {
        Self {
            device,
            geometry,
            window: SectorWindow::new(),
            config,
        }
    }

    /// Locate the FAT volume on `device` and derive its geometry.
    ///
    /// Sector 0 may be the volume boot record itself or an MBR whose first
    /// partition holds the volume.
    pub fn mount(mut device: D, config: StreamConfig) -> Result<Self> {
        let mut sector = [0u8; SECTOR_SIZE];
        device.read_sectors(0, 1, &mut sector)?;

        let geometry = match VolumeGeometry::from_boot_sector(&sector, 0) {
            Ok(geometry) => geometry,
            Err(Error::NoFilesystem) if sector[510] == 0x55 && sector[511] == 0xAA => {
                let entry = &sector[446..462];
                let start = u32::from_le_bytes([entry[8], entry[9], entry[10], entry[11]]);
                if entry[4] == 0 || start == 0 {
                    warn!("mount: no partition in MBR");
                    return Err(Error::NoFilesystem);
                }
                debug!("mount: partition type {:#04x} at sector {}", entry[4], start);
                device.read_sectors(start, 1, &mut sector)?;
                VolumeGeometry::from_boot_sector(&sector, start)?
            }
            Err(err) => return Err(err),
        };

        Ok(Self::new(device, geometry, config))
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    pub fn config(&self) -> StreamConfig {
        self.config
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }
}
