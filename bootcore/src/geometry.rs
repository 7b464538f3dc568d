//! Volume geometry.
//!
//! The handful of numbers the cluster walker and the stream need from a
//! mounted FAT volume. They are fixed at mount time and travel unchanged into
//! the boot descriptor, so the second stage can stream without parsing the
//! boot sector again.

use log::debug;

use crate::{Error, Result, SECTOR_SIZE};

// =============================================================================
// Constants
// =============================================================================

const FIRST_DATA_CLUSTER: u32 = 2;
const MAX_FAT12_CLUSTERS: u32 = 0xFF5;
const MAX_FAT16_CLUSTERS: u32 = 0xFFF5;
const DIR_ENTRIES_PER_SECTOR: u32 = (SECTOR_SIZE / 32) as u32;

// =============================================================================
// FAT type
// =============================================================================

/// On-disk cluster table encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum FsType {
    Fat12 = 1,
    Fat16 = 2,
    Fat32 = 3,
}

impl FsType {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(FsType::Fat12),
            2 => Some(FsType::Fat16),
            3 => Some(FsType::Fat32),
            _ => None,
        }
    }

    /// End-of-chain marker written by formatting tools.
    pub const fn end_of_chain(self) -> u32 {
        match self {
            FsType::Fat12 => 0xFFF,
            FsType::Fat16 => 0xFFFF,
            FsType::Fat32 => 0x0FFF_FFFF,
        }
    }

    /// Whether a raw table entry terminates a chain.
    pub const fn is_end_of_chain(self, entry: u32) -> bool {
        match self {
            FsType::Fat12 => entry >= 0xFF8,
            FsType::Fat16 => entry >= 0xFFF8,
            FsType::Fat32 => (entry & 0x0FFF_FFFF) >= 0x0FFF_FFF8,
        }
    }
}

// =============================================================================
// Geometry
// =============================================================================

/// Geometry of one mounted volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VolumeGeometry {
    fs_type: FsType,
    cluster_table_base: u32,
    data_base: u32,
    cluster_size: u16,
    fat_entry_count: u32,
}

impl VolumeGeometry {
    /// Build a geometry from externally supplied values.
    ///
    /// `cluster_size` must be a power of two and the table must describe at
    /// least one data cluster.
    pub fn new(
        fs_type: FsType,
        cluster_table_base: u32,
        data_base: u32,
        cluster_size: u16,
        fat_entry_count: u32,
    ) -> Result<Self> {
        if !cluster_size.is_power_of_two() {
            return Err(Error::InvalidGeometry);
        }
        if fat_entry_count <= FIRST_DATA_CLUSTER || data_base < cluster_table_base {
            return Err(Error::InvalidGeometry);
        }
        // The whole data area must be addressable
        let data_end = (fat_entry_count - FIRST_DATA_CLUSTER)
            .checked_mul(cluster_size as u32)
            .and_then(|sectors| sectors.checked_add(data_base));
        if data_end.is_none() {
            return Err(Error::InvalidGeometry);
        }
        Ok(Self {
            fs_type,
            cluster_table_base,
            data_base,
            cluster_size,
            fat_entry_count,
        })
    }

    /// Derive the geometry from a FAT boot sector located at `partition_start`.
    pub fn from_boot_sector(sector: &[u8; SECTOR_SIZE], partition_start: u32) -> Result<Self> {
        if sector[510] != 0x55 || sector[511] != 0xAA {
            return Err(Error::NoFilesystem);
        }

        let bytes_per_sector = u16::from_le_bytes([sector[11], sector[12]]);
        let sectors_per_cluster = sector[13];
        let reserved_sectors = u16::from_le_bytes([sector[14], sector[15]]) as u32;
        let num_fats = sector[16] as u32;
        let root_entries = u16::from_le_bytes([sector[17], sector[18]]) as u32;
        let total_16 = u16::from_le_bytes([sector[19], sector[20]]) as u32;
        let fat_size_16 = u16::from_le_bytes([sector[22], sector[23]]) as u32;
        let total_32 = u32::from_le_bytes([sector[32], sector[33], sector[34], sector[35]]);
        let fat_size_32 = u32::from_le_bytes([sector[36], sector[37], sector[38], sector[39]]);

        if bytes_per_sector as usize != SECTOR_SIZE {
            return Err(Error::NoFilesystem);
        }
        if sectors_per_cluster == 0 || !sectors_per_cluster.is_power_of_two() {
            return Err(Error::NoFilesystem);
        }
        if reserved_sectors == 0 || num_fats == 0 || num_fats > 2 {
            return Err(Error::NoFilesystem);
        }
        if root_entries % DIR_ENTRIES_PER_SECTOR != 0 {
            return Err(Error::NoFilesystem);
        }

        let fat_size = if fat_size_16 != 0 { fat_size_16 } else { fat_size_32 };
        let total = if total_16 != 0 { total_16 } else { total_32 };
        let system_sectors = fat_size
            .checked_mul(num_fats)
            .and_then(|fats| fats.checked_add(reserved_sectors))
            .and_then(|sectors| sectors.checked_add(root_entries / DIR_ENTRIES_PER_SECTOR))
            .ok_or(Error::NoFilesystem)?;
        if fat_size == 0 || total <= system_sectors {
            return Err(Error::NoFilesystem);
        }
        // Every sector offset below is bounded by the partition end
        if partition_start.checked_add(total).is_none() {
            return Err(Error::NoFilesystem);
        }

        let clusters = (total - system_sectors) / sectors_per_cluster as u32;
        let fs_type = if clusters <= MAX_FAT12_CLUSTERS {
            FsType::Fat12
        } else if clusters <= MAX_FAT16_CLUSTERS {
            FsType::Fat16
        } else {
            FsType::Fat32
        };
        if fs_type == FsType::Fat32 && root_entries != 0 {
            return Err(Error::NoFilesystem);
        }

        let geometry = Self::new(
            fs_type,
            partition_start + reserved_sectors,
            partition_start + system_sectors,
            sectors_per_cluster as u16,
            clusters + FIRST_DATA_CLUSTER,
        )?;
        debug!(
            "geometry: {:?}, {} clusters of {} sectors, table at {}, data at {}",
            fs_type, clusters, sectors_per_cluster, geometry.cluster_table_base, geometry.data_base
        );
        Ok(geometry)
    }

    pub const fn fs_type(&self) -> FsType {
        self.fs_type
    }

    pub const fn cluster_table_base(&self) -> u32 {
        self.cluster_table_base
    }

    pub const fn data_base(&self) -> u32 {
        self.data_base
    }

    /// Sectors per cluster.
    pub const fn cluster_size(&self) -> u16 {
        self.cluster_size
    }

    pub const fn fat_entry_count(&self) -> u32 {
        self.fat_entry_count
    }

    /// Bytes per cluster.
    pub const fn cluster_bytes(&self) -> u32 {
        self.cluster_size as u32 * SECTOR_SIZE as u32
    }

    /// Whether `cluster` names an entry of the allocation table.
    pub const fn is_valid_cluster(&self, cluster: u32) -> bool {
        cluster >= FIRST_DATA_CLUSTER && cluster < self.fat_entry_count
    }

    /// Absolute sector of the first sector of `cluster`, or `None` when the
    /// cluster has no data area.
    pub const fn cluster_to_sector(&self, cluster: u32) -> Option<u32> {
        let index = cluster.wrapping_sub(FIRST_DATA_CLUSTER);
        if index >= self.fat_entry_count - FIRST_DATA_CLUSTER {
            return None;
        }
        match (self.cluster_size as u32).checked_mul(index) {
            Some(offset) => self.data_base.checked_add(offset),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fat16() -> VolumeGeometry {
        VolumeGeometry::new(FsType::Fat16, 1, 40, 4, 100).unwrap()
    }

    #[test]
    fn test_cluster_to_sector() {
        let geometry = fat16();
        assert_eq!(geometry.cluster_to_sector(2), Some(40));
        assert_eq!(geometry.cluster_to_sector(3), Some(44));
        assert_eq!(geometry.cluster_to_sector(99), Some(40 + 97 * 4));
    }

    #[test]
    fn test_cluster_to_sector_rejects_out_of_range() {
        let geometry = fat16();
        assert_eq!(geometry.cluster_to_sector(0), None);
        assert_eq!(geometry.cluster_to_sector(1), None);
        assert_eq!(geometry.cluster_to_sector(100), None);
        assert_eq!(geometry.cluster_to_sector(0xFFFF), None);
        assert_eq!(geometry.cluster_to_sector(u32::MAX), None);
    }

    #[test]
    fn test_new_validates() {
        assert_eq!(
            VolumeGeometry::new(FsType::Fat16, 1, 40, 3, 100),
            Err(Error::InvalidGeometry)
        );
        assert_eq!(
            VolumeGeometry::new(FsType::Fat16, 1, 40, 0, 100),
            Err(Error::InvalidGeometry)
        );
        assert_eq!(
            VolumeGeometry::new(FsType::Fat16, 1, 40, 4, 2),
            Err(Error::InvalidGeometry)
        );
    }

    #[test]
    fn test_new_rejects_unaddressable_data_area() {
        assert_eq!(
            VolumeGeometry::new(FsType::Fat32, 1, 0xF000_0000, 64, 0x0100_0000),
            Err(Error::InvalidGeometry)
        );
        assert_eq!(
            VolumeGeometry::new(FsType::Fat32, 1, 2, 0x8000, 0x0002_0002),
            Err(Error::InvalidGeometry)
        );

        // Last cluster ends exactly at the top of the sector space
        let data_base = u32::MAX - 64 * 10;
        let geometry = VolumeGeometry::new(FsType::Fat32, 1, data_base, 64, 12).unwrap();
        assert_eq!(geometry.cluster_to_sector(11), Some(u32::MAX - 64));
        assert_eq!(geometry.cluster_to_sector(12), None);
    }

    #[test]
    fn test_end_of_chain() {
        assert!(FsType::Fat12.is_end_of_chain(0xFFF));
        assert!(!FsType::Fat12.is_end_of_chain(0xFF7));
        assert!(FsType::Fat16.is_end_of_chain(0xFFF8));
        assert!(FsType::Fat32.is_end_of_chain(0xFFFF_FFFF));
        assert!(!FsType::Fat32.is_end_of_chain(0x0000_0003));
    }

    fn boot_sector(spc: u8, reserved: u16, fats: u8, root: u16, total: u32, fat_size: u16) -> [u8; 512] {
        let mut s = [0u8; 512];
        s[0] = 0xEB;
        s[11..13].copy_from_slice(&512u16.to_le_bytes());
        s[13] = spc;
        s[14..16].copy_from_slice(&reserved.to_le_bytes());
        s[16] = fats;
        s[17..19].copy_from_slice(&root.to_le_bytes());
        if total < 0x10000 {
            s[19..21].copy_from_slice(&(total as u16).to_le_bytes());
        } else {
            s[32..36].copy_from_slice(&total.to_le_bytes());
        }
        s[22..24].copy_from_slice(&fat_size.to_le_bytes());
        s[510] = 0x55;
        s[511] = 0xAA;
        s
    }

    #[test]
    fn test_from_boot_sector_fat16() {
        // 4 reserved, 2 FATs of 32 sectors, 512 root entries (32 sectors)
        let sector = boot_sector(4, 4, 2, 512, 40_000, 32);
        let geometry = VolumeGeometry::from_boot_sector(&sector, 2048).unwrap();

        let system = 4 + 64 + 32;
        assert_eq!(geometry.fs_type(), FsType::Fat16);
        assert_eq!(geometry.cluster_table_base(), 2048 + 4);
        assert_eq!(geometry.data_base(), 2048 + system);
        assert_eq!(geometry.cluster_size(), 4);
        assert_eq!(geometry.fat_entry_count(), (40_000 - system) / 4 + 2);
    }

    #[test]
    fn test_from_boot_sector_fat12() {
        let sector = boot_sector(1, 1, 2, 224, 2880, 9);
        let geometry = VolumeGeometry::from_boot_sector(&sector, 0).unwrap();
        assert_eq!(geometry.fs_type(), FsType::Fat12);
        assert_eq!(geometry.data_base(), 1 + 18 + 14);
    }

    #[test]
    fn test_from_boot_sector_rejects_garbage() {
        let mut sector = boot_sector(4, 4, 2, 512, 40_000, 32);
        sector[511] = 0;
        assert_eq!(VolumeGeometry::from_boot_sector(&sector, 0), Err(Error::NoFilesystem));

        let sector = boot_sector(3, 4, 2, 512, 40_000, 32);
        assert_eq!(VolumeGeometry::from_boot_sector(&sector, 0), Err(Error::NoFilesystem));
    }

    #[test]
    fn test_from_boot_sector_rejects_overflowing_sizes() {
        // Two huge FATs: the system area does not fit in 32 bits
        let mut sector = boot_sector(8, 32, 2, 0, u32::MAX, 0);
        sector[36..40].copy_from_slice(&0x9000_0000u32.to_le_bytes());
        assert_eq!(VolumeGeometry::from_boot_sector(&sector, 0), Err(Error::NoFilesystem));

        // Sane volume placed where its end would wrap around
        let sector = boot_sector(4, 4, 2, 512, 40_000, 32);
        assert_eq!(
            VolumeGeometry::from_boot_sector(&sector, u32::MAX - 1000),
            Err(Error::NoFilesystem)
        );
        assert!(VolumeGeometry::from_boot_sector(&sector, u32::MAX - 40_000).is_ok());
    }
}
