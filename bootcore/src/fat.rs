//! Cluster table walker.

use crate::{BlockDevice, Error, FsType, Result, Volume, SECTOR_SIZE};

const SECTOR_BYTES: u32 = SECTOR_SIZE as u32;

impl<D: BlockDevice> Volume<D> {
    /// Raw allocation table entry for `cluster`.
    ///
    /// End-of-chain and free markers come back verbatim; interpreting them is
    /// up to the caller. Clusters outside `[2, fat_entry_count)` are rejected
    /// with [`Error::InvalidCluster`] before any table sector is read.
    pub fn next_cluster(&mut self, cluster: u32) -> Result<u32> {
        if !self.geometry.is_valid_cluster(cluster) {
            return Err(Error::InvalidCluster(cluster));
        }

        let base = self.geometry.cluster_table_base();
        match self.geometry.fs_type() {
            FsType::Fat12 => {
                // 1.5 bytes per entry; the pair may straddle two sectors
                let offset = cluster + (cluster >> 1);
                let lo = self.table_byte(base, offset)?;
                let hi = self.table_byte(base, offset + 1)?;
                let pair = u16::from_le_bytes([lo, hi]);
                let entry = if cluster & 1 != 0 { pair >> 4 } else { pair & 0x0FFF };
                Ok(entry as u32)
            }
            FsType::Fat16 => {
                let data = self.window.ensure(&mut self.device, base + (cluster >> 8))?;
                let i = (cluster & 0xFF) as usize * 2;
                Ok(u16::from_le_bytes([data[i], data[i + 1]]) as u32)
            }
            FsType::Fat32 => {
                let data = self.window.ensure(&mut self.device, base + (cluster >> 7))?;
                let i = (cluster & 0x7F) as usize * 4;
                let entry = u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
                Ok(entry & 0x0FFF_FFFF)
            }
        }
    }

    fn table_byte(&mut self, base: u32, offset: u32) -> Result<u8> {
        let data = self.window.ensure(&mut self.device, base + offset / SECTOR_BYTES)?;
        Ok(data[(offset % SECTOR_BYTES) as usize])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::FatImage;
    use crate::StreamConfig;

    fn walk_2_5_9(fs_type: FsType) {
        let mut image = FatImage::new(fs_type, 1, 2000);
        image.link(&[2, 5, 9]);
        let eoc = fs_type.end_of_chain();
        let mut volume = image.into_volume(StreamConfig::default());

        assert_eq!(volume.next_cluster(2), Ok(5));
        assert_eq!(volume.next_cluster(5), Ok(9));
        assert_eq!(volume.next_cluster(9), Ok(eoc));
        assert!(fs_type.is_end_of_chain(eoc));
    }

    #[test]
    fn test_chain_fat12() {
        walk_2_5_9(FsType::Fat12);
    }

    #[test]
    fn test_chain_fat16() {
        walk_2_5_9(FsType::Fat16);
    }

    #[test]
    fn test_chain_fat32() {
        walk_2_5_9(FsType::Fat32);
    }

    #[test]
    fn test_invalid_clusters_rejected() {
        for fs_type in [FsType::Fat12, FsType::Fat16, FsType::Fat32] {
            let image = FatImage::new(fs_type, 1, 2000);
            let mut volume = image.into_volume(StreamConfig::default());

            assert_eq!(volume.next_cluster(0), Err(Error::InvalidCluster(0)));
            assert_eq!(volume.next_cluster(1), Err(Error::InvalidCluster(1)));
            assert_eq!(volume.next_cluster(2000), Err(Error::InvalidCluster(2000)));
            assert_eq!(volume.next_cluster(u32::MAX), Err(Error::InvalidCluster(u32::MAX)));
            assert_eq!(volume.next_cluster(1999), Ok(0));
            // Nothing was read for the rejected lookups
            assert_eq!(volume.device().reads.len(), 1);
        }
    }

    #[test]
    fn test_fat12_entry_straddles_sectors() {
        // Cluster 341 sits at byte 511, its high nibble spills into sector 2
        let mut image = FatImage::new(FsType::Fat12, 1, 2000);
        image.set_entry(341, 0xABC);
        image.set_entry(340, 0x123);
        image.set_entry(342, 0x456);
        let mut volume = image.into_volume(StreamConfig::default());

        assert_eq!(volume.next_cluster(341), Ok(0xABC));
        assert_eq!(volume.next_cluster(340), Ok(0x123));
        assert_eq!(volume.next_cluster(342), Ok(0x456));
    }

    #[test]
    fn test_fat32_reserved_bits_masked() {
        let mut image = FatImage::new(FsType::Fat32, 1, 2000);
        image.set_entry(7, 0xF000_0008);
        let mut volume = image.into_volume(StreamConfig::default());
        assert_eq!(volume.next_cluster(7), Ok(8));
    }

    #[test]
    fn test_device_error_propagates() {
        let mut image = FatImage::new(FsType::Fat16, 1, 2000);
        image.link(&[2, 3]);
        image.disk.fail_reads_at = Some(image.geometry.cluster_table_base());
        let mut volume = image.into_volume(StreamConfig::default());
        assert_eq!(volume.next_cluster(2), Err(Error::Device(0x01)));
    }

    #[test]
    fn test_lookups_share_window() {
        let mut image = FatImage::new(FsType::Fat16, 1, 2000);
        image.link(&[2, 3, 4, 5]);
        let mut volume = image.into_volume(StreamConfig::default());
        for cluster in 2..5 {
            volume.next_cluster(cluster).unwrap();
        }
        assert_eq!(volume.device().reads.len(), 1);
    }
}
