//! Contiguous-run cluster stream.
//!
//! A [`ClusterStream`] walks one cluster chain from its first cluster. Whole
//! sectors are moved with a single device transfer per physically
//! contiguous run of clusters; partial sectors go through the volume's
//! sector window. Reads and writes share the positioning logic, so a stream
//! can overwrite a preallocated file in place. The chain itself is never
//! extended.

use core::mem;

use log::{debug, trace, warn};

use crate::{BlockDevice, Error, Result, Volume, SECTOR_SIZE};

const SECTOR_BYTES: u32 = SECTOR_SIZE as u32;

// =============================================================================
// Stream traits
// =============================================================================

/// Source of file bytes.
pub trait ReadStream {
    /// Fill `buf` completely or fail.
    ///
    /// On failure `buf` may be partially written and must be discarded.
    fn read(&mut self, buf: &mut [u8]) -> Result<()>;
}

/// Sink for file bytes.
pub trait WriteStream {
    /// Write all of `buf` or fail.
    fn write(&mut self, buf: &[u8]) -> Result<()>;

    /// Write `len` copies of `byte`.
    fn fill(&mut self, byte: u8, len: u32) -> Result<()> {
        let chunk = [byte; SECTOR_SIZE];
        let mut remaining = len as usize;
        while remaining > 0 {
            let n = remaining.min(SECTOR_SIZE);
            self.write(&chunk[..n])?;
            remaining -= n;
        }
        Ok(())
    }
}

/// Random access within a stream.
pub trait Seek {
    fn seek(&mut self, pos: u32) -> Result<()>;
}

// =============================================================================
// Cluster stream
// =============================================================================

impl<D: BlockDevice> Volume<D> {
    /// Open a stream at the first cluster of a file.
    pub fn open(&mut self, cluster: u32) -> ClusterStream<'_, D> {
        debug!("stream: open at cluster {}", cluster);
        ClusterStream {
            volume: self,
            start: cluster,
            cluster,
            sector: 0,
            pos: 0,
            poisoned: None,
        }
    }
}

/// Cursor over one cluster chain.
pub struct ClusterStream<'v, D: BlockDevice> {
    volume: &'v mut Volume<D>,
    start: u32,
    /// Cluster holding the byte before `pos` when `pos` sits on a cluster
    /// boundary, else the cluster holding `pos`.
    cluster: u32,
    /// Sector holding `pos`, valid while `pos` is not sector aligned.
    sector: u32,
    pos: u32,
    poisoned: Option<Error>,
}

impl<'v, D: BlockDevice> ClusterStream<'v, D> {
    /// Logical byte offset.
    pub fn position(&self) -> u32 {
        self.pos
    }

    pub fn start_cluster(&self) -> u32 {
        self.start
    }

    pub fn current_cluster(&self) -> u32 {
        self.cluster
    }

    /// Read exactly `buf.len()` bytes.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        self.guarded(|stream| stream.read_inner(buf))
    }

    /// Overwrite exactly `buf.len()` bytes of the chain.
    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.guarded(|stream| stream.write_inner(buf))
    }

    /// Reposition to `pos`, walking the chain from its first cluster.
    pub fn seek(&mut self, pos: u32) -> Result<()> {
        self.guarded(|stream| stream.seek_inner(pos))
    }

    /// A failed transfer leaves the cursor in an unknown place; refuse any
    /// further use and keep reporting the first error.
    fn guarded<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if let Some(err) = self.poisoned {
            return Err(err);
        }
        let result = op(self);
        if let Err(err) = &result {
            warn!("stream: {} at offset {} (cluster {})", err, self.pos, self.cluster);
            self.poisoned = Some(*err);
        }
        result
    }

    fn read_inner(&mut self, mut buf: &mut [u8]) -> Result<()> {
        while !buf.is_empty() {
            let offset = (self.pos % SECTOR_BYTES) as usize;
            if offset == 0 {
                let (sector, index) = self.enter_sector()?;
                let whole = (buf.len() / SECTOR_SIZE) as u32;
                if whole > 0 {
                    let count = self.run_length(index, whole)?;
                    let (head, tail) = mem::take(&mut buf).split_at_mut(count as usize * SECTOR_SIZE);
                    trace!("stream: read {} sectors at {}", count, sector);
                    self.volume.device.read_sectors(sector, count, head)?;
                    self.pos += count * SECTOR_BYTES;
                    buf = tail;
                    continue;
                }
                self.sector = sector;
            }

            let n = (SECTOR_SIZE - offset).min(buf.len());
            let data = self.volume.window.ensure(&mut self.volume.device, self.sector)?;
            let (head, tail) = mem::take(&mut buf).split_at_mut(n);
            head.copy_from_slice(&data[offset..offset + n]);
            self.pos += n as u32;
            buf = tail;
        }
        Ok(())
    }

    fn write_inner(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let offset = (self.pos % SECTOR_BYTES) as usize;
            if offset == 0 {
                let (sector, index) = self.enter_sector()?;
                let whole = (buf.len() / SECTOR_SIZE) as u32;
                if whole > 0 {
                    let count = self.run_length(index, whole)?;
                    let (head, tail) = buf.split_at(count as usize * SECTOR_SIZE);
                    trace!("stream: write {} sectors at {}", count, sector);
                    self.volume.window.invalidate_range(sector, count);
                    self.volume.device.write_sectors(sector, count, head)?;
                    self.pos += count * SECTOR_BYTES;
                    buf = tail;
                    continue;
                }
                self.sector = sector;
            }

            let n = (SECTOR_SIZE - offset).min(buf.len());
            let (head, tail) = buf.split_at(n);
            self.volume
                .window
                .write_through(&mut self.volume.device, self.sector, offset, head)?;
            self.pos += n as u32;
            buf = tail;
        }
        Ok(())
    }

    fn seek_inner(&mut self, pos: u32) -> Result<()> {
        let geometry = self.volume.geometry;
        let hops = if pos == 0 { 0 } else { (pos - 1) / geometry.cluster_bytes() };

        let mut cluster = self.start;
        for _ in 0..hops {
            cluster = self.follow(cluster)?;
        }
        self.cluster = cluster;
        self.pos = pos;

        if pos % SECTOR_BYTES != 0 {
            let index = (pos / SECTOR_BYTES) & (geometry.cluster_size() as u32 - 1);
            let base = geometry.cluster_to_sector(cluster).ok_or(Error::Integrity)?;
            self.sector = base + index;
        }
        debug!("stream: seek to {} (cluster {})", pos, cluster);
        Ok(())
    }

    /// Resolve the sector holding a sector-aligned `pos`, stepping to the
    /// next cluster first when `pos` sits on a cluster boundary.
    ///
    /// Returns the absolute sector and its index inside the cluster.
    fn enter_sector(&mut self) -> Result<(u32, u32)> {
        let geometry = self.volume.geometry;
        let index = (self.pos / SECTOR_BYTES) & (geometry.cluster_size() as u32 - 1);
        if index == 0 && self.pos != 0 {
            self.cluster = self.follow(self.cluster)?;
        }
        let base = geometry.cluster_to_sector(self.cluster).ok_or(Error::Integrity)?;
        Ok((base + index, index))
    }

    /// Next cluster of the chain. Free and reserved entries, and lookups the
    /// walker rejects, mean the chain is broken.
    fn follow(&mut self, cluster: u32) -> Result<u32> {
        match self.volume.next_cluster(cluster) {
            Ok(next) if next >= 2 => Ok(next),
            Ok(_) | Err(Error::InvalidCluster(_)) => Err(Error::Integrity),
            Err(err) => Err(err),
        }
    }

    /// Number of sectors, at most `wanted`, that can be transferred in one
    /// go starting `index` sectors into the current cluster.
    ///
    /// Adjacent clusters are folded in while the chain stays physically
    /// contiguous; `self.cluster` ends on the last cluster folded.
    fn run_length(&mut self, index: u32, wanted: u32) -> Result<u32> {
        let geometry = self.volume.geometry;
        let cluster_size = geometry.cluster_size() as u32;
        let mut run = cluster_size;

        if self.volume.config.contiguous_runs {
            while index + wanted > run {
                let current = self.cluster;
                match self.volume.next_cluster(current) {
                    Ok(next) if next == current + 1 && geometry.is_valid_cluster(next) => {
                        self.cluster = next;
                        run += cluster_size;
                    }
                    Ok(_) | Err(Error::InvalidCluster(_)) => break,
                    Err(err) => return Err(err),
                }
            }
        }

        Ok(wanted.min(run - index))
    }
}

impl<D: BlockDevice> ReadStream for ClusterStream<'_, D> {
    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        ClusterStream::read(self, buf)
    }
}

impl<D: BlockDevice> WriteStream for ClusterStream<'_, D> {
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        ClusterStream::write(self, buf)
    }
}

impl<D: BlockDevice> Seek for ClusterStream<'_, D> {
    fn seek(&mut self, pos: u32) -> Result<()> {
        ClusterStream::seek(self, pos)
    }
}
