//! In-memory stand-ins for the cartridge hardware.
//!
//! Used by the unit tests of this crate and, through the `mock` feature, by
//! the launcher and stub tests.

use crate::regs::{IO_LCD_LINE, VBLANK_LINE};
use crate::{
    BankPort, BankedMemory, BlockDevice, Error, FsType, Ports, ReadStream, Result, Seek, StreamConfig, Volume,
    VolumeGeometry, WriteStream, BANK_SIZE, SECTOR_SIZE,
};

const DEVICE_FAULT: Error = Error::Device(0x01);

// =============================================================================
// Block device
// =============================================================================

/// RAM-backed block device that records every transfer.
#[derive(Debug, Clone, Default)]
pub struct MemDisk {
    pub data: Vec<u8>,
    /// `(lba, count)` of every read, failed ones included.
    pub reads: Vec<(u32, u32)>,
    pub writes: Vec<(u32, u32)>,
    /// Fail any read touching this sector.
    pub fail_reads_at: Option<u32>,
    /// Fail any write touching this sector.
    pub fail_writes_at: Option<u32>,
}

impl MemDisk {
    pub fn zeroed(sectors: u32) -> Self {
        Self {
            data: vec![0; sectors as usize * SECTOR_SIZE],
            ..Self::default()
        }
    }

    /// Disk whose every sector has distinct contents.
    pub fn patterned(sectors: u32) -> Self {
        let mut disk = Self::zeroed(sectors);
        disk.fill_pattern(0, sectors);
        disk
    }

    pub fn fill_pattern(&mut self, first: u32, count: u32) {
        let start = first as usize * SECTOR_SIZE;
        let end = start + count as usize * SECTOR_SIZE;
        for (i, byte) in self.data[start..end].iter_mut().enumerate() {
            let at = start + i;
            *byte = ((at >> 9) as u8).wrapping_mul(31) ^ (at as u8) ^ ((at >> 17) as u8);
        }
    }

    pub fn sector_count(&self) -> u32 {
        (self.data.len() / SECTOR_SIZE) as u32
    }

    pub fn sector(&self, lba: u32) -> &[u8] {
        let start = lba as usize * SECTOR_SIZE;
        &self.data[start..start + SECTOR_SIZE]
    }

    fn range(&self, lba: u32, count: u32, fail_at: Option<u32>) -> Result<core::ops::Range<usize>> {
        let end = lba.checked_add(count).ok_or(DEVICE_FAULT)?;
        if end > self.sector_count() {
            return Err(DEVICE_FAULT);
        }
        if fail_at.is_some_and(|bad| bad >= lba && bad < end) {
            return Err(DEVICE_FAULT);
        }
        Ok(lba as usize * SECTOR_SIZE..end as usize * SECTOR_SIZE)
    }
}

impl BlockDevice for MemDisk {
    fn read_sectors(&mut self, lba: u32, count: u32, buffer: &mut [u8]) -> Result<()> {
        assert_eq!(buffer.len(), count as usize * SECTOR_SIZE);
        self.reads.push((lba, count));
        let range = self.range(lba, count, self.fail_reads_at)?;
        buffer.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write_sectors(&mut self, lba: u32, count: u32, buffer: &[u8]) -> Result<()> {
        assert_eq!(buffer.len(), count as usize * SECTOR_SIZE);
        self.writes.push((lba, count));
        let range = self.range(lba, count, self.fail_writes_at)?;
        self.data[range].copy_from_slice(buffer);
        Ok(())
    }
}

// =============================================================================
// FAT volume image
// =============================================================================

/// A FAT volume laid out as: boot sector, one allocation table, data area.
///
/// The table starts out all free and the data area is patterned.
#[derive(Debug, Clone)]
pub struct FatImage {
    pub disk: MemDisk,
    pub geometry: VolumeGeometry,
}

impl FatImage {
    pub fn new(fs_type: FsType, cluster_size: u16, fat_entry_count: u32) -> Self {
        let table_bytes = match fs_type {
            FsType::Fat12 => (fat_entry_count * 3).div_ceil(2),
            FsType::Fat16 => fat_entry_count * 2,
            FsType::Fat32 => fat_entry_count * 4,
        };
        let table_sectors = table_bytes.div_ceil(SECTOR_SIZE as u32);
        let data_base = 1 + table_sectors;
        let total = data_base + (fat_entry_count - 2) * cluster_size as u32;

        let geometry = VolumeGeometry::new(fs_type, 1, data_base, cluster_size, fat_entry_count)
            .expect("mock geometry");
        let mut disk = MemDisk::zeroed(total);
        disk.fill_pattern(data_base, total - data_base);
        Self { disk, geometry }
    }

    pub fn from_parts(disk: MemDisk, geometry: VolumeGeometry) -> Self {
        Self { disk, geometry }
    }

    /// Store a raw table entry.
    pub fn set_entry(&mut self, cluster: u32, value: u32) {
        let base = self.geometry.cluster_table_base() as usize * SECTOR_SIZE;
        let table = &mut self.disk.data[base..];
        match self.geometry.fs_type() {
            FsType::Fat12 => {
                let at = (cluster + cluster / 2) as usize;
                let value = value as u16 & 0x0FFF;
                let mut pair = u16::from_le_bytes([table[at], table[at + 1]]);
                if cluster & 1 != 0 {
                    pair = (pair & 0x000F) | (value << 4);
                } else {
                    pair = (pair & 0xF000) | value;
                }
                table[at..at + 2].copy_from_slice(&pair.to_le_bytes());
            }
            FsType::Fat16 => {
                let at = cluster as usize * 2;
                table[at..at + 2].copy_from_slice(&(value as u16).to_le_bytes());
            }
            FsType::Fat32 => {
                let at = cluster as usize * 4;
                table[at..at + 4].copy_from_slice(&value.to_le_bytes());
            }
        }
    }

    /// Chain `clusters` together, terminating the last one.
    pub fn link(&mut self, clusters: &[u32]) {
        for pair in clusters.windows(2) {
            self.set_entry(pair[0], pair[1]);
        }
        if let Some(&last) = clusters.last() {
            self.set_entry(last, self.geometry.fs_type().end_of_chain());
        }
    }

    /// Contents of `clusters` in order.
    pub fn file_bytes(&self, clusters: &[u32]) -> Vec<u8> {
        let len = self.geometry.cluster_bytes() as usize;
        let mut out = Vec::with_capacity(clusters.len() * len);
        for &cluster in clusters {
            let sector = self.geometry.cluster_to_sector(cluster).expect("data cluster");
            let start = sector as usize * SECTOR_SIZE;
            out.extend_from_slice(&self.disk.data[start..start + len]);
        }
        out
    }

    pub fn into_volume(self, config: StreamConfig) -> Volume<MemDisk> {
        Volume::new(self.disk, self.geometry, config)
    }

    /// The disk with a boot sector describing this image in sector 0.
    pub fn with_boot_sector(mut self) -> MemDisk {
        let g = self.geometry;
        let total = self.disk.sector_count();
        let table_sectors = g.data_base() - g.cluster_table_base();

        let s = &mut self.disk.data[..SECTOR_SIZE];
        s.fill(0);
        s[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
        s[3..11].copy_from_slice(b"MOCKFAT ");
        s[11..13].copy_from_slice(&(SECTOR_SIZE as u16).to_le_bytes());
        s[13] = g.cluster_size() as u8;
        s[14..16].copy_from_slice(&(g.cluster_table_base() as u16).to_le_bytes());
        s[16] = 1;
        if total < 0x1_0000 {
            s[19..21].copy_from_slice(&(total as u16).to_le_bytes());
        } else {
            s[32..36].copy_from_slice(&total.to_le_bytes());
        }
        if g.fs_type() == FsType::Fat32 {
            s[36..40].copy_from_slice(&table_sectors.to_le_bytes());
        } else {
            s[22..24].copy_from_slice(&(table_sectors as u16).to_le_bytes());
        }
        s[510] = 0x55;
        s[511] = 0xAA;
        self.disk
    }
}

// =============================================================================
// Cartridge
// =============================================================================

/// Cartridge memory, bank registers and I/O ports.
///
/// Windows wrap bank numbers modulo the number of banks present. Both
/// memories start out erased (0xFF).
#[derive(Debug, Clone)]
pub struct MockCart {
    pub psram: Vec<u8>,
    pub sram: Vec<u8>,
    pub iram: Vec<u8>,
    banks: [u16; 3],
    flash: bool,
    pub bank_log: Vec<(BankPort, u16)>,
    pub flash_log: Vec<bool>,
    pub ports: [u8; 256],
    /// Every `outb`, in order.
    pub port_log: Vec<(u16, u8)>,
}

impl MockCart {
    pub fn new(psram_banks: u16, sram_banks: u16) -> Self {
        Self {
            psram: vec![0xFF; psram_banks as usize * BANK_SIZE as usize],
            sram: vec![0xFF; sram_banks as usize * BANK_SIZE as usize],
            iram: vec![0; 0x1_0000],
            banks: [0; 3],
            flash: false,
            bank_log: Vec::new(),
            flash_log: Vec::new(),
            ports: [0; 256],
            port_log: Vec::new(),
        }
    }

    /// Banks written to `port`, oldest first.
    pub fn bank_selects(&self, port: BankPort) -> Vec<u16> {
        self.bank_log.iter().filter(|(p, _)| *p == port).map(|&(_, bank)| bank).collect()
    }

    pub fn clear_log(&mut self) {
        self.bank_log.clear();
        self.flash_log.clear();
        self.port_log.clear();
    }

    pub fn psram_bank(&self, bank: u16) -> &[u8] {
        Self::bank_of(&self.psram, bank)
    }

    pub fn psram_bank_mut(&mut self, bank: u16) -> &mut [u8] {
        Self::bank_of_mut(&mut self.psram, bank)
    }

    pub fn sram_bank(&self, bank: u16) -> &[u8] {
        Self::bank_of(&self.sram, bank)
    }

    pub fn sram_bank_mut(&mut self, bank: u16) -> &mut [u8] {
        Self::bank_of_mut(&mut self.sram, bank)
    }

    /// Values written to `port`, oldest first.
    pub fn port_writes(&self, port: u16) -> Vec<u8> {
        self.port_log.iter().filter(|(p, _)| *p == port).map(|&(_, value)| value).collect()
    }

    fn slot(port: BankPort) -> usize {
        match port {
            BankPort::Ram => 0,
            BankPort::Rom0 => 1,
            BankPort::Rom1 => 2,
        }
    }

    fn bank_range(memory_len: usize, bank: u16) -> core::ops::Range<usize> {
        let banks = memory_len / BANK_SIZE as usize;
        let start = (bank as usize % banks) * BANK_SIZE as usize;
        start..start + BANK_SIZE as usize
    }

    fn bank_of(memory: &[u8], bank: u16) -> &[u8] {
        &memory[Self::bank_range(memory.len(), bank)]
    }

    fn bank_of_mut(memory: &mut [u8], bank: u16) -> &mut [u8] {
        let range = Self::bank_range(memory.len(), bank);
        &mut memory[range]
    }
}

impl BankedMemory for MockCart {
    fn bank(&self, port: BankPort) -> u16 {
        self.banks[Self::slot(port)]
    }

    fn set_bank(&mut self, port: BankPort, bank: u16) {
        self.banks[Self::slot(port)] = bank;
        self.bank_log.push((port, bank));
    }

    fn flash_enabled(&self) -> bool {
        self.flash
    }

    fn set_flash_enabled(&mut self, enabled: bool) {
        self.flash = enabled;
        self.flash_log.push(enabled);
    }

    fn window(&mut self, port: BankPort) -> &mut [u8] {
        let bank = self.bank(port);
        match port {
            BankPort::Ram if !self.flash => Self::bank_of_mut(&mut self.sram, bank),
            _ => Self::bank_of_mut(&mut self.psram, bank),
        }
    }
}

impl Ports for MockCart {
    fn inb(&mut self, port: u16) -> u8 {
        if port == IO_LCD_LINE {
            return VBLANK_LINE;
        }
        self.ports[port as usize & 0xFF]
    }

    fn outb(&mut self, port: u16, value: u8) {
        self.ports[port as usize & 0xFF] = value;
        self.port_log.push((port, value));
    }
}

// =============================================================================
// Streams
// =============================================================================

/// Read stream over a byte slice.
pub struct SliceStream<'a> {
    data: &'a [u8],
    pos: usize,
    /// Fail any read that would go past this offset.
    pub fail_after: Option<usize>,
}

impl<'a> SliceStream<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            fail_after: None,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }
}

impl ReadStream for SliceStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        let end = self.pos + buf.len();
        if end > self.data.len() || self.fail_after.is_some_and(|limit| end > limit) {
            return Err(DEVICE_FAULT);
        }
        buf.copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(())
    }
}

impl Seek for SliceStream<'_> {
    fn seek(&mut self, pos: u32) -> Result<()> {
        if pos as usize > self.data.len() {
            return Err(Error::Integrity);
        }
        self.pos = pos as usize;
        Ok(())
    }
}

/// Write stream collecting into a vector.
#[derive(Debug, Default)]
pub struct VecSink {
    pub data: Vec<u8>,
    /// Fail any write that would grow `data` past this length.
    pub fail_after: Option<usize>,
}

impl WriteStream for VecSink {
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        if self.fail_after.is_some_and(|limit| self.data.len() + buf.len() > limit) {
            return Err(DEVICE_FAULT);
        }
        self.data.extend_from_slice(buf);
        Ok(())
    }
}
