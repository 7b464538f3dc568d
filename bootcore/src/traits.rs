//! Hardware abstraction traits.
//!
//! These traits are the seams between the loader logic and the cartridge:
//! the storage driver, the bank-select registers with the memory windows
//! behind them, and raw I/O port access.

use crate::Result;

/// Physical sector size in bytes. Only 512-byte media are supported.
pub const SECTOR_SIZE: usize = 512;

/// Size of one memory bank as seen through a window.
pub const BANK_SIZE: u32 = 0x1_0000;

/// Block device interface (TF card behind the cartridge SPI bus).
pub trait BlockDevice {
    /// Read `count` consecutive sectors starting at `lba`.
    ///
    /// `buffer` is exactly `count * SECTOR_SIZE` bytes long.
    fn read_sectors(&mut self, lba: u32, count: u32, buffer: &mut [u8]) -> Result<()>;

    /// Write `count` consecutive sectors starting at `lba`.
    fn write_sectors(&mut self, lba: u32, count: u32, buffer: &[u8]) -> Result<()>;
}

impl<D: BlockDevice + ?Sized> BlockDevice for &mut D {
    fn read_sectors(&mut self, lba: u32, count: u32, buffer: &mut [u8]) -> Result<()> {
        (**self).read_sectors(lba, count, buffer)
    }

    fn write_sectors(&mut self, lba: u32, count: u32, buffer: &[u8]) -> Result<()> {
        (**self).write_sectors(lba, count, buffer)
    }
}

/// Cartridge bank-select registers, one per memory window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BankPort {
    /// Segment 0x1000: SRAM, or PSRAM while flash writes are enabled.
    Ram,
    /// Segment 0x2000: first ROM window.
    Rom0,
    /// Segment 0x3000: second ROM window.
    Rom1,
}

impl BankPort {
    /// 16-bit I/O port of the bank register.
    pub const fn io_port(self) -> u16 {
        match self {
            BankPort::Ram => crate::regs::IO_BANK_RAM,
            BankPort::Rom0 => crate::regs::IO_BANK_ROM0,
            BankPort::Rom1 => crate::regs::IO_BANK_ROM1,
        }
    }

    /// CPU segment the window is mapped at.
    pub const fn segment(self) -> u16 {
        match self {
            BankPort::Ram => 0x1000,
            BankPort::Rom0 => 0x2000,
            BankPort::Rom1 => 0x3000,
        }
    }
}

/// Banked memory windows.
///
/// Each window shows one 64 KiB bank of the cartridge address space; which
/// bank is visible is a global hardware register. Callers that change a
/// register must put it back (see [`crate::banked::BankScope`]).
pub trait BankedMemory {
    /// Currently selected bank of `port`.
    fn bank(&self, port: BankPort) -> u16;

    /// Select `bank` in `port`.
    fn set_bank(&mut self, port: BankPort, bank: u16);

    /// Whether the RAM window currently maps writable PSRAM.
    fn flash_enabled(&self) -> bool;

    /// Toggle PSRAM/flash writes through the RAM window.
    fn set_flash_enabled(&mut self, enabled: bool);

    /// The 64 KiB window behind `port`.
    fn window(&mut self, port: BankPort) -> &mut [u8];
}

/// Raw I/O port access.
pub trait Ports {
    /// Read an 8-bit port.
    fn inb(&mut self, port: u16) -> u8;

    /// Write an 8-bit port.
    fn outb(&mut self, port: u16, value: u8);

    /// Read a 16-bit port pair (low byte first).
    fn inw(&mut self, port: u16) -> u16 {
        let lo = self.inb(port);
        let hi = self.inb(port.wrapping_add(1));
        u16::from_le_bytes([lo, hi])
    }

    /// Write a 16-bit port pair (low byte first).
    fn outw(&mut self, port: u16, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.outb(port, lo);
        self.outb(port.wrapping_add(1), hi);
    }
}
