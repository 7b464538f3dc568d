//! Banked-window copy primitives.
//!
//! The cartridge address space is only reachable 64 KiB at a time through a
//! bank-select register. The routines here move a byte range between a
//! stream and that space one 32 KiB chunk at a time, selecting each bank as
//! the transfer enters it.
//!
//! | variant             | window | flash enable | direction       |
//! |---------------------|--------|--------------|-----------------|
//! | [`read_sram_banked`]  | RAM    | off          | stream -> SRAM  |
//! | [`read_psram_banked`] | RAM    | on           | stream -> PSRAM |
//! | [`write_sram_banked`] | RAM    | off          | SRAM -> stream  |
//! | [`write_rom_banked`]  | ROM0   | untouched    | ROM -> stream   |
//!
//! Every register touched is put back when the copy returns, whether it
//! succeeded or not.

use core::ops::{ControlFlow, Deref, DerefMut};

use log::trace;

use crate::{BankPort, BankedMemory, Error, ReadStream, Result, WriteStream};

/// Bytes moved between two progress reports.
pub const CHUNK_SIZE: u32 = 0x8000;

// =============================================================================
// Addresses
// =============================================================================

/// A location in banked memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BankedAddr {
    pub bank: u16,
    pub offset: u16,
}

impl BankedAddr {
    pub const fn new(bank: u16, offset: u16) -> Self {
        Self { bank, offset }
    }

    /// Address `linear` bytes into the banked space.
    pub const fn from_linear(linear: u32) -> Self {
        Self {
            bank: (linear >> 16) as u16,
            offset: linear as u16,
        }
    }

    pub const fn linear(self) -> u32 {
        ((self.bank as u32) << 16) | self.offset as u32
    }

    /// CPU pointer to this address once `self.bank` is selected in `port`.
    pub const fn far_ptr(self, port: BankPort) -> FarPtr {
        FarPtr::new(port.segment(), self.offset)
    }
}

/// Real-mode segment:offset pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FarPtr {
    pub segment: u16,
    pub offset: u16,
}

impl FarPtr {
    pub const fn new(segment: u16, offset: u16) -> Self {
        Self { segment, offset }
    }

    /// 20-bit physical address.
    pub const fn linear(self) -> u32 {
        (((self.segment as u32) << 4) + self.offset as u32) & 0xF_FFFF
    }

    /// In-memory layout: offset word, then segment word.
    pub const fn to_bytes(self) -> [u8; 4] {
        let [o0, o1] = self.offset.to_le_bytes();
        let [s0, s1] = self.segment.to_le_bytes();
        [o0, o1, s0, s1]
    }

    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Self {
            offset: u16::from_le_bytes([bytes[0], bytes[1]]),
            segment: u16::from_le_bytes([bytes[2], bytes[3]]),
        }
    }
}

impl core::fmt::Display for FarPtr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:04X}:{:04X}", self.segment, self.offset)
    }
}

// =============================================================================
// Progress
// =============================================================================

/// Per-chunk progress hook.
///
/// Called after every chunk with the bytes moved so far and the total.
/// Returning `Break` stops the copy with [`Error::Cancelled`]; this is the
/// only point where a long copy can observe user input.
pub trait Progress {
    fn chunk_done(&mut self, done: u32, total: u32) -> ControlFlow<()>;
}

/// No progress reporting.
pub struct NoProgress;

impl Progress for NoProgress {
    #[inline(always)]
    fn chunk_done(&mut self, _done: u32, _total: u32) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }
}

impl<F: FnMut(u32, u32) -> ControlFlow<()>> Progress for F {
    fn chunk_done(&mut self, done: u32, total: u32) -> ControlFlow<()> {
        self(done, total)
    }
}

// =============================================================================
// Register scope
// =============================================================================

/// Saves a bank register (and optionally the flash enable) and restores
/// them when dropped.
pub struct BankScope<'m, M: BankedMemory + ?Sized> {
    memory: &'m mut M,
    port: BankPort,
    saved_bank: u16,
    saved_flash: Option<bool>,
}

impl<'m, M: BankedMemory + ?Sized> BankScope<'m, M> {
    pub fn new(memory: &'m mut M, port: BankPort) -> Self {
        let saved_bank = memory.bank(port);
        Self {
            memory,
            port,
            saved_bank,
            saved_flash: None,
        }
    }

    /// Also force the flash enable to `enabled` for the scope's lifetime.
    pub fn with_flash(mut self, enabled: bool) -> Self {
        if self.saved_flash.is_none() {
            self.saved_flash = Some(self.memory.flash_enabled());
        }
        self.memory.set_flash_enabled(enabled);
        self
    }
}

impl<M: BankedMemory + ?Sized> Deref for BankScope<'_, M> {
    type Target = M;

    fn deref(&self) -> &M {
        self.memory
    }
}

impl<M: BankedMemory + ?Sized> DerefMut for BankScope<'_, M> {
    fn deref_mut(&mut self) -> &mut M {
        self.memory
    }
}

impl<M: BankedMemory + ?Sized> Drop for BankScope<'_, M> {
    fn drop(&mut self) {
        self.memory.set_bank(self.port, self.saved_bank);
        if let Some(flash) = self.saved_flash {
            self.memory.set_flash_enabled(flash);
        }
    }
}

// =============================================================================
// Copy primitives
// =============================================================================

/// Stream `len` bytes into SRAM starting at `start`.
pub fn read_sram_banked<S, M, P>(stream: &mut S, memory: &mut M, start: BankedAddr, len: u32, progress: &mut P) -> Result<()>
where
    S: ReadStream + ?Sized,
    M: BankedMemory + ?Sized,
    P: Progress + ?Sized,
{
    if len == 0 {
        return Ok(());
    }
    let mut scope = BankScope::new(memory, BankPort::Ram).with_flash(false);
    copy_chunks(&mut *scope, BankPort::Ram, start, len, progress, |window| stream.read(window))
}

/// Stream `len` bytes into cartridge PSRAM starting at `start`.
pub fn read_psram_banked<S, M, P>(stream: &mut S, memory: &mut M, start: BankedAddr, len: u32, progress: &mut P) -> Result<()>
where
    S: ReadStream + ?Sized,
    M: BankedMemory + ?Sized,
    P: Progress + ?Sized,
{
    if len == 0 {
        return Ok(());
    }
    let mut scope = BankScope::new(memory, BankPort::Ram).with_flash(true);
    copy_chunks(&mut *scope, BankPort::Ram, start, len, progress, |window| stream.read(window))
}

/// Write `len` bytes of SRAM starting at `start` to the stream.
pub fn write_sram_banked<S, M, P>(stream: &mut S, memory: &mut M, start: BankedAddr, len: u32, progress: &mut P) -> Result<()>
where
    S: WriteStream + ?Sized,
    M: BankedMemory + ?Sized,
    P: Progress + ?Sized,
{
    if len == 0 {
        return Ok(());
    }
    let mut scope = BankScope::new(memory, BankPort::Ram).with_flash(false);
    copy_chunks(&mut *scope, BankPort::Ram, start, len, progress, |window| stream.write(window))
}

/// Write `len` bytes of ROM space starting at `start` to the stream.
pub fn write_rom_banked<S, M, P>(stream: &mut S, memory: &mut M, start: BankedAddr, len: u32, progress: &mut P) -> Result<()>
where
    S: WriteStream + ?Sized,
    M: BankedMemory + ?Sized,
    P: Progress + ?Sized,
{
    if len == 0 {
        return Ok(());
    }
    let mut scope = BankScope::new(memory, BankPort::Rom0);
    copy_chunks(&mut *scope, BankPort::Rom0, start, len, progress, |window| stream.write(window))
}

/// Walk `start..start + len` in chunks that never cross a 32 KiB boundary,
/// selecting each bank on entry and handing the window slice to `transfer`.
fn copy_chunks<M, P, F>(memory: &mut M, port: BankPort, start: BankedAddr, len: u32, progress: &mut P, mut transfer: F) -> Result<()>
where
    M: BankedMemory + ?Sized,
    P: Progress + ?Sized,
    F: FnMut(&mut [u8]) -> Result<()>,
{
    let first = start.linear();
    let end = first.checked_add(len).ok_or(Error::FileTooLarge)?;

    let mut addr = first;
    let mut selected = None;
    while addr < end {
        let here = BankedAddr::from_linear(addr);
        if selected != Some(here.bank) {
            trace!("banked: {:?} bank {:#06x}", port, here.bank);
            memory.set_bank(port, here.bank);
            selected = Some(here.bank);
        }

        let chunk_end = (addr / CHUNK_SIZE + 1) * CHUNK_SIZE;
        let n = chunk_end.min(end) - addr;
        let offset = here.offset as usize;
        transfer(&mut memory.window(port)[offset..offset + n as usize])?;
        addr += n;

        // Nothing is left to cancel after the last chunk
        if progress.chunk_done(addr - first, len).is_break() && addr < end {
            return Err(Error::Cancelled);
        }
    }
    Ok(())
}
