//! System and cartridge I/O ports used by the loader.

use bitflags::bitflags;

// =============================================================================
// System ports
// =============================================================================

pub const IO_DISPLAY_CTRL: u16 = 0x00;
pub const IO_LCD_LINE: u16 = 0x02;
pub const IO_LCD_SEG: u16 = 0x15;
pub const IO_SYSTEM_CTRL1: u16 = 0xA0;
pub const IO_HWINT_ACK: u16 = 0xB6;

/// LCD line reported at the start of vertical blank.
pub const VBLANK_LINE: u8 = 144;

pub const LCD_SEG_ORIENT_V: u8 = 0x02;
pub const LCD_SEG_ORIENT_H: u8 = 0x04;

/// Cartridge bus width and wait-state bits of SYSTEM_CTRL1.
pub const SYSTEM_CTRL1_BUS_MASK: u8 = 0x0C;

// =============================================================================
// Cartridge ports
// =============================================================================

pub const IO_CART_FLASH: u16 = 0xCE;
pub const IO_BANK_RAM: u16 = 0xD0;
pub const IO_BANK_ROM0: u16 = 0xD2;
pub const IO_BANK_ROM1: u16 = 0xD4;

pub const IO_NILE_POW_CNT: u16 = 0xE2;
pub const IO_NILE_EMU_CNT: u16 = 0xE3;
pub const IO_NILE_SEG_MASK: u16 = 0xE4;

/// Fixed ROM-space bits of SEG_MASK; the bank mask lives in bits 0-8.
pub const SEG_MASK_ROM_FIXED: u16 = 0x7 << 9;
/// Largest ROM bank count SEG_MASK can describe.
pub const MAX_ROM_BANKS: u16 = 512;
/// Largest SRAM bank mask SEG_MASK can describe (bits 12-15).
pub const MAX_SRAM_MASK: u8 = 0x0F;

bitflags! {
    /// Cartridge power and register-enable control (POW_CNT).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct PowCnt: u8 {
        const CLOCK = 0x01;
        const TF = 0x02;
        const IO_NILE = 0x04;
        /// EEPROM interface at port 0x2001
        const IO_2001 = 0x08;
        /// Bandai 2003 mapper registers
        const IO_2003 = 0x10;
        const ROM = 0x20;
        const SRAM = 0x40;
        const MCU_RESET = 0x80;
    }
}

/// EMU_CNT values for EEPROM emulation.
pub const EMU_EEPROM_NONE: u8 = 0x00;
pub const EMU_EEPROM_128B: u8 = 0x01;
pub const EMU_EEPROM_1KB: u8 = 0x02;
pub const EMU_EEPROM_2KB: u8 = 0x03;

/// Build the SEG_MASK value for `rom_banks` ROM banks and an SRAM bank mask.
///
/// `rom_banks` must be in `1..=MAX_ROM_BANKS`.
pub const fn seg_mask(rom_banks: u16, sram_mask: u8) -> u16 {
    SEG_MASK_ROM_FIXED | (rom_banks.wrapping_sub(1) & 0x1FF) | ((sram_mask as u16 & 0x0F) << 12)
}
