//! Soft-reset vector patch for Athena/Freya OS images.
//!
//! The patch code is installed just below the image footer in the last
//! bank, and the footer's reset jump is pointed at it. The previous jump
//! target is saved into the boot descriptor, where the patch finds it.

use log::{debug, warn};

use bootcore::banked::BankScope;
use bootcore::boot_info::OFF_START_POINTER;
use bootcore::{BankPort, BootDescriptor, Error, FarPtr, ImageLayout, Result};

use crate::Hardware;

/// Area that must be erased for the patch to be installed.
const FREE_AREA: core::ops::Range<usize> = 0xFF80..0xFFC0;

const PATCH_START: usize = 0xFFC8;
const PATCH_LIMIT: usize = 0xFFF0;

/// Footer jump operands: offset word, then segment word.
const RESET_VECTOR: usize = 0xFFF1;

const PATCH_SEGMENT: u16 = 0xF000;

/// Install the soft-reset patch into the image's last bank.
///
/// Returns the reset target the footer pointed at before, or `None` when
/// the area below the footer is in use and the image is left alone.
pub fn apply_soft_reset_patch<H: Hardware + ?Sized>(hw: &mut H, layout: &ImageLayout) -> Result<Option<FarPtr>> {
    let code = hw.soft_reset_patch();
    if code.len() > PATCH_LIMIT - PATCH_START {
        return Err(Error::FileTooLarge);
    }

    let saved = {
        let mut scope = BankScope::new(hw, BankPort::Ram).with_flash(true);
        scope.set_bank(BankPort::Ram, layout.last_bank());
        let window = scope.window(BankPort::Ram);

        if window[FREE_AREA].iter().any(|&b| b != 0xFF) {
            warn!("patch: area below footer in use, soft reset not patched");
            return Ok(None);
        }

        window[PATCH_START..PATCH_START + code.len()].copy_from_slice(code);
        let vector = &mut window[RESET_VECTOR..RESET_VECTOR + 4];
        let saved = FarPtr::from_bytes([vector[0], vector[1], vector[2], vector[3]]);
        vector.copy_from_slice(&FarPtr::new(PATCH_SEGMENT, PATCH_START as u16).to_bytes());
        saved
    };

    hw.write_iram(BootDescriptor::ADDRESS + OFF_START_POINTER as u16, &saved.to_bytes());
    debug!("patch: soft reset installed, chaining to {}", saved);
    Ok(Some(saved))
}
