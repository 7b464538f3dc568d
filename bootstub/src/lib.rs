//! # bootstub
//!
//! Second boot stage. Runs from internal RAM after the menu has handed
//! over: reads the boot descriptor, streams the image into PSRAM, puts the
//! cartridge into the state the image expects and cold-jumps into it.

#![cfg_attr(not(test), no_std)]

pub mod hardware;
pub mod patch;
pub mod boot;

pub use bootcore::{Error, Result};
pub use boot::{boot, configure_cartridge, load_image, read_descriptor, run};
pub use hardware::Hardware;
pub use patch::apply_soft_reset_patch;
