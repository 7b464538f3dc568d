//! # launcher
//!
//! First boot stage, running inside the menu.
//!
//! Reads an image's metadata, moves save data between storage and the
//! cartridge, and hands the boot over to the second stage through the
//! boot descriptor.

#![cfg_attr(not(test), no_std)]

pub mod metadata;
pub mod savedata;
pub mod handoff;

pub use bootcore::{Error, Result};
pub use handoff::{launch, Handoff, LaunchConfig, Platform, RomImage, StubImage};
pub use metadata::{RomFooter, RomKind, RomMetadata};
pub use savedata::{restore_save_data, SaveFile};
