//! # bootcore
//!
//! Shared abstractions for the cartridge boot loader.
//!
//! Both the menu-side launcher and the second-stage stub link this crate:
//! the sector window, the cluster walker, the contiguous-run stream and the
//! banked copy routines exist exactly once and are driven from both sides of
//! the boot handoff.

#![cfg_attr(not(any(test, feature = "mock")), no_std)]

pub mod error;
pub mod traits;
pub mod regs;
pub mod geometry;
pub mod window;
pub mod volume;
pub mod fat;
pub mod stream;
pub mod banked;
pub mod layout;
pub mod boot_info;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::{Error, Result};
pub use traits::*;
pub use geometry::{FsType, VolumeGeometry};
pub use volume::{StreamConfig, Volume};
pub use stream::{ClusterStream, ReadStream, Seek, WriteStream};
pub use banked::{BankedAddr, FarPtr, NoProgress, Progress};
pub use layout::ImageLayout;
pub use boot_info::BootDescriptor;
