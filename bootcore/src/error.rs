//! Loader error type.
//!
//! One enum covers every fallible step of both boot stages. `code()` maps
//! each variant onto the numeric status the menu shows to the user, which
//! keeps the storage driver's FAT result codes and the menu's own codes in
//! one numbering space.

use thiserror::Error;

/// Result type for loader operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Loader error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// The storage device reported a failure; carries the driver's code.
    #[error("storage device error {0:#04x}")]
    Device(u8),

    /// A cluster number outside `[2, fat_entry_count)` was looked up.
    #[error("cluster {0} is outside the allocation table")]
    InvalidCluster(u32),

    /// The cluster chain points at a free, reserved or unmappable entry.
    #[error("cluster chain is corrupt")]
    Integrity,

    /// No FAT boot sector was found where one was expected.
    #[error("no FAT filesystem found")]
    NoFilesystem,

    /// Volume geometry fields contradict each other.
    #[error("volume geometry is inconsistent")]
    InvalidGeometry,

    /// The image does not fit the banked execution window.
    #[error("image is too large")]
    FileTooLarge,

    /// The image footer or a descriptor failed validation.
    #[error("image format is invalid")]
    FormatInvalid,

    /// Save memory contents do not look like a valid image.
    #[error("save data is corrupt")]
    SaveCorrupt,

    /// A progress hook asked for the transfer to stop.
    #[error("transfer cancelled")]
    Cancelled,
}

impl Error {
    /// Numeric status as displayed by the menu's error dialog.
    pub const fn code(&self) -> u8 {
        match self {
            Error::Device(_) => 0x01,
            Error::InvalidCluster(_) | Error::Integrity => 0x02,
            Error::NoFilesystem | Error::InvalidGeometry => 0x0D,
            Error::SaveCorrupt => 0x81,
            Error::FileTooLarge => 0x84,
            Error::FormatInvalid => 0x85,
            Error::Cancelled => 0x87,
        }
    }

    /// Underlying media failure.
    pub const fn is_device(&self) -> bool {
        matches!(self, Error::Device(_))
    }

    /// Corrupt or out-of-range cluster chain.
    pub const fn is_integrity(&self) -> bool {
        matches!(self, Error::InvalidCluster(_) | Error::Integrity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_follow_menu_numbering() {
        assert_eq!(Error::Device(0x42).code(), 0x01);
        assert_eq!(Error::Integrity.code(), 0x02);
        assert_eq!(Error::InvalidCluster(1).code(), 0x02);
        assert_eq!(Error::FileTooLarge.code(), 0x84);
        assert_eq!(Error::FormatInvalid.code(), 0x85);
        assert_eq!(Error::Cancelled.code(), 0x87);
    }

    #[test]
    fn test_classification() {
        assert!(Error::Device(3).is_device());
        assert!(!Error::Device(3).is_integrity());
        assert!(Error::InvalidCluster(0).is_integrity());
        assert!(!Error::FormatInvalid.is_device());
    }

    #[test]
    fn test_display() {
        assert_eq!(Error::Device(0x0A).to_string(), "storage device error 0x0a");
        assert_eq!(
            Error::InvalidCluster(7).to_string(),
            "cluster 7 is outside the allocation table"
        );
    }
}
