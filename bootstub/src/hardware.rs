//! Hardware seam of the second stage.

use bootcore::{BankedMemory, Error, FarPtr, Ports};

/// Everything the second stage touches besides the storage device.
pub trait Hardware: Ports + BankedMemory {
    /// Copy internal RAM at `address` into `buf`.
    fn read_iram(&mut self, address: u16, buf: &mut [u8]);

    /// Copy `bytes` into internal RAM at `address`.
    fn write_iram(&mut self, address: u16, bytes: &[u8]);

    /// Deselect the storage device and drop the bus to cartridge speed.
    fn release_storage(&mut self);

    /// Put the system I/O registers back into their power-on state.
    fn restore_cold_boot_state(&mut self, disable_color: bool);

    /// Code installed by the soft-reset patch.
    fn soft_reset_patch(&self) -> &'static [u8] {
        &[]
    }

    /// Jump to `target` with the registers the boot ROM would leave.
    fn cold_jump(&mut self, target: FarPtr) -> !;

    /// Show `error` and stop.
    fn halt_with_error(&mut self, error: Error) -> !;
}
