// Flashing driver interface
// The byte-level bootloader protocol is opaque to this core. The driver
// receives exclusive use of the raw device (by path), the image, and the
// target's native id, and reports progress until completion or error.

use super::service::FirmwareError;

/// Exclusive handle to the raw device being flashed.
///
/// Precondition: the owning endpoint has closed its transport handle and
/// paused the acceptor for that kind before handing this out.
/// Postcondition: after the final progress report (error or complete), the
/// driver no longer touches the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashTarget {
    SerialPath(String),
    UsbPath(String),
}

/// Progress report: optional error, progress fraction in [0, 1], and a
/// completion flag. An error implies `complete == false`.
pub type ProgressFn = Box<dyn Fn(Option<FirmwareError>, f64, bool) + Send + Sync>;

/// Transport-specific flashing routine.
pub trait FlashDriver: Send + Sync {
    fn upgrade(&self, target: FlashTarget, image: Vec<u8>, node_id: u16, progress: ProgressFn);
}
