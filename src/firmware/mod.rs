// Firmware module - image service and flashing driver interfaces

mod flasher;
mod service;

pub use flasher::{FlashDriver, FlashTarget, ProgressFn};
pub use service::{DeviceFamily, FirmwareError, FirmwareService};
