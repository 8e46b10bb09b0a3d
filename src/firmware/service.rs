// Firmware image service interface
// Image storage and retrieval live outside the core; the endpoint only
// needs an asynchronous fetch keyed by device family.

use async_trait::async_trait;
use thiserror::Error;

/// The device families this manager can fetch firmware for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DeviceFamily {
    Robot2,
}

/// Firmware-upgrade failures, reported through the progress callback.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FirmwareError {
    #[error("Failed to fetch firmware image: {0}")]
    FetchFailed(String),

    #[error("Firmware image is empty or invalid")]
    InvalidImage,

    #[error("Flashing failed: {0}")]
    FlashFailed(String),
}

/// Asynchronous source of firmware images.
#[async_trait]
pub trait FirmwareService: Send + Sync {
    async fn firmware_data(&self, family: DeviceFamily) -> Result<Vec<u8>, FirmwareError>;
}
