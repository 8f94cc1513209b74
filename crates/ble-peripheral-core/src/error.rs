//! Error types for the peripheral session manager

use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors surfaced by the codec, the sessions and the controller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeripheralError {
    #[error("Bluetooth radio unavailable: {reason}")]
    RadioUnavailable { reason: String },

    #[error("Manufacturer payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Advertisement data too large: {size} bytes (max: {max})")]
    AdvertisementTooLarge { size: usize, max: usize },

    #[error("Malformed manufacturer data: {len} bytes, need at least 2 for the company id")]
    MalformedData { len: usize },

    #[error("BLE peripheral mode not supported: {reason}")]
    Unsupported { reason: String },

    #[error("Radio backend error: {0}")]
    Radio(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Peripheral service has shut down")]
    ServiceClosed,

    #[error("Timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
}

impl PeripheralError {
    /// Shorthand for [`PeripheralError::RadioUnavailable`]
    pub fn radio_unavailable(reason: impl Into<String>) -> Self {
        Self::RadioUnavailable {
            reason: reason.into(),
        }
    }
}

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, PeripheralError>;
