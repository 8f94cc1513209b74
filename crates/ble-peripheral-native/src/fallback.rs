//! Radio for platforms without a BLE peripheral backend

use ble_peripheral_core::{
    AdvertisementConfig, PeripheralError, RadioCapability, RadioEventSender, RadioInfo, Result,
};
use tracing::warn;

// ----------------------------------------------------------------------------
// Fallback Implementation
// ----------------------------------------------------------------------------

/// Resolves to `Unsupported` and refuses every radio operation
#[derive(Debug, Clone)]
pub struct UnsupportedRadio {
    reason: String,
}

impl UnsupportedRadio {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Describe the build target as the reason
    pub fn for_platform() -> Self {
        let reason = if cfg!(target_os = "linux") {
            "BLE peripheral support on Linux requires the `bluez` feature".to_string()
        } else {
            format!(
                "BLE peripheral mode is not supported on {}",
                std::env::consts::OS
            )
        };
        Self::new(reason)
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    fn unsupported(&self) -> PeripheralError {
        PeripheralError::Unsupported {
            reason: self.reason.clone(),
        }
    }
}

impl Default for UnsupportedRadio {
    fn default() -> Self {
        Self::for_platform()
    }
}

#[async_trait::async_trait]
impl RadioCapability for UnsupportedRadio {
    async fn resolve_default_radio(&self) -> Result<RadioInfo> {
        warn!("{}", self.reason);
        Err(self.unsupported())
    }

    async fn start_advertising(&self, _advertisement: &AdvertisementConfig) -> Result<()> {
        Err(self.unsupported())
    }

    async fn stop_advertising(&self) -> Result<()> {
        Ok(())
    }

    async fn start_scan(&self, _events: RadioEventSender) -> Result<()> {
        Err(self.unsupported())
    }

    async fn stop_scan(&self) -> Result<()> {
        Ok(())
    }
}
