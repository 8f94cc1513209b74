//! Operating system radios for the peripheral controller
//!
//! - Linux: BlueZ through `bluer` (advertising) and `btleplug` (scanning),
//!   behind the `bluez` feature
//! - Windows: WinRT advertisement publisher and watcher
//! - Anything else: [`UnsupportedRadio`]

use std::sync::Arc;

use ble_peripheral_core::RadioCapability;

#[cfg(all(target_os = "linux", feature = "bluez"))]
pub mod bluez;
pub mod fallback;
pub mod translate;
#[cfg(target_os = "windows")]
pub mod winrt;

#[cfg(all(target_os = "linux", feature = "bluez"))]
pub use bluez::BluezRadio;
pub use fallback::UnsupportedRadio;
#[cfg(target_os = "windows")]
pub use winrt::WinRtRadio;

// ----------------------------------------------------------------------------
// Platform Detection
// ----------------------------------------------------------------------------

/// Radio backend for the current platform
pub fn default_radio() -> Arc<dyn RadioCapability> {
    #[cfg(all(target_os = "linux", feature = "bluez"))]
    {
        Arc::new(BluezRadio::new())
    }
    #[cfg(target_os = "windows")]
    {
        Arc::new(WinRtRadio::new())
    }
    #[cfg(not(any(all(target_os = "linux", feature = "bluez"), target_os = "windows")))]
    {
        Arc::new(UnsupportedRadio::for_platform())
    }
}

/// Name of the backend `default_radio` picks
pub fn backend_name() -> &'static str {
    if cfg!(all(target_os = "linux", feature = "bluez")) {
        "bluez"
    } else if cfg!(target_os = "windows") {
        "winrt"
    } else {
        "unsupported"
    }
}
