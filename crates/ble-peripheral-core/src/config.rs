//! Peripheral controller configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Legacy advertising PDU payload (31) minus AD header (2) minus company id (2)
pub const DEFAULT_MAX_MANUFACTURER_PAYLOAD: usize = 27;

/// Configuration for the peripheral controller and its sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeripheralConfig {
    /// Maximum manufacturer payload accepted by `start`, excluding the company id
    pub max_manufacturer_payload: usize,
    /// Capacity of the queue carrying radio events into the command context
    pub radio_event_queue: usize,
    /// Default capacity of scan result streams handed out by the service
    pub scan_sink_capacity: usize,
    /// How long `wait_for_radio` waits for radio resolution
    pub radio_init_timeout_ms: u64,
    /// Stop the radio watch when the last scan subscriber cancels
    pub stop_scan_on_cancel: bool,
    /// Capacity of the service request queue
    pub request_queue: usize,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            max_manufacturer_payload: DEFAULT_MAX_MANUFACTURER_PAYLOAD,
            radio_event_queue: 256,
            scan_sink_capacity: 64,
            radio_init_timeout_ms: 5_000,
            stop_scan_on_cancel: true,
            request_queue: 32,
        }
    }
}

impl PeripheralConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the manufacturer payload budget
    pub fn with_max_manufacturer_payload(mut self, max: usize) -> Self {
        self.max_manufacturer_payload = max;
        self
    }

    /// Set the radio event queue capacity
    pub fn with_radio_event_queue(mut self, capacity: usize) -> Self {
        self.radio_event_queue = capacity;
        self
    }

    /// Set the scan result stream capacity
    pub fn with_scan_sink_capacity(mut self, capacity: usize) -> Self {
        self.scan_sink_capacity = capacity;
        self
    }

    /// Set the radio initialization timeout
    pub fn with_radio_init_timeout(mut self, timeout: Duration) -> Self {
        self.radio_init_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Keep or stop the radio watch when scanning is cancelled
    pub fn with_stop_scan_on_cancel(mut self, enabled: bool) -> Self {
        self.stop_scan_on_cancel = enabled;
        self
    }

    /// Set the service request queue capacity
    pub fn with_request_queue(mut self, capacity: usize) -> Self {
        self.request_queue = capacity;
        self
    }

    pub fn radio_init_timeout(&self) -> Duration {
        Duration::from_millis(self.radio_init_timeout_ms)
    }

    // tokio channels panic on a zero capacity
    pub(crate) fn radio_event_capacity(&self) -> usize {
        self.radio_event_queue.max(1)
    }

    pub(crate) fn request_capacity(&self) -> usize {
        self.request_queue.max(1)
    }

    pub(crate) fn scan_capacity(&self) -> usize {
        self.scan_sink_capacity.max(1)
    }
}
