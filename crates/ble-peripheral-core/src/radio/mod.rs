//! Radio capability seam
//!
//! Everything the OS Bluetooth stack does for us sits behind
//! [`RadioCapability`]. Production implementations live in
//! `ble-peripheral-native`; [`SimulatedRadio`] backs tests and demos.

pub mod simulated;

pub use simulated::{RadioCall, SimulatedRadio};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

use crate::advertisement::AdvertisementConfig;
use crate::error::Result;

// ----------------------------------------------------------------------------
// Radio Types
// ----------------------------------------------------------------------------

/// Default radio as resolved during initialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioInfo {
    /// Adapter name as reported by the OS
    pub name: String,
    /// Adapter address, when the OS exposes it
    pub address: Option<u64>,
    /// Whether the radio was powered on at resolution time
    pub powered: bool,
    /// Whether the adapter can act as an advertising peripheral
    pub peripheral_role_supported: bool,
}

impl RadioInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
            powered: true,
            peripheral_role_supported: true,
        }
    }

    pub fn with_address(mut self, address: u64) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_powered(mut self, powered: bool) -> Self {
        self.powered = powered;
        self
    }

    pub fn with_peripheral_role(mut self, supported: bool) -> Self {
        self.peripheral_role_supported = supported;
        self
    }
}

/// One received advertisement, as handed over by the radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAdvertisement {
    /// 48-bit device address in the low bits
    pub address: u64,
    /// Advertised local name; empty when absent
    pub local_name: String,
    /// First manufacturer-specific section body (company id LE + payload);
    /// empty when absent, possibly malformed
    pub manufacturer_data: Vec<u8>,
    /// Received signal strength in dBm
    pub rssi: i16,
}

impl RawAdvertisement {
    pub fn new(address: u64, rssi: i16) -> Self {
        Self {
            address,
            local_name: String::new(),
            manufacturer_data: Vec::new(),
            rssi,
        }
    }

    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = name.into();
        self
    }

    pub fn with_manufacturer_data(mut self, raw: impl Into<Vec<u8>>) -> Self {
        self.manufacturer_data = raw.into();
        self
    }
}

/// Thread-safe handle radio callbacks use to enqueue received advertisements
///
/// Delivery never blocks: OS callback threads cannot await, so a full
/// queue drops the advertisement.
#[derive(Debug, Clone)]
pub struct RadioEventSender {
    tx: mpsc::Sender<RawAdvertisement>,
}

impl RadioEventSender {
    pub(crate) fn new(tx: mpsc::Sender<RawAdvertisement>) -> Self {
        Self { tx }
    }

    /// Enqueue an advertisement; `false` if it was dropped
    pub fn deliver(&self, advertisement: RawAdvertisement) -> bool {
        match self.tx.try_send(advertisement) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(adv)) => {
                trace!("Radio event queue full, dropping advertisement from {:x}", adv.address);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// The controller is gone and nothing will consume further events
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ----------------------------------------------------------------------------
// Radio Capability Trait
// ----------------------------------------------------------------------------

/// OS Bluetooth radio as seen by the controller
#[async_trait::async_trait]
pub trait RadioCapability: Send + Sync {
    /// Resolve the default adapter and its radio
    async fn resolve_default_radio(&self) -> Result<RadioInfo>;

    /// Begin advertising `advertisement`, already validated against the
    /// legacy PDU budget
    ///
    /// Absent fields produce no AD structure. Called again while
    /// advertising only when [`supports_live_update`] is true.
    ///
    /// [`supports_live_update`]: RadioCapability::supports_live_update
    async fn start_advertising(&self, advertisement: &AdvertisementConfig) -> Result<()>;

    /// Stop advertising; succeeds when nothing is being advertised
    async fn stop_advertising(&self) -> Result<()>;

    /// Start watching for advertisements, pushing each into `events`
    async fn start_scan(&self, events: RadioEventSender) -> Result<()>;

    /// Stop watching for advertisements
    async fn stop_scan(&self) -> Result<()>;

    /// Whether `start_advertising` can replace data on a running advertisement
    fn supports_live_update(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_sender_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let sender = RadioEventSender::new(tx);

        assert!(sender.deliver(RawAdvertisement::new(1, -40)));
        assert!(!sender.deliver(RawAdvertisement::new(2, -41)));
        assert_eq!(rx.try_recv().map(|a| a.address).ok(), Some(1));
    }

    #[test]
    fn test_event_sender_reports_closed() {
        let (tx, rx) = mpsc::channel(1);
        let sender = RadioEventSender::new(tx);
        drop(rx);
        assert!(sender.is_closed());
        assert!(!sender.deliver(RawAdvertisement::new(1, -40)));
    }

    #[test]
    fn test_event_sender_is_usable_from_other_threads() {
        let (tx, mut rx) = mpsc::channel(8);
        let sender = RadioEventSender::new(tx);

        let handles: Vec<_> = (0..4u64)
            .map(|i| {
                let sender = sender.clone();
                std::thread::spawn(move || sender.deliver(RawAdvertisement::new(i, -50)))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }

        let mut seen = Vec::new();
        while let Ok(adv) = rx.try_recv() {
            seen.push(adv.address);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }
}
