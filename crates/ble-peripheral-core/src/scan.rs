//! Scan session: turns raw radio advertisements into discovered peripherals

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::codec::{self, ManufacturerData};
use crate::radio::RawAdvertisement;
use crate::sink::{EventSink, PublishError};

// ----------------------------------------------------------------------------
// Discovered Peripheral
// ----------------------------------------------------------------------------

/// A peripheral seen in one received advertisement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredPeripheral {
    pub address: u64,
    pub name: String,
    pub manufacturer_data: Option<ManufacturerData>,
    pub rssi: i16,
}

impl DiscoveredPeripheral {
    /// Build from a raw advertisement
    ///
    /// Manufacturer data that fails to decode is treated as absent.
    pub fn from_raw(raw: RawAdvertisement) -> Self {
        let manufacturer_data = match codec::decode(&raw.manufacturer_data) {
            Ok(data) => Some(data),
            Err(e) => {
                if !raw.manufacturer_data.is_empty() {
                    trace!("Ignoring manufacturer data from {:x}: {}", raw.address, e);
                }
                None
            }
        };
        let name = if raw.local_name.is_empty() {
            fallback_name(raw.address)
        } else {
            raw.local_name
        };
        Self {
            address: raw.address,
            name,
            manufacturer_data,
            rssi: raw.rssi,
        }
    }
}

/// Name used when a peripheral does not advertise one: lowercase hex address
pub fn fallback_name(address: u64) -> String {
    format!("{:x}", address)
}

// ----------------------------------------------------------------------------
// Scan Session
// ----------------------------------------------------------------------------

/// Whether a subscriber is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanState {
    Idle,
    Scanning,
}

/// What happened to one discovered peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// No sink attached; dropped without buffering
    NoSink,
    /// Sink full; dropped
    Backpressure,
    /// Subscriber went away; the session detached itself
    SinkClosed,
}

/// Tracks this consumer's subscription, independent of the radio watch
#[derive(Debug)]
pub struct ScanSession {
    sink: Option<EventSink<DiscoveredPeripheral>>,
}

impl Default for ScanSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanSession {
    pub fn new() -> Self {
        Self { sink: None }
    }

    /// Attach a sink, replacing any previous one
    pub fn listen(&mut self, sink: EventSink<DiscoveredPeripheral>) {
        if self.sink.replace(sink).is_some() {
            debug!("Replaced scan result sink");
        } else {
            debug!("Scan result sink attached");
        }
    }

    /// Detach the sink; idempotent
    pub fn cancel(&mut self) {
        if self.sink.take().is_some() {
            debug!("Scan result sink detached");
        }
    }

    pub fn state(&self) -> ScanState {
        match self.sink {
            Some(_) => ScanState::Scanning,
            None => ScanState::Idle,
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.sink.is_some()
    }

    /// Handle one advertisement handed over from the radio
    pub fn on_peripheral_discovered(&mut self, raw: RawAdvertisement) -> Delivery {
        let Some(sink) = &self.sink else {
            return Delivery::NoSink;
        };
        let peripheral = DiscoveredPeripheral::from_raw(raw);
        let address = peripheral.address;
        match sink.try_publish(peripheral) {
            Ok(()) => {
                trace!("Delivered scan result for {:x}", address);
                Delivery::Delivered
            }
            Err(PublishError::Full) => {
                debug!("Scan result sink full, dropping result for {:x}", address);
                Delivery::Backpressure
            }
            Err(PublishError::Closed) => {
                debug!("Scan result subscriber went away");
                self.sink = None;
                Delivery::SinkClosed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::event_channel;

    fn advertisement(address: u64) -> RawAdvertisement {
        RawAdvertisement::new(address, -60)
    }

    #[test]
    fn test_fallback_name_is_lowercase_hex() {
        assert_eq!(fallback_name(0xAABBCCDDEEFF), "aabbccddeeff");
        assert_eq!(fallback_name(0x0A), "a");
    }

    #[test]
    fn test_from_raw_prefers_local_name() {
        let raw = advertisement(0x1).with_local_name("Thermo");
        assert_eq!(DiscoveredPeripheral::from_raw(raw).name, "Thermo");
    }

    #[test]
    fn test_from_raw_malformed_manufacturer_data_is_absent() {
        let raw = advertisement(0x1).with_manufacturer_data(vec![0x4C]);
        assert_eq!(DiscoveredPeripheral::from_raw(raw).manufacturer_data, None);
    }

    #[test]
    fn test_from_raw_decodes_manufacturer_data() {
        let raw = advertisement(0x1).with_manufacturer_data(vec![0x4C, 0x00, 0x09]);
        assert_eq!(
            DiscoveredPeripheral::from_raw(raw).manufacturer_data,
            Some(ManufacturerData::new(0x004C, vec![0x09]))
        );
    }

    #[test]
    fn test_events_without_sink_are_dropped() {
        let mut session = ScanSession::new();
        assert_eq!(session.on_peripheral_discovered(advertisement(1)), Delivery::NoSink);

        // nothing was buffered for a later subscriber
        let (sink, mut stream) = event_channel(4);
        session.listen(sink);
        assert!(stream.try_recv().is_none());
    }

    #[test]
    fn test_listen_replaces_previous_sink() {
        let mut session = ScanSession::new();
        let (sink_a, mut stream_a) = event_channel(4);
        let (sink_b, mut stream_b) = event_channel(4);

        session.listen(sink_a);
        session.listen(sink_b);
        assert_eq!(session.on_peripheral_discovered(advertisement(7)), Delivery::Delivered);

        assert!(stream_a.try_recv().is_none());
        assert_eq!(stream_b.try_recv().map(|p| p.address), Some(7));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut session = ScanSession::new();
        let (sink, _stream) = event_channel(4);
        session.listen(sink);
        session.cancel();
        session.cancel();
        assert_eq!(session.state(), ScanState::Idle);
        assert_eq!(session.on_peripheral_discovered(advertisement(1)), Delivery::NoSink);
    }

    #[test]
    fn test_full_sink_reports_backpressure_and_keeps_subscription() {
        let mut session = ScanSession::new();
        let (sink, mut stream) = event_channel(1);
        session.listen(sink);

        assert_eq!(session.on_peripheral_discovered(advertisement(1)), Delivery::Delivered);
        assert_eq!(session.on_peripheral_discovered(advertisement(2)), Delivery::Backpressure);
        assert!(session.is_scanning());

        assert_eq!(stream.try_recv().map(|p| p.address), Some(1));
        assert_eq!(session.on_peripheral_discovered(advertisement(3)), Delivery::Delivered);
    }

    #[test]
    fn test_closed_sink_detaches_session() {
        let mut session = ScanSession::new();
        let (sink, stream) = event_channel(1);
        session.listen(sink);
        drop(stream);

        assert_eq!(session.on_peripheral_discovered(advertisement(1)), Delivery::SinkClosed);
        assert_eq!(session.state(), ScanState::Idle);
    }
}
