//! In-process radio for tests and demos
//!
//! Scripted resolution outcomes, a call log, injectable start failures and
//! an `emit` hook standing in for the OS watcher callback.

use std::sync::{Mutex, MutexGuard};

use tokio::sync::Notify;
use tracing::debug;

use crate::advertisement::AdvertisementConfig;
use crate::error::{PeripheralError, Result};

use super::{RadioCapability, RadioEventSender, RadioInfo, RawAdvertisement};

// ----------------------------------------------------------------------------
// Simulated Radio
// ----------------------------------------------------------------------------

/// A call the controller made on the radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCall {
    Resolve,
    /// Encoded manufacturer section of the requested advertisement
    StartAdvertising(Vec<u8>),
    StopAdvertising,
    StartScan,
    StopScan,
}

#[derive(Debug, Clone)]
enum Resolution {
    Ready(RadioInfo),
    Unsupported(String),
    Fail(String),
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<RadioCall>,
    advertised: Option<AdvertisementConfig>,
    scan_events: Option<RadioEventSender>,
    fail_next_start: Option<String>,
}

/// Radio whose behavior is scripted by the caller
#[derive(Debug)]
pub struct SimulatedRadio {
    resolution: Resolution,
    gate: Option<Notify>,
    live_update: bool,
    state: Mutex<State>,
}

impl Default for SimulatedRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedRadio {
    /// A powered radio that resolves immediately
    pub fn new() -> Self {
        Self::with_info(RadioInfo::new("simulated").with_address(0x00_1A_7D_DA_71_13))
    }

    /// A radio resolving to the given info
    pub fn with_info(info: RadioInfo) -> Self {
        Self {
            resolution: Resolution::Ready(info),
            gate: None,
            live_update: false,
            state: Mutex::new(State::default()),
        }
    }

    /// A radio that resolves but is powered off
    pub fn powered_off() -> Self {
        Self::with_info(RadioInfo::new("simulated").with_powered(false))
    }

    /// A platform without BLE peripheral support
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self {
            resolution: Resolution::Unsupported(reason.into()),
            ..Self::new()
        }
    }

    /// A radio whose resolution fails
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            resolution: Resolution::Fail(reason.into()),
            ..Self::new()
        }
    }

    /// Hold resolution until [`release`](Self::release) is called
    pub fn gated(mut self) -> Self {
        self.gate = Some(Notify::new());
        self
    }

    /// Accept data replacement on a running advertisement
    pub fn with_live_update(mut self, enabled: bool) -> Self {
        self.live_update = enabled;
        self
    }

    /// Let a gated resolution complete
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    /// Make the next `start_advertising` fail
    pub fn fail_next_start(&self, reason: impl Into<String>) {
        self.lock().fail_next_start = Some(reason.into());
    }

    /// Every call made so far, oldest first
    pub fn calls(&self) -> Vec<RadioCall> {
        self.lock().calls.clone()
    }

    /// Encoded manufacturer data currently on air
    pub fn advertised(&self) -> Option<Vec<u8>> {
        self.lock()
            .advertised
            .as_ref()
            .map(AdvertisementConfig::encoded_manufacturer_data)
    }

    /// Full advertisement currently on air
    pub fn advertised_config(&self) -> Option<AdvertisementConfig> {
        self.lock().advertised.clone()
    }

    pub fn is_scanning(&self) -> bool {
        self.lock().scan_events.is_some()
    }

    /// Push an advertisement as the OS watcher would; `false` if not scanning
    /// or the controller dropped it
    pub fn emit(&self, advertisement: RawAdvertisement) -> bool {
        match self.event_sender() {
            Some(sender) => sender.deliver(advertisement),
            None => false,
        }
    }

    /// Sender registered by the last `start_scan`, for emitting from other threads
    pub fn event_sender(&self) -> Option<RadioEventSender> {
        self.lock().scan_events.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: RadioCall) {
        self.lock().calls.push(call);
    }
}

#[async_trait::async_trait]
impl RadioCapability for SimulatedRadio {
    async fn resolve_default_radio(&self) -> Result<RadioInfo> {
        self.record(RadioCall::Resolve);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match &self.resolution {
            Resolution::Ready(info) => Ok(info.clone()),
            Resolution::Unsupported(reason) => Err(PeripheralError::Unsupported {
                reason: reason.clone(),
            }),
            Resolution::Fail(reason) => Err(PeripheralError::Radio(reason.clone())),
        }
    }

    async fn start_advertising(&self, advertisement: &AdvertisementConfig) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(RadioCall::StartAdvertising(
            advertisement.encoded_manufacturer_data(),
        ));
        if let Some(reason) = state.fail_next_start.take() {
            return Err(PeripheralError::Radio(reason));
        }
        state.advertised = Some(advertisement.clone());
        debug!(
            "Simulated radio advertising {} bytes",
            advertisement.encoded_len()
        );
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(RadioCall::StopAdvertising);
        state.advertised = None;
        Ok(())
    }

    async fn start_scan(&self, events: RadioEventSender) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(RadioCall::StartScan);
        state.scan_events = Some(events);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(RadioCall::StopScan);
        state.scan_events = None;
        Ok(())
    }

    fn supports_live_update(&self) -> bool {
        self.live_update
    }
}
