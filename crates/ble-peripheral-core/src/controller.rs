//! Peripheral controller: the single owner of both sessions
//!
//! All session mutation happens through `&mut PeripheralController`, so
//! whoever holds the controller is the command context. Radio callbacks
//! never touch a session directly; they enqueue into the radio event queue
//! and the controller drains it.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::advertisement::{AdvertisementConfig, AdvertisementSession};
use crate::config::PeripheralConfig;
use crate::error::{PeripheralError, Result};
use crate::radio::{RadioCapability, RadioEventSender, RawAdvertisement};
use crate::scan::{Delivery, DiscoveredPeripheral, ScanSession};
use crate::sink::EventSink;
use crate::state::{PeripheralState, RadioStatus};

// ----------------------------------------------------------------------------
// Commands
// ----------------------------------------------------------------------------

/// External operations accepted by the controller
#[derive(Debug)]
pub enum Command {
    Start(AdvertisementConfig),
    Stop,
    IsAdvertising,
    IsSupported,
    State,
    SubscribeScanResults(EventSink<DiscoveredPeripheral>),
    UnsubscribeScanResults,
}

/// Result payload of a [`Command`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Done,
    Bool(bool),
    State(PeripheralState),
}

// ----------------------------------------------------------------------------
// Peripheral Controller
// ----------------------------------------------------------------------------

/// Coordinates one advertisement session and one scan session over a radio
pub struct PeripheralController {
    config: PeripheralConfig,
    radio: Arc<dyn RadioCapability>,
    radio_status: watch::Receiver<RadioStatus>,
    init_task: JoinHandle<()>,
    advertisement: AdvertisementSession,
    scan: ScanSession,
    /// Radio watch started on our behalf
    radio_watching: bool,
    events_tx: mpsc::Sender<RawAdvertisement>,
    events_rx: Option<mpsc::Receiver<RawAdvertisement>>,
    state_tx: watch::Sender<PeripheralState>,
}

impl PeripheralController {
    /// Create a controller and start resolving the default radio
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(radio: Arc<dyn RadioCapability>, config: PeripheralConfig) -> Self {
        let (status_tx, radio_status) = watch::channel(RadioStatus::Pending);
        let init_task = {
            let radio = Arc::clone(&radio);
            tokio::spawn(async move {
                let result = radio.resolve_default_radio().await;
                match &result {
                    Ok(info) => info!(
                        "Default radio '{}' resolved (powered: {})",
                        info.name, info.powered
                    ),
                    Err(e) => warn!("Failed to resolve default radio: {}", e),
                }
                status_tx.send_replace(RadioStatus::from_resolution(result));
            })
        };

        let (events_tx, events_rx) = mpsc::channel(config.radio_event_capacity());
        let (state_tx, _) = watch::channel(PeripheralState::Unknown);

        Self {
            advertisement: AdvertisementSession::new(config.max_manufacturer_payload),
            scan: ScanSession::new(),
            config,
            radio,
            radio_status,
            init_task,
            radio_watching: false,
            events_tx,
            events_rx: Some(events_rx),
            state_tx,
        }
    }

    pub fn config(&self) -> &PeripheralConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Radio initialization
    // ------------------------------------------------------------------------

    pub fn radio_status(&self) -> RadioStatus {
        self.radio_status.borrow().clone()
    }

    /// Receiver observing radio resolution
    pub fn watch_radio_status(&self) -> watch::Receiver<RadioStatus> {
        self.radio_status.clone()
    }

    /// Wait until radio resolution completes, up to the configured timeout
    pub async fn wait_for_radio(&mut self) -> Result<RadioStatus> {
        let timeout = self.config.radio_init_timeout();
        let mut status = self.radio_status.clone();
        let resolved = tokio::time::timeout(timeout, status.wait_for(|s| !s.is_pending()))
            .await
            .map_err(|_| PeripheralError::Timeout {
                duration_ms: timeout.as_millis() as u64,
            })?
            .map(|status| status.clone())
            .map_err(|_| PeripheralError::radio_unavailable("radio initialization was abandoned"))?;

        self.on_radio_status_changed().await;
        Ok(resolved)
    }

    /// Bring derived state and a deferred radio watch up to date
    pub async fn on_radio_status_changed(&mut self) {
        self.publish_state();
        if let Err(e) = self.ensure_radio_watch().await {
            warn!("Deferred scan could not start: {}", e);
            // dropping the sink ends the subscriber's stream
            self.scan.cancel();
        }
    }

    // ------------------------------------------------------------------------
    // Advertising
    // ------------------------------------------------------------------------

    /// Advertise the given manufacturer data, replacing any previous advertisement
    pub async fn start(&mut self, manufacturer_id: u16, manufacturer_data: Vec<u8>) -> Result<()> {
        let config =
            AdvertisementConfig::new().with_manufacturer_data(manufacturer_id, manufacturer_data);
        self.start_with(config).await
    }

    pub async fn start_with(&mut self, config: AdvertisementConfig) -> Result<()> {
        config.validate(self.advertisement.max_payload())?;
        self.radio_status.borrow().usable()?;

        let result = self.advertisement.start(config, self.radio.as_ref()).await;
        self.publish_state();
        result
    }

    pub async fn stop(&mut self) -> Result<()> {
        let result = self.advertisement.stop(self.radio.as_ref()).await;
        self.publish_state();
        result
    }

    /// Last requested advertising state; not re-verified against the radio
    pub fn is_advertising(&self) -> bool {
        self.advertisement.is_advertising()
    }

    pub fn advertisement_config(&self) -> &AdvertisementConfig {
        self.advertisement.config()
    }

    /// Whether the resolved radio can advertise as a peripheral
    pub fn is_supported(&self) -> bool {
        matches!(
            &*self.radio_status.borrow(),
            RadioStatus::Ready(info) if info.peripheral_role_supported
        )
    }

    pub fn state(&self) -> PeripheralState {
        PeripheralState::derive(&self.radio_status.borrow(), self.is_advertising())
    }

    /// Observe peripheral state changes
    pub fn subscribe_state(&self) -> watch::Receiver<PeripheralState> {
        self.publish_state();
        self.state_tx.subscribe()
    }

    fn publish_state(&self) {
        let state = self.state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!("Peripheral state {:?} -> {:?}", current, state);
            *current = state;
            true
        });
    }

    // ------------------------------------------------------------------------
    // Scanning
    // ------------------------------------------------------------------------

    /// Attach a scan result sink, replacing the previous one
    ///
    /// The radio watch starts now if the radio is ready, or once it resolves
    /// while resolution is still pending. A radio that resolved unusable
    /// fails with `RadioUnavailable` and leaves no sink attached.
    pub async fn subscribe_scan_results(
        &mut self,
        sink: EventSink<DiscoveredPeripheral>,
    ) -> Result<()> {
        self.scan.listen(sink);
        if let Err(e) = self.ensure_radio_watch().await {
            self.scan.cancel();
            return Err(e);
        }
        Ok(())
    }

    /// Detach the scan result sink; idempotent
    pub async fn unsubscribe_scan_results(&mut self) {
        self.scan.cancel();
        self.discard_pending_events();
        self.release_radio_watch().await;
    }

    pub fn is_scanning(&self) -> bool {
        self.scan.is_scanning()
    }

    async fn ensure_radio_watch(&mut self) -> Result<()> {
        if self.radio_watching || !self.scan.is_scanning() {
            return Ok(());
        }
        {
            let status = self.radio_status.borrow();
            if status.is_pending() {
                debug!("Radio not resolved yet, deferring scan start");
                return Ok(());
            }
            // resolution is final, so an unusable radio stays unusable
            status.usable()?;
        }

        self.radio
            .start_scan(RadioEventSender::new(self.events_tx.clone()))
            .await
            .map_err(|e| PeripheralError::radio_unavailable(e.to_string()))?;
        self.radio_watching = true;
        info!("BLE scan started");
        Ok(())
    }

    async fn release_radio_watch(&mut self) {
        if !self.radio_watching || !self.config.stop_scan_on_cancel {
            return;
        }
        self.radio_watching = false;
        if let Err(e) = self.radio.stop_scan().await {
            warn!("Failed to stop BLE scan: {}", e);
        }
        info!("BLE scan stopped");
    }

    // ------------------------------------------------------------------------
    // Radio event hand-off
    // ------------------------------------------------------------------------

    /// Take the receiving end of the radio event queue
    ///
    /// Used by a runner that multiplexes radio events with commands; after
    /// this the runner must feed events back through `process_radio_event`.
    pub fn take_radio_events(&mut self) -> Option<mpsc::Receiver<RawAdvertisement>> {
        self.events_rx.take()
    }

    /// Wait for the next queued radio event
    pub async fn next_radio_event(&mut self) -> Option<RawAdvertisement> {
        match self.events_rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Process every radio event queued so far; returns how many were delivered
    pub async fn drain_radio_events(&mut self) -> usize {
        let mut delivered = 0;
        while let Some(raw) = self.events_rx.as_mut().and_then(|rx| rx.try_recv().ok()) {
            if self.process_radio_event(raw).await == Delivery::Delivered {
                delivered += 1;
            }
        }
        delivered
    }

    /// Hand one radio event to the scan session
    pub async fn process_radio_event(&mut self, raw: RawAdvertisement) -> Delivery {
        let delivery = self.scan.on_peripheral_discovered(raw);
        if delivery == Delivery::SinkClosed {
            self.release_radio_watch().await;
        }
        delivery
    }

    fn discard_pending_events(&mut self) {
        if let Some(rx) = self.events_rx.as_mut() {
            let mut dropped = 0usize;
            while rx.try_recv().is_ok() {
                dropped += 1;
            }
            if dropped > 0 {
                debug!("Dropped {} queued scan events after cancel", dropped);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Command dispatch
    // ------------------------------------------------------------------------

    /// Execute one external command
    pub async fn handle(&mut self, command: Command) -> Result<Reply> {
        match command {
            Command::Start(config) => self.start_with(config).await.map(|_| Reply::Done),
            Command::Stop => self.stop().await.map(|_| Reply::Done),
            Command::IsAdvertising => Ok(Reply::Bool(self.is_advertising())),
            Command::IsSupported => Ok(Reply::Bool(self.is_supported())),
            Command::State => Ok(Reply::State(self.state())),
            Command::SubscribeScanResults(sink) => {
                self.subscribe_scan_results(sink).await.map(|_| Reply::Done)
            }
            Command::UnsubscribeScanResults => {
                self.unsubscribe_scan_results().await;
                Ok(Reply::Done)
            }
        }
    }

    /// Stop advertising and scanning
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.stop().await {
            warn!("Error stopping advertisement during shutdown: {}", e);
        }
        self.scan.cancel();
        self.release_radio_watch().await;
        // a watch kept alive by configuration still goes down with us
        if self.radio_watching {
            self.radio_watching = false;
            if let Err(e) = self.radio.stop_scan().await {
                warn!("Failed to stop BLE scan during shutdown: {}", e);
            }
        }
        info!("Peripheral controller shut down");
    }
}

impl Drop for PeripheralController {
    fn drop(&mut self) {
        self.init_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::{RadioCall, SimulatedRadio};
    use crate::sink::event_channel;

    async fn ready_controller(radio: Arc<SimulatedRadio>) -> PeripheralController {
        let mut controller = PeripheralController::new(radio, PeripheralConfig::default());
        controller.wait_for_radio().await.unwrap();
        controller
    }

    #[tokio::test]
    async fn test_handle_round_trip() {
        let radio = Arc::new(SimulatedRadio::new());
        let mut controller = ready_controller(radio.clone()).await;

        let config = AdvertisementConfig::new().with_manufacturer_data(0x0059, vec![1]);
        assert_eq!(controller.handle(Command::Start(config)).await, Ok(Reply::Done));
        assert_eq!(
            controller.handle(Command::IsAdvertising).await,
            Ok(Reply::Bool(true))
        );
        assert_eq!(
            controller.handle(Command::State).await,
            Ok(Reply::State(PeripheralState::Advertising))
        );
        assert_eq!(controller.handle(Command::Stop).await, Ok(Reply::Done));
        assert_eq!(
            controller.handle(Command::IsAdvertising).await,
            Ok(Reply::Bool(false))
        );
    }

    #[tokio::test]
    async fn test_validation_precedes_radio_check() {
        let radio = Arc::new(SimulatedRadio::new().gated());
        let mut controller = PeripheralController::new(radio, PeripheralConfig::default());

        let err = controller.start(1, vec![0u8; 40]).await.unwrap_err();
        assert!(matches!(err, PeripheralError::PayloadTooLarge { size: 40, .. }));
    }

    #[tokio::test]
    async fn test_state_subscription_sees_transitions() {
        let radio = Arc::new(SimulatedRadio::new());
        let mut controller = ready_controller(radio).await;
        let mut states = controller.subscribe_state();
        assert_eq!(*states.borrow_and_update(), PeripheralState::Idle);

        controller.start(1, vec![]).await.unwrap();
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), PeripheralState::Advertising);

        // restarting with new data keeps the same state and does not notify
        controller.start(1, vec![2]).await.unwrap();
        assert!(!states.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_subscribe_defers_scan_until_radio_ready() {
        let radio = Arc::new(SimulatedRadio::new().gated());
        let mut controller = PeripheralController::new(radio.clone(), PeripheralConfig::default());

        let (sink, _stream) = event_channel(4);
        controller.subscribe_scan_results(sink).await.unwrap();
        assert!(!radio.is_scanning());

        radio.release();
        controller.wait_for_radio().await.unwrap();
        assert!(radio.is_scanning());
    }

    #[tokio::test]
    async fn test_closed_subscriber_releases_radio_watch() {
        let radio = Arc::new(SimulatedRadio::new());
        let mut controller = ready_controller(radio.clone()).await;

        let (sink, stream) = event_channel(4);
        controller.subscribe_scan_results(sink).await.unwrap();
        drop(stream);

        assert!(radio.emit(RawAdvertisement::new(1, -50)));
        assert_eq!(controller.drain_radio_events().await, 0);
        assert!(!controller.is_scanning());
        assert_eq!(radio.calls().last(), Some(&RadioCall::StopScan));
    }

    #[tokio::test]
    async fn test_next_radio_event_waits_for_emission() {
        let radio = Arc::new(SimulatedRadio::new());
        let mut controller = ready_controller(radio.clone()).await;
        let (sink, mut stream) = event_channel(4);
        controller.subscribe_scan_results(sink).await.unwrap();

        let emitter = Arc::clone(&radio);
        tokio::spawn(async move {
            emitter.emit(RawAdvertisement::new(0x0A0B, -42));
        });
        let raw = controller.next_radio_event().await.unwrap();
        assert_eq!(controller.process_radio_event(raw).await, Delivery::Delivered);
        assert_eq!(stream.try_recv().map(|p| p.name), Some("a0b".to_string()));

        controller.take_radio_events();
        assert_eq!(controller.next_radio_event().await, None);
    }

    #[tokio::test]
    async fn test_keep_radio_watch_on_cancel_when_configured() {
        let radio = Arc::new(SimulatedRadio::new());
        let config = PeripheralConfig::default().with_stop_scan_on_cancel(false);
        let mut controller = PeripheralController::new(radio.clone(), config);
        controller.wait_for_radio().await.unwrap();

        let (sink, _stream) = event_channel(4);
        controller.subscribe_scan_results(sink).await.unwrap();
        controller.unsubscribe_scan_results().await;
        assert!(radio.is_scanning());

        // resubscribing reuses the running watch
        let (sink, _stream) = event_channel(4);
        controller.subscribe_scan_results(sink).await.unwrap();
        let starts = radio
            .calls()
            .iter()
            .filter(|c| **c == RadioCall::StartScan)
            .count();
        assert_eq!(starts, 1);

        controller.shutdown().await;
        assert!(!radio.is_scanning());
    }
}
