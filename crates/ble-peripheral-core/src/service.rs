//! Controller runner and its cloneable handle
//!
//! The runner task is the command context: it alone owns the controller and
//! serializes commands, radio events and radio status changes. An event that
//! races an unsubscribe is either delivered before the unsubscribe is
//! processed or discarded with the rest of the queue afterwards.

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::advertisement::AdvertisementConfig;
use crate::controller::{Command, PeripheralController, Reply};
use crate::error::{PeripheralError, Result};
use crate::radio::RawAdvertisement;
use crate::scan::DiscoveredPeripheral;
use crate::sink::{event_channel, EventStream};
use crate::state::PeripheralState;

enum Request {
    Command {
        command: Command,
        reply: oneshot::Sender<Result<Reply>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

// ----------------------------------------------------------------------------
// Peripheral Service
// ----------------------------------------------------------------------------

/// Runs a [`PeripheralController`] on its own task
pub struct PeripheralService {
    controller: PeripheralController,
    requests: mpsc::Receiver<Request>,
    radio_events: Option<mpsc::Receiver<RawAdvertisement>>,
}

impl PeripheralService {
    /// Spawn the runner; the returned handle is the only way in
    pub fn spawn(mut controller: PeripheralController) -> (PeripheralHandle, JoinHandle<()>) {
        let (tx, requests) = mpsc::channel(controller.config().request_capacity());
        let scan_capacity = controller.config().scan_capacity();
        let radio_events = controller.take_radio_events();
        let states = controller.subscribe_state();

        let service = Self {
            controller,
            requests,
            radio_events,
        };
        let task = tokio::spawn(service.run());

        (
            PeripheralHandle {
                requests: tx,
                scan_capacity,
                states,
            },
            task,
        )
    }

    async fn run(mut self) {
        info!("Peripheral service starting");
        let mut radio_status = self.controller.watch_radio_status();
        let mut status_open = true;
        // resolution may have finished before the receiver above was cloned
        self.controller.on_radio_status_changed().await;

        loop {
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(Request::Command { command, reply }) => {
                        let unsubscribe = matches!(command, Command::UnsubscribeScanResults);
                        let result = self.controller.handle(command).await;
                        if unsubscribe {
                            self.discard_pending_events();
                        }
                        let _ = reply.send(result);
                    }
                    Some(Request::Shutdown { reply }) => {
                        self.controller.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        debug!("All peripheral handles dropped");
                        self.controller.shutdown().await;
                        break;
                    }
                },

                Some(raw) = recv_event(&mut self.radio_events) => {
                    self.controller.process_radio_event(raw).await;
                }

                changed = radio_status.changed(), if status_open => match changed {
                    Ok(()) => self.controller.on_radio_status_changed().await,
                    Err(_) => status_open = false,
                },
            }
        }

        info!("Peripheral service stopped");
    }

    fn discard_pending_events(&mut self) {
        if let Some(rx) = self.radio_events.as_mut() {
            while rx.try_recv().is_ok() {}
        }
    }
}

async fn recv_event(rx: &mut Option<mpsc::Receiver<RawAdvertisement>>) -> Option<RawAdvertisement> {
    match rx.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

// ----------------------------------------------------------------------------
// Peripheral Handle
// ----------------------------------------------------------------------------

/// Cloneable entry point to a running [`PeripheralService`]
#[derive(Clone)]
pub struct PeripheralHandle {
    requests: mpsc::Sender<Request>,
    scan_capacity: usize,
    states: watch::Receiver<PeripheralState>,
}

impl PeripheralHandle {
    async fn call(&self, command: Command) -> Result<Reply> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::Command { command, reply })
            .await
            .map_err(|_| PeripheralError::ServiceClosed)?;
        response.await.map_err(|_| PeripheralError::ServiceClosed)?
    }

    async fn call_bool(&self, command: Command) -> Result<bool> {
        match self.call(command).await? {
            Reply::Bool(value) => Ok(value),
            other => unreachable!("boolean query answered with {:?}", other),
        }
    }

    pub async fn start(&self, manufacturer_id: u16, manufacturer_data: Vec<u8>) -> Result<()> {
        let config =
            AdvertisementConfig::new().with_manufacturer_data(manufacturer_id, manufacturer_data);
        self.start_with(config).await
    }

    pub async fn start_with(&self, config: AdvertisementConfig) -> Result<()> {
        self.call(Command::Start(config)).await.map(|_| ())
    }

    pub async fn stop(&self) -> Result<()> {
        self.call(Command::Stop).await.map(|_| ())
    }

    pub async fn is_advertising(&self) -> Result<bool> {
        self.call_bool(Command::IsAdvertising).await
    }

    pub async fn is_supported(&self) -> Result<bool> {
        self.call_bool(Command::IsSupported).await
    }

    pub async fn state(&self) -> Result<PeripheralState> {
        match self.call(Command::State).await? {
            Reply::State(state) => Ok(state),
            other => unreachable!("state query answered with {:?}", other),
        }
    }

    /// Observe peripheral state changes without a round trip to the runner
    ///
    /// The receiver reports closed once the runner has stopped.
    pub fn subscribe_state(&self) -> watch::Receiver<PeripheralState> {
        self.states.clone()
    }

    /// Subscribe with the configured stream capacity
    pub async fn subscribe_scan_results(&self) -> Result<EventStream<DiscoveredPeripheral>> {
        self.subscribe_scan_results_with_capacity(self.scan_capacity)
            .await
    }

    pub async fn subscribe_scan_results_with_capacity(
        &self,
        capacity: usize,
    ) -> Result<EventStream<DiscoveredPeripheral>> {
        let (sink, stream) = event_channel(capacity);
        self.call(Command::SubscribeScanResults(sink)).await?;
        Ok(stream)
    }

    /// Once this returns no further results reach the previous stream
    pub async fn unsubscribe_scan_results(&self) -> Result<()> {
        self.call(Command::UnsubscribeScanResults).await.map(|_| ())
    }

    /// Stop advertising and scanning, then end the runner
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.requests
            .send(Request::Shutdown { reply })
            .await
            .map_err(|_| PeripheralError::ServiceClosed)?;
        done.await.map_err(|_| PeripheralError::ServiceClosed)
    }
}
