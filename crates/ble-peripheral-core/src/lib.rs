//! BLE peripheral advertising session manager
//!
//! Owns the lifecycle of one advertisement and one scan subscription on top
//! of an OS radio abstracted as [`RadioCapability`].
//!
//! ## Architecture
//!
//! - [`codec`] - Manufacturer-specific data encoding (LE company id + payload)
//! - [`advertisement`] - Advertisement session state machine
//! - [`scan`] - Scan session and discovered peripheral records
//! - [`controller`] - Façade owning both sessions and the radio event queue
//! - [`service`] - Runs a controller on its own task behind a cloneable handle
//! - [`radio`] - Radio capability trait and a simulated radio
//! - [`sink`] - Bounded event sink / stream pair
//! - [`models`] - Request and record shapes exchanged with a host channel
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ble_peripheral_core::{PeripheralConfig, PeripheralController, PeripheralService, SimulatedRadio};
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let radio = Arc::new(SimulatedRadio::new());
//! let mut controller = PeripheralController::new(radio, PeripheralConfig::default());
//! controller.wait_for_radio().await?;
//!
//! let (peripheral, _task) = PeripheralService::spawn(controller);
//! peripheral.start(0xFFFF, vec![0x01, 0x02]).await?;
//!
//! let mut results = peripheral.subscribe_scan_results().await?;
//! while let Some(found) = results.next().await {
//!     println!("{} ({} dBm)", found.name, found.rssi);
//! }
//! # Ok(())
//! # }
//! ```

pub mod advertisement;
pub mod codec;
pub mod config;
pub mod controller;
pub mod error;
pub mod models;
pub mod radio;
pub mod scan;
pub mod service;
pub mod sink;
pub mod state;

pub use advertisement::{
    AdvertisementConfig, AdvertisementSession, AdvertisementState, ServiceData,
    LEGACY_ADVERTISEMENT_LEN,
};
pub use codec::{ManufacturerData, TEST_COMPANY_ID};
pub use config::PeripheralConfig;
pub use controller::{Command, PeripheralController, Reply};
pub use error::{PeripheralError, Result};
pub use models::{ScanResultRecord, StartRequest};
pub use radio::{
    RadioCall, RadioCapability, RadioEventSender, RadioInfo, RawAdvertisement, SimulatedRadio,
};
pub use scan::{Delivery, DiscoveredPeripheral, ScanSession, ScanState};
pub use service::{PeripheralHandle, PeripheralService};
pub use sink::{event_channel, EventSink, EventStream, PublishError};
pub use state::{PeripheralState, RadioStatus};
pub use uuid::Uuid;
