//! Linux radio: BlueZ advertising through bluer, scanning through btleplug

use std::collections::{BTreeMap, BTreeSet};

use ble_peripheral_core::{
    AdvertisementConfig, PeripheralError, RadioCapability, RadioEventSender, RadioInfo,
    RawAdvertisement, Result,
};
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral, PeripheralProperties, ScanFilter};
use btleplug::platform::{Adapter, Manager};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::translate::{lowest_manufacturer_entry, mac_to_u64};

// ----------------------------------------------------------------------------
// Linux Implementation
// ----------------------------------------------------------------------------

struct BluezAdapter {
    // the adapter's D-Bus connection lives in the session
    _session: bluer::Session,
    adapter: bluer::Adapter,
}

struct ScanTask {
    central: Adapter,
    task: JoinHandle<()>,
}

/// Radio backed by the default BlueZ adapter
pub struct BluezRadio {
    adapter: Mutex<Option<BluezAdapter>>,
    advertisement: Mutex<Option<bluer::adv::AdvertisementHandle>>,
    scan: Mutex<Option<ScanTask>>,
}

impl BluezRadio {
    pub fn new() -> Self {
        Self {
            adapter: Mutex::new(None),
            advertisement: Mutex::new(None),
            scan: Mutex::new(None),
        }
    }

    async fn adapter(&self) -> Result<bluer::Adapter> {
        let mut slot = self.adapter.lock().await;
        if let Some(existing) = slot.as_ref() {
            return Ok(existing.adapter.clone());
        }

        let session = bluer::Session::new()
            .await
            .map_err(|e| PeripheralError::Radio(format!("BlueZ session: {}", e)))?;
        let adapter = session
            .default_adapter()
            .await
            .map_err(|e| PeripheralError::Unsupported {
                reason: format!("no default Bluetooth adapter: {}", e),
            })?;

        *slot = Some(BluezAdapter {
            _session: session,
            adapter: adapter.clone(),
        });
        Ok(adapter)
    }
}

impl Default for BluezRadio {
    fn default() -> Self {
        Self::new()
    }
}

fn radio_error(context: &str, e: impl std::fmt::Display) -> PeripheralError {
    PeripheralError::Radio(format!("{}: {}", context, e))
}

#[async_trait::async_trait]
impl RadioCapability for BluezRadio {
    async fn resolve_default_radio(&self) -> Result<RadioInfo> {
        let adapter = self.adapter().await?;

        let address = adapter
            .address()
            .await
            .map_err(|e| radio_error("adapter address", e))?;
        let powered = adapter
            .is_powered()
            .await
            .map_err(|e| radio_error("adapter power state", e))?;
        // older kernels do not report advertising instances; assume capable
        let peripheral_role = adapter
            .supported_advertising_instances()
            .await
            .map(|instances| instances > 0)
            .unwrap_or(true);

        info!(
            "BlueZ adapter {} ({}) powered: {}",
            adapter.name(),
            address,
            powered
        );
        Ok(RadioInfo::new(adapter.name())
            .with_address(mac_to_u64(address.0))
            .with_powered(powered)
            .with_peripheral_role(peripheral_role))
    }

    async fn start_advertising(&self, config: &AdvertisementConfig) -> Result<()> {
        let adapter = self.adapter().await?;
        let advertisement = bluer_advertisement(config);

        let mut current = self.advertisement.lock().await;
        // dropping the previous handle unregisters it
        drop(current.take());
        let handle = adapter
            .advertise(advertisement)
            .await
            .map_err(|e| radio_error("failed to start advertising", e))?;
        *current = Some(handle);
        info!("Started BLE advertising on {}", adapter.name());
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<()> {
        if let Some(handle) = self.advertisement.lock().await.take() {
            drop(handle);
            info!("Stopped BLE advertising");
        }
        Ok(())
    }

    async fn start_scan(&self, events: RadioEventSender) -> Result<()> {
        let mut scan = self.scan.lock().await;
        if scan.is_some() {
            return Ok(());
        }

        let manager = Manager::new()
            .await
            .map_err(|e| radio_error("failed to create BLE manager", e))?;
        let central = manager
            .adapters()
            .await
            .map_err(|e| radio_error("failed to list BLE adapters", e))?
            .into_iter()
            .next()
            .ok_or_else(|| PeripheralError::radio_unavailable("no BLE adapters available"))?;

        let mut central_events = central
            .events()
            .await
            .map_err(|e| radio_error("failed to subscribe to adapter events", e))?;
        central
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| radio_error("failed to start scan", e))?;

        let watched = central.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = central_events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id)
                    | CentralEvent::DeviceUpdated(id)
                    | CentralEvent::ManufacturerDataAdvertisement { id, .. } => id,
                    _ => continue,
                };
                let properties = match watched.peripheral(&id).await {
                    Ok(peripheral) => peripheral.properties().await,
                    Err(e) => {
                        debug!("Discovered peripheral vanished: {}", e);
                        continue;
                    }
                };
                if let Ok(Some(properties)) = properties {
                    if !events.deliver(raw_advertisement(&properties)) && events.is_closed() {
                        break;
                    }
                }
            }
            debug!("BLE scan event loop ended");
        });

        *scan = Some(ScanTask { central, task });
        info!("Started BLE scan");
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        let Some(ScanTask { central, task }) = self.scan.lock().await.take() else {
            return Ok(());
        };
        task.abort();
        if let Err(e) = central.stop_scan().await {
            warn!("Failed to stop BLE scan: {}", e);
        }
        info!("Stopped BLE scan");
        Ok(())
    }
}

fn bluer_advertisement(config: &AdvertisementConfig) -> bluer::adv::Advertisement {
    let manufacturer_data: BTreeMap<_, _> = config
        .manufacturer_data
        .iter()
        .map(|data| (data.company_id, data.payload.clone()))
        .collect();
    let service_data: BTreeMap<_, _> = config
        .service_data
        .iter()
        .map(|section| (section.uuid, section.data.clone()))
        .collect();
    let mut system_includes = BTreeSet::new();
    if config.include_tx_power {
        system_includes.insert(bluer::adv::Feature::TxPower);
    }

    bluer::adv::Advertisement {
        advertisement_type: bluer::adv::Type::Broadcast,
        manufacturer_data,
        service_uuids: config.service_uuid.into_iter().collect(),
        service_data,
        local_name: config.local_name.clone(),
        system_includes,
        ..Default::default()
    }
}

fn raw_advertisement(properties: &PeripheralProperties) -> RawAdvertisement {
    let mut raw = RawAdvertisement::new(
        mac_to_u64(properties.address.into_inner()),
        properties.rssi.unwrap_or_default(),
    );
    if let Some(name) = &properties.local_name {
        raw = raw.with_local_name(name.clone());
    }
    if let Some(data) = lowest_manufacturer_entry(&properties.manufacturer_data) {
        raw = raw.with_manufacturer_data(data);
    }
    raw
}
