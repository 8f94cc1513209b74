//! Windows radio over the WinRT Bluetooth LE advertisement APIs

use std::sync::{Mutex, MutexGuard};

use ble_peripheral_core::codec;
use ble_peripheral_core::{
    AdvertisementConfig, PeripheralError, RadioCapability, RadioEventSender, RadioInfo,
    RawAdvertisement, Result,
};
use tracing::{debug, info, warn};
use windows::core::{GUID, HSTRING};
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementDataSection, BluetoothLEAdvertisementPublisher,
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEManufacturerData, BluetoothLEScanningMode,
};
use windows::Devices::Bluetooth::BluetoothAdapter;
use windows::Devices::Radios::RadioState;
use windows::Foundation::{EventRegistrationToken, TypedEventHandler};
use windows::Storage::Streams::{DataReader, DataWriter};

// ----------------------------------------------------------------------------
// Windows Implementation
// ----------------------------------------------------------------------------

struct Watch {
    watcher: BluetoothLEAdvertisementWatcher,
    token: EventRegistrationToken,
}

/// Radio backed by the default Windows Bluetooth adapter
pub struct WinRtRadio {
    publisher: Mutex<Option<BluetoothLEAdvertisementPublisher>>,
    watch: Mutex<Option<Watch>>,
}

impl WinRtRadio {
    pub fn new() -> Self {
        Self {
            publisher: Mutex::new(None),
            watch: Mutex::new(None),
        }
    }
}

impl Default for WinRtRadio {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn radio_error(context: &str, e: windows::core::Error) -> PeripheralError {
    PeripheralError::Radio(format!("{}: {}", context, e.message()))
}

/// AD type for service data keyed by a 128-bit UUID
const SERVICE_DATA_128_AD_TYPE: u8 = 0x21;

fn publisher_for(
    config: &AdvertisementConfig,
) -> windows::core::Result<BluetoothLEAdvertisementPublisher> {
    let publisher = BluetoothLEAdvertisementPublisher::new()?;
    let advertisement = publisher.Advertisement()?;

    if let Some(data) = &config.manufacturer_data {
        let buffer = buffer_of(&data.payload)?;
        let section = BluetoothLEManufacturerData::Create(data.company_id, &buffer)?;
        advertisement.ManufacturerData()?.Append(&section)?;
    }
    if let Some(name) = &config.local_name {
        advertisement.SetLocalName(&HSTRING::from(name.as_str()))?;
    }
    if let Some(uuid) = config.service_uuid {
        advertisement
            .ServiceUuids()?
            .Append(GUID::from_u128(uuid.as_u128()))?;
    }
    if let Some(section) = &config.service_data {
        // UUID little-endian, then the data
        let mut body = section.uuid.as_u128().to_le_bytes().to_vec();
        body.extend_from_slice(&section.data);
        let section = BluetoothLEAdvertisementDataSection::Create(
            SERVICE_DATA_128_AD_TYPE,
            &buffer_of(&body)?,
        )?;
        advertisement.DataSections()?.Append(&section)?;
    }
    if config.include_tx_power {
        publisher.SetIncludeTransmitPowerLevel(true)?;
    }
    Ok(publisher)
}

fn buffer_of(bytes: &[u8]) -> windows::core::Result<windows::Storage::Streams::IBuffer> {
    let writer = DataWriter::new()?;
    writer.WriteBytes(bytes)?;
    writer.DetachBuffer()
}

fn raw_advertisement(
    args: &BluetoothLEAdvertisementReceivedEventArgs,
) -> windows::core::Result<RawAdvertisement> {
    let advertisement = args.Advertisement()?;
    let mut raw = RawAdvertisement::new(args.BluetoothAddress()?, args.RawSignalStrengthInDBm()?);

    let name = advertisement.LocalName()?.to_string_lossy();
    if !name.is_empty() {
        raw = raw.with_local_name(name);
    }

    let sections = advertisement.ManufacturerData()?;
    if sections.Size()? > 0 {
        let section = sections.GetAt(0)?;
        let buffer = section.Data()?;
        let mut payload = vec![0u8; buffer.Length()? as usize];
        DataReader::FromBuffer(&buffer)?.ReadBytes(&mut payload)?;
        raw = raw.with_manufacturer_data(codec::encode(section.CompanyId()?, &payload));
    }
    Ok(raw)
}

#[async_trait::async_trait]
impl RadioCapability for WinRtRadio {
    async fn resolve_default_radio(&self) -> Result<RadioInfo> {
        let adapter = BluetoothAdapter::GetDefaultAsync()
            .map_err(|e| radio_error("Bluetooth API not available", e))?
            .await
            .map_err(|e| PeripheralError::Unsupported {
                reason: format!("no default Bluetooth adapter: {}", e.message()),
            })?;

        let low_energy = adapter
            .IsLowEnergySupported()
            .map_err(|e| radio_error("adapter capabilities", e))?;
        if !low_energy {
            return Err(PeripheralError::Unsupported {
                reason: "Bluetooth LE is not supported by the default adapter".into(),
            });
        }
        let peripheral_role = adapter
            .IsPeripheralRoleSupported()
            .map_err(|e| radio_error("adapter capabilities", e))?;
        let address = adapter
            .BluetoothAddress()
            .map_err(|e| radio_error("adapter address", e))?;

        let radio = adapter
            .GetRadioAsync()
            .map_err(|e| radio_error("radio lookup", e))?
            .await
            .map_err(|e| radio_error("radio lookup", e))?;
        let powered = radio.State().map_err(|e| radio_error("radio state", e))? == RadioState::On;
        let name = radio
            .Name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_else(|_| "Bluetooth".to_string());

        info!("Windows radio '{}' powered: {}", name, powered);
        Ok(RadioInfo::new(name)
            .with_address(address)
            .with_powered(powered)
            .with_peripheral_role(peripheral_role))
    }

    async fn start_advertising(&self, config: &AdvertisementConfig) -> Result<()> {
        let publisher = publisher_for(config)
            .map_err(|e| radio_error("failed to build advertisement", e))?;

        let mut current = lock(&self.publisher);
        if let Some(previous) = current.take() {
            if let Err(e) = previous.Stop() {
                warn!("Failed to stop previous publisher: {}", e.message());
            }
        }
        publisher
            .Start()
            .map_err(|e| radio_error("failed to start advertising", e))?;
        *current = Some(publisher);
        info!("Started BLE advertising");
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<()> {
        if let Some(publisher) = lock(&self.publisher).take() {
            publisher
                .Stop()
                .map_err(|e| radio_error("failed to stop advertising", e))?;
            info!("Stopped BLE advertising");
        }
        Ok(())
    }

    async fn start_scan(&self, events: RadioEventSender) -> Result<()> {
        let mut watch = lock(&self.watch);
        if watch.is_some() {
            return Ok(());
        }

        let watcher = BluetoothLEAdvertisementWatcher::new()
            .map_err(|e| radio_error("failed to create watcher", e))?;
        watcher
            .SetScanningMode(BluetoothLEScanningMode::Active)
            .map_err(|e| radio_error("failed to configure watcher", e))?;

        // invoked on a WinRT thread pool thread
        let handler = TypedEventHandler::new(
            move |_sender: &Option<BluetoothLEAdvertisementWatcher>,
                  args: &Option<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args {
                    match raw_advertisement(args) {
                        Ok(raw) => {
                            events.deliver(raw);
                        }
                        Err(e) => debug!("Unreadable advertisement: {}", e.message()),
                    }
                }
                Ok(())
            },
        );
        let token = watcher
            .Received(&handler)
            .map_err(|e| radio_error("failed to register watcher handler", e))?;
        watcher
            .Start()
            .map_err(|e| radio_error("failed to start watcher", e))?;

        *watch = Some(Watch { watcher, token });
        info!("Started BLE scan");
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        let Some(Watch { watcher, token }) = lock(&self.watch).take() else {
            return Ok(());
        };
        if let Err(e) = watcher.RemoveReceived(token) {
            warn!("Failed to unregister watcher handler: {}", e.message());
        }
        watcher
            .Stop()
            .map_err(|e| radio_error("failed to stop watcher", e))?;
        info!("Stopped BLE scan");
        Ok(())
    }
}
