//! Advertisement session: what we advertise and whether we believe it is on air

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codec::{ManufacturerData, COMPANY_ID_LEN};
use crate::error::{PeripheralError, Result};
use crate::radio::RadioCapability;

/// Legacy advertising PDU data length
pub const LEGACY_ADVERTISEMENT_LEN: usize = 31;

// AD structure length byte plus type byte
const AD_HEADER_LEN: usize = 2;
const UUID128_LEN: usize = 16;
const TX_POWER_LEN: usize = 1;

// ----------------------------------------------------------------------------
// Advertisement Configuration
// ----------------------------------------------------------------------------

/// Service data section keyed by a 128-bit service UUID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceData {
    pub uuid: Uuid,
    pub data: Vec<u8>,
}

/// What a single `start` asks the radio to advertise
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisementConfig {
    pub manufacturer_data: Option<ManufacturerData>,
    /// Complete local name
    #[serde(default)]
    pub local_name: Option<String>,
    /// Advertised 128-bit service UUID
    #[serde(default)]
    pub service_uuid: Option<Uuid>,
    #[serde(default)]
    pub service_data: Option<ServiceData>,
    /// Let the radio add its TX power level
    #[serde(default)]
    pub include_tx_power: bool,
}

impl AdvertisementConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_manufacturer_data(mut self, company_id: u16, payload: impl Into<Vec<u8>>) -> Self {
        self.manufacturer_data = Some(ManufacturerData::new(company_id, payload));
        self
    }

    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = Some(name.into());
        self
    }

    pub fn with_service_uuid(mut self, uuid: Uuid) -> Self {
        self.service_uuid = Some(uuid);
        self
    }

    pub fn with_service_data(mut self, uuid: Uuid, data: impl Into<Vec<u8>>) -> Self {
        self.service_data = Some(ServiceData {
            uuid,
            data: data.into(),
        });
        self
    }

    pub fn with_tx_power(mut self, include: bool) -> Self {
        self.include_tx_power = include;
        self
    }

    /// Bytes the configured AD structures occupy in the advertising PDU
    pub fn encoded_len(&self) -> usize {
        let manufacturer = self
            .manufacturer_data
            .as_ref()
            .map(|data| AD_HEADER_LEN + COMPANY_ID_LEN + data.payload.len());
        let name = self
            .local_name
            .as_ref()
            .map(|name| AD_HEADER_LEN + name.len());
        let service = self.service_uuid.map(|_| AD_HEADER_LEN + UUID128_LEN);
        let service_data = self
            .service_data
            .as_ref()
            .map(|section| AD_HEADER_LEN + UUID128_LEN + section.data.len());
        let tx_power = self
            .include_tx_power
            .then_some(AD_HEADER_LEN + TX_POWER_LEN);

        [manufacturer, name, service, service_data, tx_power]
            .into_iter()
            .flatten()
            .sum()
    }

    /// Check the manufacturer payload against its budget, then the whole
    /// advertisement against the legacy PDU
    pub fn validate(&self, max_payload: usize) -> Result<()> {
        if let Some(data) = &self.manufacturer_data {
            if data.payload.len() > max_payload {
                return Err(PeripheralError::PayloadTooLarge {
                    size: data.payload.len(),
                    max: max_payload,
                });
            }
        }
        let size = self.encoded_len();
        if size > LEGACY_ADVERTISEMENT_LEN {
            return Err(PeripheralError::AdvertisementTooLarge {
                size,
                max: LEGACY_ADVERTISEMENT_LEN,
            });
        }
        Ok(())
    }

    /// Encoded manufacturer section body; empty when there is none
    pub fn encoded_manufacturer_data(&self) -> Vec<u8> {
        self.manufacturer_data
            .as_ref()
            .map(ManufacturerData::encode)
            .unwrap_or_default()
    }
}

// ----------------------------------------------------------------------------
// Advertisement Session
// ----------------------------------------------------------------------------

/// Advertising state as last requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvertisementState {
    Idle,
    Advertising,
}

/// Owns the active advertising configuration and drives the radio
///
/// `is_advertising` reflects the last successful command, not the radio:
/// if the OS stops advertising on its own (radio powered off, another app
/// taking the advertiser) this session keeps reporting `Advertising`.
#[derive(Debug)]
pub struct AdvertisementSession {
    state: AdvertisementState,
    config: AdvertisementConfig,
    max_payload: usize,
    // a start reached the radio and no stop has followed
    radio_engaged: bool,
}

impl AdvertisementSession {
    pub fn new(max_payload: usize) -> Self {
        Self {
            state: AdvertisementState::Idle,
            config: AdvertisementConfig::default(),
            max_payload,
            radio_engaged: false,
        }
    }

    /// Advertise `config`, replacing whatever was advertised before
    pub async fn start(
        &mut self,
        config: AdvertisementConfig,
        radio: &dyn RadioCapability,
    ) -> Result<()> {
        config.validate(self.max_payload)?;

        if self.state == AdvertisementState::Advertising && !radio.supports_live_update() {
            debug!("Radio cannot update a live advertisement, restarting it");
            if let Err(e) = radio.stop_advertising().await {
                warn!("Failed to stop advertisement before reconfiguring: {}", e);
            }
            self.state = AdvertisementState::Idle;
            self.config = AdvertisementConfig::default();
        }

        self.radio_engaged = true;
        radio
            .start_advertising(&config)
            .await
            .map_err(into_radio_unavailable)?;

        self.config = config;
        self.state = AdvertisementState::Advertising;
        match &self.config.manufacturer_data {
            Some(data) => info!("BLE advertising started with manufacturer data {}", data),
            None => info!("BLE advertising started without manufacturer data"),
        }
        Ok(())
    }

    /// Stop advertising; stopping an idle session succeeds
    pub async fn stop(&mut self, radio: &dyn RadioCapability) -> Result<()> {
        self.config = AdvertisementConfig::default();
        self.state = AdvertisementState::Idle;

        if self.radio_engaged {
            self.radio_engaged = false;
            if let Err(e) = radio.stop_advertising().await {
                warn!("Radio reported an error while stopping advertisement: {}", e);
            }
            info!("BLE advertising stopped");
        }
        Ok(())
    }

    pub fn is_advertising(&self) -> bool {
        self.state == AdvertisementState::Advertising
    }

    pub fn state(&self) -> AdvertisementState {
        self.state
    }

    pub fn config(&self) -> &AdvertisementConfig {
        &self.config
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }
}

fn into_radio_unavailable(err: PeripheralError) -> PeripheralError {
    match err {
        PeripheralError::RadioUnavailable { .. } => err,
        other => PeripheralError::radio_unavailable(other.to_string()),
    }
}
