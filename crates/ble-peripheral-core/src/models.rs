//! Request and record shapes exchanged with a host channel

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::advertisement::AdvertisementConfig;
use crate::error::{PeripheralError, Result};
use crate::scan::DiscoveredPeripheral;

/// Arguments of the `start` command as they arrive over a host channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    #[serde(default)]
    pub manufacturer_id: Option<u16>,
    #[serde(default, alias = "manufacturerDataBytes")]
    pub manufacturer_data: Option<Vec<u8>>,
    #[serde(default)]
    pub local_name: Option<String>,
    #[serde(default, alias = "uuid")]
    pub service_uuid: Option<Uuid>,
    #[serde(default)]
    pub service_data_uuid: Option<Uuid>,
    #[serde(default)]
    pub service_data: Option<Vec<u8>>,
    #[serde(default)]
    pub transmission_power_included: Option<bool>,
}

impl StartRequest {
    /// Manufacturer data is attached when either field is present; the
    /// missing one defaults to company id 0 or an empty payload.
    /// Service data needs its UUID.
    pub fn into_config(self) -> Result<AdvertisementConfig> {
        let mut config = match (self.manufacturer_id, self.manufacturer_data) {
            (None, None) => AdvertisementConfig::new(),
            (id, data) => AdvertisementConfig::new()
                .with_manufacturer_data(id.unwrap_or(0), data.unwrap_or_default()),
        };

        config.local_name = self.local_name;
        config.service_uuid = self.service_uuid;
        config.include_tx_power = self.transmission_power_included.unwrap_or(false);
        match (self.service_data_uuid, self.service_data) {
            (Some(uuid), data) => config = config.with_service_data(uuid, data.unwrap_or_default()),
            (None, Some(_)) => {
                return Err(PeripheralError::InvalidArgument(
                    "serviceData requires serviceDataUuid".to_string(),
                ))
            }
            (None, None) => {}
        }
        Ok(config)
    }
}

/// One scan result as emitted to a host event channel
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResultRecord {
    pub device_name: String,
    /// Decimal device address
    pub address: String,
    /// Company id (LE) followed by payload; empty when none was advertised
    pub manufacturer_specific_data: Vec<u8>,
    pub rssi: i32,
}

impl From<&DiscoveredPeripheral> for ScanResultRecord {
    fn from(peripheral: &DiscoveredPeripheral) -> Self {
        Self {
            device_name: peripheral.name.clone(),
            address: peripheral.address.to_string(),
            manufacturer_specific_data: peripheral
                .manufacturer_data
                .as_ref()
                .map(|data| data.encode())
                .unwrap_or_default(),
            rssi: i32::from(peripheral.rssi),
        }
    }
}

impl From<DiscoveredPeripheral> for ScanResultRecord {
    fn from(peripheral: DiscoveredPeripheral) -> Self {
        Self::from(&peripheral)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ManufacturerData;

    #[test]
    fn test_start_request_accepts_host_field_names() {
        let request: StartRequest =
            serde_json::from_str(r#"{"manufacturerId": 1234, "manufacturerDataBytes": [1, 2]}"#)
                .unwrap();
        assert_eq!(
            request.into_config().unwrap().manufacturer_data,
            Some(ManufacturerData::new(1234, vec![1, 2]))
        );
    }

    #[test]
    fn test_start_request_partial_fields() {
        let only_bytes = StartRequest {
            manufacturer_data: Some(vec![9]),
            ..Default::default()
        };
        assert_eq!(
            only_bytes.into_config().unwrap().manufacturer_data,
            Some(ManufacturerData::new(0, vec![9]))
        );

        let only_id = StartRequest {
            manufacturer_id: Some(7),
            ..Default::default()
        };
        assert_eq!(
            only_id.into_config().unwrap().manufacturer_data,
            Some(ManufacturerData::new(7, Vec::new()))
        );

        assert_eq!(StartRequest::default().into_config().unwrap().manufacturer_data, None);
    }

    #[test]
    fn test_start_request_advertisement_fields() {
        let request: StartRequest = serde_json::from_str(
            r#"{
                "uuid": "8ebdb2f3-7817-45c9-95c5-c5e9031aaa47",
                "localName": "blep",
                "serviceDataUuid": "0000180f-0000-1000-8000-00805f9b34fb",
                "serviceData": [100],
                "transmissionPowerIncluded": true
            }"#,
        )
        .unwrap();
        let config = request.into_config().unwrap();

        assert_eq!(config.manufacturer_data, None);
        assert_eq!(config.local_name.as_deref(), Some("blep"));
        assert_eq!(
            config.service_uuid,
            Some(Uuid::from_u128(0x8ebdb2f3_7817_45c9_95c5_c5e9031aaa47))
        );
        let section = config.service_data.unwrap();
        assert_eq!(section.uuid, Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb));
        assert_eq!(section.data, vec![100]);
        assert!(config.include_tx_power);
    }

    #[test]
    fn test_service_data_without_uuid_is_invalid() {
        let request = StartRequest {
            service_data: Some(vec![1]),
            ..Default::default()
        };
        assert!(matches!(
            request.into_config(),
            Err(PeripheralError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_start_request_rejects_out_of_range_id() {
        let parsed = serde_json::from_str::<StartRequest>(r#"{"manufacturerId": 70000}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_scan_result_record_shape() {
        let peripheral = DiscoveredPeripheral {
            address: 0xAABBCCDDEEFF,
            name: "aabbccddeeff".to_string(),
            manufacturer_data: Some(ManufacturerData::new(0x004C, vec![0x10])),
            rssi: -71,
        };
        let json = serde_json::to_value(ScanResultRecord::from(&peripheral)).unwrap();

        assert_eq!(json["deviceName"], "aabbccddeeff");
        assert_eq!(json["address"], "187723572702975");
        assert_eq!(json["manufacturerSpecificData"], serde_json::json!([0x4C, 0x00, 0x10]));
        assert_eq!(json["rssi"], -71);
    }

    #[test]
    fn test_scan_result_record_without_manufacturer_data() {
        let peripheral = DiscoveredPeripheral {
            address: 1,
            name: "tag".to_string(),
            manufacturer_data: None,
            rssi: -40,
        };
        assert!(ScanResultRecord::from(peripheral)
            .manufacturer_specific_data
            .is_empty());
    }
}
