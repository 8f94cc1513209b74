//! Manufacturer-specific advertising data codec
//!
//! The body of a manufacturer-specific AD structure is a little-endian
//! company identifier followed by opaque payload bytes. The AD length/type
//! header is owned by the radio and never appears here.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PeripheralError, Result};

/// Size of the company identifier prefix
pub const COMPANY_ID_LEN: usize = 2;

/// Company identifier reserved by the Bluetooth SIG for testing
pub const TEST_COMPANY_ID: u16 = 0xFFFF;

/// Decoded manufacturer-specific data
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManufacturerData {
    pub company_id: u16,
    pub payload: Vec<u8>,
}

impl ManufacturerData {
    pub fn new(company_id: u16, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            company_id,
            payload: payload.into(),
        }
    }

    /// Encode into the AD structure body
    pub fn encode(&self) -> Vec<u8> {
        encode(self.company_id, &self.payload)
    }

    /// Decode from an AD structure body
    pub fn decode(raw: &[u8]) -> Result<Self> {
        decode(raw)
    }
}

impl fmt::Display for ManufacturerData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}:{}", self.company_id, hex::encode(&self.payload))
    }
}

/// Encode a company id and payload
pub fn encode(company_id: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(COMPANY_ID_LEN + payload.len());
    out.extend_from_slice(&company_id.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Decode an AD structure body into its company id and payload
pub fn decode(raw: &[u8]) -> Result<ManufacturerData> {
    if raw.len() < COMPANY_ID_LEN {
        return Err(PeripheralError::MalformedData { len: raw.len() });
    }
    let (prefix, payload) = raw.split_at(COMPANY_ID_LEN);
    Ok(ManufacturerData {
        company_id: u16::from_le_bytes([prefix[0], prefix[1]]),
        payload: payload.to_vec(),
    })
}
