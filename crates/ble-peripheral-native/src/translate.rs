//! Conversions from OS advertisement shapes into core types

use std::collections::HashMap;

use ble_peripheral_core::codec;

/// Fold a big-endian six byte MAC into the 48-bit integer form
pub fn mac_to_u64(mac: [u8; 6]) -> u64 {
    mac.iter().fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))
}

/// Raw encoded manufacturer entry with the lowest company id
///
/// Stacks that report manufacturer data as a map lose the on-air order;
/// taking the lowest id keeps repeated reports of one device stable.
pub fn lowest_manufacturer_entry(entries: &HashMap<u16, Vec<u8>>) -> Option<Vec<u8>> {
    entries
        .iter()
        .min_by_key(|(company_id, _)| **company_id)
        .map(|(company_id, payload)| codec::encode(*company_id, payload))
}
