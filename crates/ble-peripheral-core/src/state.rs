//! Radio status and the peripheral state derived from it

use serde::{Deserialize, Serialize};

use crate::error::PeripheralError;
use crate::radio::RadioInfo;

/// Outcome of the asynchronous default-radio resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioStatus {
    Pending,
    Ready(RadioInfo),
    Unsupported(String),
    Failed(String),
}

impl RadioStatus {
    pub(crate) fn from_resolution(result: Result<RadioInfo, PeripheralError>) -> Self {
        match result {
            Ok(info) => Self::Ready(info),
            Err(PeripheralError::Unsupported { reason }) => Self::Unsupported(reason),
            Err(e) => Self::Failed(e.to_string()),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn info(&self) -> Option<&RadioInfo> {
        match self {
            Self::Ready(info) => Some(info),
            _ => None,
        }
    }

    /// Radio resolved and powered; `Err` carries the reason otherwise
    pub fn usable(&self) -> Result<&RadioInfo, PeripheralError> {
        match self {
            Self::Ready(info) if info.powered => Ok(info),
            Self::Ready(_) => Err(PeripheralError::radio_unavailable("radio is powered off")),
            Self::Pending => Err(PeripheralError::radio_unavailable(
                "default radio has not been resolved yet",
            )),
            Self::Unsupported(reason) | Self::Failed(reason) => {
                Err(PeripheralError::radio_unavailable(reason.clone()))
            }
        }
    }
}

/// Peripheral state as reported to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PeripheralState {
    /// Radio not (yet) resolved
    Unknown,
    /// No BLE peripheral support on this platform
    Unsupported,
    PoweredOff,
    Idle,
    Advertising,
}

impl PeripheralState {
    pub(crate) fn derive(radio: &RadioStatus, advertising: bool) -> Self {
        match radio {
            RadioStatus::Pending | RadioStatus::Failed(_) => Self::Unknown,
            RadioStatus::Unsupported(_) => Self::Unsupported,
            RadioStatus::Ready(info) if !info.peripheral_role_supported => Self::Unsupported,
            RadioStatus::Ready(info) if !info.powered => Self::PoweredOff,
            RadioStatus::Ready(_) if advertising => Self::Advertising,
            RadioStatus::Ready(_) => Self::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_state() {
        let ready = RadioStatus::Ready(RadioInfo::new("hci0"));
        assert_eq!(PeripheralState::derive(&RadioStatus::Pending, false), PeripheralState::Unknown);
        assert_eq!(PeripheralState::derive(&ready, false), PeripheralState::Idle);
        assert_eq!(PeripheralState::derive(&ready, true), PeripheralState::Advertising);
        assert_eq!(
            PeripheralState::derive(&RadioStatus::Ready(RadioInfo::new("hci0").with_powered(false)), false),
            PeripheralState::PoweredOff
        );
        assert_eq!(
            PeripheralState::derive(&RadioStatus::Unsupported("no LE".into()), false),
            PeripheralState::Unsupported
        );
        assert_eq!(
            PeripheralState::derive(&RadioStatus::Failed("driver".into()), false),
            PeripheralState::Unknown
        );
    }

    #[test]
    fn test_usable_reasons() {
        assert!(RadioStatus::Ready(RadioInfo::new("hci0")).usable().is_ok());
        for status in [
            RadioStatus::Pending,
            RadioStatus::Ready(RadioInfo::new("hci0").with_powered(false)),
            RadioStatus::Unsupported("no LE".into()),
            RadioStatus::Failed("driver".into()),
        ] {
            assert!(matches!(
                status.usable(),
                Err(PeripheralError::RadioUnavailable { .. })
            ));
        }
    }

    #[test]
    fn test_from_resolution() {
        assert_eq!(
            RadioStatus::from_resolution(Err(PeripheralError::Unsupported { reason: "x".into() })),
            RadioStatus::Unsupported("x".into())
        );
        assert!(matches!(
            RadioStatus::from_resolution(Err(PeripheralError::Radio("boom".into()))),
            RadioStatus::Failed(_)
        ));
    }
}
