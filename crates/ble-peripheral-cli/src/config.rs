//! blep configuration file
//!
//! A TOML file with a `[peripheral]` table handed to the controller and a
//! `[cli]` table of command defaults. Missing keys take their defaults.

use std::path::Path;

use ble_peripheral_core::{PeripheralConfig, TEST_COMPANY_ID};
use serde::{Deserialize, Serialize};

use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub peripheral: PeripheralConfig,
    pub cli: CliConfig,
}

/// Defaults for command arguments left off the command line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Company id used by `advertise` without `--company-id`
    pub default_company_id: u16,
    /// Scan length used by `scan` without `--duration`; 0 runs until Ctrl-C
    pub scan_duration_secs: u64,
    /// Print scan results as JSON records
    pub json_output: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            default_company_id: TEST_COMPANY_ID,
            scan_duration_secs: 0,
            json_output: false,
        }
    }
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CliError::Config(format!(
                "Failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.peripheral.max_manufacturer_payload == 0 {
            return Err(CliError::Config(
                "peripheral.max_manufacturer_payload must be at least 1".to_string(),
            ));
        }
        if self.peripheral.radio_init_timeout_ms == 0 {
            return Err(CliError::Config(
                "peripheral.radio_init_timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        assert_eq!(AppConfig::from_toml("").unwrap(), AppConfig::default());
    }

    #[test]
    fn test_partial_tables() {
        let config = AppConfig::from_toml(
            r#"
            [peripheral]
            max_manufacturer_payload = 20
            stop_scan_on_cancel = false

            [cli]
            default_company_id = 89
            "#,
        )
        .unwrap();

        assert_eq!(config.peripheral.max_manufacturer_payload, 20);
        assert!(!config.peripheral.stop_scan_on_cancel);
        assert_eq!(config.peripheral.scan_sink_capacity, 64);
        assert_eq!(config.cli.default_company_id, 89);
        assert!(!config.cli.json_output);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            AppConfig::from_toml("[peripheral]\nmax_manufacturer_payload = 0"),
            Err(CliError::Config(_))
        ));
        assert!(matches!(
            AppConfig::from_toml("[cli]\ndefault_company_id = 70000"),
            Err(CliError::TomlParsing(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            AppConfig::load_from_file("/nonexistent/blep.toml"),
            Err(CliError::Config(_))
        ));
    }
}
