//! Central configuration
//!
//! Behavior switches for the BLE-MIDI central:
//! - Bonding and auto-connect policy
//! - Adapter handling at startup
//! - Write payload limit fallback
//! - MIDI service identifiers

use crate::transport::ble::gatt::{MidiServiceIds, DEFAULT_MAX_WRITE_LEN, MAX_ATTRIBUTE_LEN};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid max write length: must be 1-512, got {0}")]
    InvalidWriteLength(usize),

    #[error("Invalid MIDI service identifiers: {0}")]
    InvalidServiceIds(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

// ============================================================================
// CENTRAL CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CentralConfig {
    /// Pair with peers before enabling notifications
    pub needs_bonding: bool,

    /// Connect to the first MIDI peer a scan finds
    pub auto_connect: bool,

    /// Switch a disabled adapter on instead of failing setup
    pub enable_adapter_if_disabled: bool,

    /// Write payload limit used when the platform reports none
    pub max_write_len: usize,

    pub midi_service: MidiServiceIds,
}

impl CentralConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_ATTRIBUTE_LEN).contains(&self.max_write_len) {
            return Err(ConfigError::InvalidWriteLength(self.max_write_len));
        }

        let ids = &self.midi_service;
        if ids.service.is_nil() || ids.input_characteristic.is_nil() || ids.output_characteristic.is_nil() {
            return Err(ConfigError::InvalidServiceIds(
                "UUIDs must not be nil".to_string(),
            ));
        }
        if ids.service == ids.input_characteristic || ids.service == ids.output_characteristic {
            return Err(ConfigError::InvalidServiceIds(
                "service UUID reused as characteristic".to_string(),
            ));
        }

        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            needs_bonding: false,
            auto_connect: false,
            enable_adapter_if_disabled: true,
            max_write_len: DEFAULT_MAX_WRITE_LEN,
            midi_service: MidiServiceIds::default(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
