// Configuration management for the blemidi CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/blemidi/config.json
// - Linux: ~/.config/blemidi/config.json
// - Windows: %APPDATA%\blemidi\config.json

use anyhow::{Context, Result};
use blemidi_core::CentralConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Core central settings
    pub central: CentralConfig,

    /// Scan duration for `scan`, `listen` and `send` (0 = until stopped)
    pub scan_timeout_ms: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            central: CentralConfig::default(),
            scan_timeout_ms: 10_000,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("blemidi");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            config
                .central
                .validate()
                .context("Invalid central settings in config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value (validated, not saved)
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut updated = self.clone();
        match key {
            "needs_bonding" => {
                updated.central.needs_bonding = value.parse().context("Invalid boolean value")?;
            }
            "auto_connect" => {
                updated.central.auto_connect = value.parse().context("Invalid boolean value")?;
            }
            "enable_adapter_if_disabled" => {
                updated.central.enable_adapter_if_disabled =
                    value.parse().context("Invalid boolean value")?;
            }
            "max_write_len" => {
                updated.central.max_write_len = value.parse().context("Invalid number")?;
            }
            "midi_service" => {
                updated.central.midi_service.service = parse_uuid(value)?;
            }
            "midi_input_characteristic" => {
                updated.central.midi_service.input_characteristic = parse_uuid(value)?;
            }
            "midi_output_characteristic" => {
                updated.central.midi_service.output_characteristic = parse_uuid(value)?;
            }
            "scan_timeout_ms" => {
                updated.scan_timeout_ms = value.parse().context("Invalid number")?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }

        updated.central.validate()?;
        *self = updated;
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        self.list()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        let central = &self.central;
        vec![
            ("needs_bonding".to_string(), central.needs_bonding.to_string()),
            ("auto_connect".to_string(), central.auto_connect.to_string()),
            (
                "enable_adapter_if_disabled".to_string(),
                central.enable_adapter_if_disabled.to_string(),
            ),
            ("max_write_len".to_string(), central.max_write_len.to_string()),
            ("midi_service".to_string(), central.midi_service.service.to_string()),
            (
                "midi_input_characteristic".to_string(),
                central.midi_service.input_characteristic.to_string(),
            ),
            (
                "midi_output_characteristic".to_string(),
                central.midi_service.output_characteristic.to_string(),
            ),
            ("scan_timeout_ms".to_string(), self.scan_timeout_ms.to_string()),
        ]
    }
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).with_context(|| format!("Invalid UUID: {}", value))
}
