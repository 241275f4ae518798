//! Runner configuration.
//!
//! Loaded from YAML. Every field has a default, so a partial file (or no
//! file at all) yields a usable configuration.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use gcom_common::Endpoint;
use gcom_companion::DEFAULT_COMPANION_PORT;
use gcom_relay::{DEFAULT_AUTOPILOT_ADDRESS, DEFAULT_AUTOPILOT_PORT, GCS_COMPONENT_ID, GCS_SYSTEM_ID};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level runner configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcomConfig {
    /// Default tracing filter. `RUST_LOG` takes precedence.
    pub log_filter: String,
    pub companion: CompanionConfig,
    pub autopilot: AutopilotConfig,
}

impl Default for GcomConfig {
    fn default() -> Self {
        GcomConfig {
            log_filter: "info".to_string(),
            companion: CompanionConfig::default(),
            autopilot: AutopilotConfig::default(),
        }
    }
}

/// Companion link listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanionConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    /// Resume a dropped companion session instead of resetting it.
    pub auto_resume: bool,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        CompanionConfig {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_COMPANION_PORT,
            auto_resume: true,
        }
    }
}

/// Autopilot bridge client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutopilotConfig {
    pub address: String,
    pub port: u16,
    /// Connect as soon as the runner starts.
    pub autostart: bool,
    /// MAVLink identity of this ground station.
    pub system_id: u8,
    pub component_id: u8,
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        AutopilotConfig {
            address: DEFAULT_AUTOPILOT_ADDRESS.to_string(),
            port: DEFAULT_AUTOPILOT_PORT,
            autostart: true,
            system_id: GCS_SYSTEM_ID,
            component_id: GCS_COMPONENT_ID,
        }
    }
}

impl AutopilotConfig {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.address.clone(), self.port)
    }
}

/// Command-line values that replace file settings when present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub companion_port: Option<u16>,
    pub autopilot_address: Option<String>,
    pub autopilot_port: Option<u16>,
    pub log_filter: Option<String>,
}

impl GcomConfig {
    /// Parse a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes as null rather than an empty map.
        if yaml.trim().is_empty() {
            return Ok(GcomConfig::default());
        }
        let config: GcomConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    /// Load `path` if given, otherwise use defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(GcomConfig::default()),
        }
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(port) = overrides.companion_port {
            self.companion.port = port;
        }
        if let Some(address) = overrides.autopilot_address {
            self.autopilot.address = address;
        }
        if let Some(port) = overrides.autopilot_port {
            self.autopilot.port = port;
        }
        if let Some(filter) = overrides.log_filter {
            self.log_filter = filter;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.autopilot.address.trim().is_empty() {
            return Err(ConfigError::Invalid("autopilot.address is empty".to_string()));
        }
        if self.autopilot.system_id == 0 {
            return Err(ConfigError::Invalid("autopilot.system_id 0 is reserved for broadcast".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_document() {
        let yaml = r#"
log_filter: debug
companion:
  bind_address: 127.0.0.1
  port: 5000
  auto_resume: false
autopilot:
  address: 10.0.0.7
  port: 5760
  autostart: false
  system_id: 250
  component_id: 190
"#;
        let config = GcomConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.log_filter, "debug");
        assert_eq!(config.companion.bind_address, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.companion.port, 5000);
        assert!(!config.companion.auto_resume);
        assert_eq!(config.autopilot.endpoint(), Endpoint::new("10.0.0.7", 5760));
        assert!(!config.autopilot.autostart);
        assert_eq!((config.autopilot.system_id, config.autopilot.component_id), (250, 190));
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config = GcomConfig::from_yaml("companion:\n  port: 6000\n").unwrap();
        assert_eq!(config.companion.port, 6000);
        assert!(config.companion.auto_resume);
        assert_eq!(config.autopilot, AutopilotConfig::default());
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(GcomConfig::from_yaml("").unwrap(), GcomConfig::default());
        assert_eq!(GcomConfig::from_yaml("  \n").unwrap(), GcomConfig::default());
    }

    #[test]
    fn test_defaults_match_link_defaults() {
        let config = GcomConfig::default();
        assert_eq!(config.companion.port, 42069);
        assert_eq!(config.autopilot.endpoint().to_string(), "127.0.0.1:14550");
        assert_eq!((config.autopilot.system_id, config.autopilot.component_id), (2, 1));
    }

    #[test]
    fn test_overrides_replace_only_given_fields() {
        let mut config = GcomConfig::default();
        config.apply(Overrides {
            autopilot_port: Some(5762),
            log_filter: Some("gcom_relay=trace".to_string()),
            ..Default::default()
        });
        assert_eq!(config.autopilot.port, 5762);
        assert_eq!(config.autopilot.address, DEFAULT_AUTOPILOT_ADDRESS);
        assert_eq!(config.companion.port, DEFAULT_COMPANION_PORT);
        assert_eq!(config.log_filter, "gcom_relay=trace");
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            GcomConfig::from_yaml("autopilot:\n  system_id: 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            GcomConfig::from_yaml("companion:\n  port: not-a-port\n"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_yaml_round_trip() {
        let mut config = GcomConfig::default();
        config.autopilot.autostart = false;
        let yaml = config.to_yaml().unwrap();
        assert_eq!(GcomConfig::from_yaml(&yaml).unwrap(), config);
    }

    #[test]
    fn test_missing_file() {
        let err = GcomConfig::load("/nonexistent/gcom.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/gcom.yaml"));
    }
}
