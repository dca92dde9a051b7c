//! Bridge configuration
//!
//! Values come from a TOML file and may be overridden from the command line
//! or environment. The access key can be given inline or through the name of
//! an environment variable holding it.

use crate::protocol::topics::{broker_host, validate_topic_level};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Main bridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    #[serde(default)]
    pub ttn: TtnSection,
    #[serde(default)]
    pub mqtt: MqttSection,
}

/// TTN account section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TtnSection {
    /// Cluster region, e.g. "eu1", "nam1", "au1"
    pub region: Option<String>,
    /// Application user id, e.g. "my-app@ttn"
    pub user_id: Option<String>,
    /// API key, inline
    pub access_key: Option<String>,
    /// Environment variable containing the API key
    pub access_key_env: Option<String>,
    /// Default target device for locally originated downlinks
    pub device_id: Option<String>,
}

/// MQTT transport section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    pub client_id: Option<String>,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            tls: false,
            keep_alive_secs: default_keep_alive(),
            connect_timeout_secs: default_connect_timeout(),
            client_id: None,
        }
    }
}

fn default_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    30
}

/// Values supplied outside the config file; `Some` wins over the file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub region: Option<String>,
    pub user_id: Option<String>,
    pub access_key: Option<String>,
    pub device_id: Option<String>,
}

/// Validated broker connection parameters
#[derive(Clone, PartialEq)]
pub struct BrokerParams {
    pub region: String,
    pub user_id: String,
    pub access_key: String,
    pub mqtt: MqttSection,
}

impl std::fmt::Debug for BrokerParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerParams")
            .field("region", &self.region)
            .field("user_id", &self.user_id)
            .field("access_key", &"***")
            .field("mqtt", &self.mqtt)
            .finish()
    }
}

impl BrokerParams {
    pub fn new(
        region: impl Into<String>,
        user_id: impl Into<String>,
        access_key: impl Into<String>,
    ) -> Self {
        Self {
            region: region.into(),
            user_id: user_id.into(),
            access_key: access_key.into(),
            mqtt: MqttSection::default(),
        }
    }

    /// `{region}.cloud.thethings.network`
    pub fn host(&self) -> String {
        broker_host(&self.region)
    }

    /// Reject empty values before any connection attempt
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty("region", &self.region)?;
        require_non_empty("user_id", &self.user_id)?;
        require_non_empty("access_key", &self.access_key)?;
        validate_topic_level(&self.user_id)
            .map_err(|e| ConfigError::InvalidValue("user_id".to_string(), e.to_string()))?;
        if self.mqtt.keep_alive_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "keep_alive_secs".to_string(),
                "must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Missing required configuration value: {0}")]
    MissingField(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl BridgeConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply command line / environment overrides on top of file values
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if overrides.region.is_some() {
            self.ttn.region = overrides.region;
        }
        if overrides.user_id.is_some() {
            self.ttn.user_id = overrides.user_id;
        }
        if overrides.access_key.is_some() {
            self.ttn.access_key = overrides.access_key;
        }
        if overrides.device_id.is_some() {
            self.ttn.device_id = overrides.device_id;
        }
    }

    /// Resolve the access key, inline value first, then `access_key_env`
    pub fn access_key(&self) -> Result<String, ConfigError> {
        if let Some(key) = self.ttn.access_key.as_ref().filter(|k| !k.is_empty()) {
            return Ok(key.clone());
        }
        match &self.ttn.access_key_env {
            Some(env_name) => std::env::var(env_name)
                .map_err(|_| ConfigError::EnvVarNotFound(env_name.clone())),
            None => Err(ConfigError::MissingField("access_key".to_string())),
        }
    }

    /// Build validated broker parameters
    pub fn broker_params(&self) -> Result<BrokerParams, ConfigError> {
        let params = BrokerParams {
            region: required("region", self.ttn.region.as_ref())?,
            user_id: required("user_id", self.ttn.user_id.as_ref())?,
            access_key: self.access_key()?,
            mqtt: self.mqtt.clone(),
        };
        params.validate()?;
        Ok(params)
    }

    /// Default downlink target device
    pub fn device_id(&self) -> Result<String, ConfigError> {
        let device_id = required("device_id", self.ttn.device_id.as_ref())?;
        validate_topic_level(&device_id)
            .map_err(|e| ConfigError::InvalidValue("device_id".to_string(), e.to_string()))?;
        Ok(device_id)
    }

    /// Check every required value; fatal at startup
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.broker_params()?;
        self.device_id()?;
        Ok(())
    }

    /// Copy safe to print: the inline access key is masked
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.ttn.access_key.is_some() {
            copy.ttn.access_key = Some("***".to_string());
        }
        copy
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[ttn]
region = "eu1"
user_id = "test-app@ttn"
access_key = "NNSXS.TESTKEY"
device_id = "dev1"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

fn required(name: &str, value: Option<&String>) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.clone()),
        _ => Err(ConfigError::MissingField(name.to_string())),
    }
}

fn require_non_empty(name: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(name.to_string()));
    }
    Ok(())
}
