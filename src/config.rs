//! Configuration management for the storeftp server
//!
//! Loads the listener address, the passive port range and the storage
//! selector from `config.toml` with environment overrides.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

use crate::server::{PortRange, ServerSettings};

/// Startup configuration. Every value requires a restart to take effect.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// IP address or host name to bind the control connection
    /// Environment: STOREFTP_BIND_ADDRESS
    pub bind_address: String,

    /// Port for the control connection
    /// Environment: STOREFTP_CONTROL_PORT
    pub control_port: u16,

    /// Port range for PASV data connections, `[min, max)`
    pub data_port_min: u16,
    pub data_port_max: u16,

    /// Storage backend selector, e.g. `memory://` or `fs:///srv/ftp`
    /// Environment: STOREFTP_STORAGE
    pub storage: String,
}

impl ServerConfig {
    /// Load configuration from config.toml with environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        Self::build(
            Config::builder()
                .add_source(File::with_name("storeftp/config").required(false))
                .add_source(File::with_name("config").required(false))
                .add_source(Environment::with_prefix("STOREFTP").try_parsing(true)),
        )
    }

    /// Load configuration from a single file, without environment overrides
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::build(Config::builder().add_source(File::from(path)))
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let settings = builder
            .set_default("bind_address", "127.0.0.1")?
            .set_default("control_port", 2121_i64)?
            .set_default("data_port_min", 2122_i64)?
            .set_default("data_port_max", 2222_i64)?
            .set_default("storage", "memory://")?
            .build()?;

        let config: ServerConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validation for all configuration values
    fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_address.trim().is_empty() {
            return Err(ConfigError::Message("bind_address cannot be empty".into()));
        }

        if self.data_port_min >= self.data_port_max {
            return Err(ConfigError::Message(
                "data_port_min must be less than data_port_max".into(),
            ));
        }

        if self.storage.trim().is_empty() {
            return Err(ConfigError::Message("storage cannot be empty".into()));
        }

        Ok(())
    }

    /// Get data port range for PASV mode
    pub fn data_port_range(&self) -> PortRange {
        PortRange::new(self.data_port_min, self.data_port_max)
    }

    pub fn settings(&self) -> ServerSettings {
        ServerSettings {
            listen_host: self.bind_address.clone(),
            listen_port: self.control_port,
            passive_ports: self.data_port_range(),
        }
    }
}
