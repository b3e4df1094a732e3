use super::types::*;
use crate::error_handling::types::ConfigError;
use log::debug;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;

/// Application configuration structure that defines all runtime parameters.
///
/// The configuration is read from a TOML file. Every section is optional and falls back to
/// the defaults of its type, only `bind_address` has to be present.
///
/// # Examples
///
/// ```
/// use vmgate::configuration::config::Config;
///
/// let config = Config::from_toml_str(r#"bind_address = "127.0.0.1:8888""#).unwrap();
/// assert_eq!(config.emulator.image, "cusdeb/qemu:6.0-amd64");
/// ```
///
/// # Fields Overview
///
/// - `bind_address`: address the session endpoint listens on
/// - `emulator`: emulator image, container naming and image download location
/// - `control`: monitor control-channel timing and rotation protocol
/// - `visibility`: how long to wait for a launched container to show up in the runtime
/// - `ports`: optional range the monitor, display and tunnel ports are taken from
/// - `directory`: source of entitlements and of the image catalog
/// - `tunnel`: tunnel worker executable
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    pub bind_address: String,
    #[serde(default)]
    pub emulator: EmulatorConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub visibility: VisibilityConfig,
    #[serde(default)]
    pub ports: Option<PortRange>,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub tunnel: TunnelConfig,
}

impl Config {
    /// Reads and validates the configuration file at `path`.
    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        debug!("Reading configuration from {}", path.display());
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Config, ConfigError> {
        let config: Config =
            toml::from_str(raw).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parsed form of `bind_address`.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_address
            .parse()
            .map_err(|_| ConfigError::BadAddress(self.bind_address.clone()))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;

        if let Some(range) = self.ports {
            if range.start == 0 || range.start > range.end {
                return Err(ConfigError::BadPortsRange(format!(
                    "{}-{}",
                    range.start, range.end
                )));
            }
            // a session needs a monitor, a display and a tunnel port
            if range.end - range.start < 2 {
                return Err(ConfigError::BadPortsRange(format!(
                    "{}-{} holds fewer than 3 ports",
                    range.start, range.end
                )));
            }
        }

        if self.emulator.image.trim().is_empty() {
            return Err(ConfigError::EmptyValue(String::from("emulator.image")));
        }
        if !self.emulator.container_name_template.contains("{image_id}") {
            return Err(ConfigError::EmptyValue(String::from(
                "emulator.container_name_template must contain {image_id}",
            )));
        }
        if !(1..=64).contains(&self.emulator.credential_length) {
            return Err(ConfigError::NotInRange(format!(
                "emulator.credential_length = {}",
                self.emulator.credential_length
            )));
        }
        if self.control.completion_marker.is_empty() {
            return Err(ConfigError::EmptyValue(String::from(
                "control.completion_marker",
            )));
        }
        if self.control.connect_attempts == 0
            || self.control.marker_attempts == 0
            || self.visibility.attempts == 0
        {
            return Err(ConfigError::NotInRange(String::from(
                "attempt counts must be at least 1",
            )));
        }
        Ok(())
    }
}
