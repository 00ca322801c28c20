// src/settings.rs
//
// Bridge configuration, read from a TOML file. Every key has a default so an
// empty file runs against `can0` and a local broker.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::io::MqttConfig;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub can: CanSettings,
    #[serde(default)]
    pub mqtt: MqttSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Catalog used in place of the built-in DGNs. Not merged with them.
    #[serde(default)]
    pub catalog: Option<PathBuf>,
    /// Floor plan: one table per entity, interpreted by `entity::build_entities`.
    #[serde(default, rename = "entity")]
    pub entities: Vec<toml::Table>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanSettings {
    #[serde(default = "default_interface")]
    pub interface: String,
    /// Our node address on the bus.
    #[serde(default = "default_source_address")]
    pub source_address: u8,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_ingress_capacity")]
    pub ingress_capacity: usize,
    #[serde(default = "default_egress_capacity")]
    pub egress_capacity: usize,
    #[serde(default = "default_egress_timeout_ms")]
    pub egress_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Random per run when unset.
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_topic_base")]
    pub topic_base: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
    /// Republish unclaimed messages as JSON under `<root>/unhandled`.
    #[serde(default)]
    pub publish_unhandled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_level")]
    pub level: String,
    /// Directory for timestamped log files. Stderr only when unset.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_interface() -> String {
    "can0".to_string()
}
fn default_source_address() -> u8 {
    0x82
}
fn default_priority() -> u8 {
    crate::rvc::DEFAULT_PRIORITY
}
fn default_poll_timeout_ms() -> u64 {
    250
}
fn default_ingress_capacity() -> usize {
    1024
}
fn default_egress_capacity() -> usize {
    64
}
fn default_egress_timeout_ms() -> u64 {
    1000
}
fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    1883
}
fn default_topic_base() -> String {
    "rvc2mqtt".to_string()
}
fn default_keep_alive_secs() -> u64 {
    30
}
fn default_command_capacity() -> usize {
    64
}
fn default_level() -> String {
    "info".to_string()
}

impl Default for CanSettings {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            source_address: default_source_address(),
            priority: default_priority(),
            poll_timeout_ms: default_poll_timeout_ms(),
            ingress_capacity: default_ingress_capacity(),
            egress_capacity: default_egress_capacity(),
            egress_timeout_ms: default_egress_timeout_ms(),
        }
    }
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: None,
            password: None,
            client_id: None,
            topic_base: default_topic_base(),
            keep_alive_secs: default_keep_alive_secs(),
            command_capacity: default_command_capacity(),
            publish_unhandled: false,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            log_dir: None,
        }
    }
}

impl CanSettings {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn egress_timeout(&self) -> Duration {
        Duration::from_millis(self.egress_timeout_ms)
    }
}

impl MqttSettings {
    /// Configured client id, or a fresh random one.
    pub fn resolve_client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("rvc2mqtt-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn client_config(&self, client_id: &str, state_topic: String) -> MqttConfig {
        MqttConfig {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            client_id: client_id.to_string(),
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            state_topic,
        }
    }
}

impl Settings {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_file_uses_defaults() {
        let s = Settings::from_toml_str("").unwrap();
        assert_eq!(s.can.interface, "can0");
        assert_eq!(s.can.source_address, 0x82);
        assert_eq!(s.can.priority, 6);
        assert_eq!(s.can.egress_timeout(), Duration::from_secs(1));
        assert_eq!(s.mqtt.port, 1883);
        assert_eq!(s.mqtt.topic_base, "rvc2mqtt");
        assert!(!s.mqtt.publish_unhandled);
        assert_eq!(s.logging.level, "info");
        assert!(s.catalog.is_none());
        assert!(s.entities.is_empty());
    }

    #[test]
    fn test_full_file() {
        let s = Settings::from_toml_str(
            r#"
catalog = "/etc/rvc2mqtt/extra.toml"

[can]
interface = "vcan0"
source_address = 0x90
poll_timeout_ms = 100

[mqtt]
host = "broker.lan"
username = "rv"
password = "secret"
client_id = "coach"
publish_unhandled = true

[logging]
level = "debug"
log_dir = "/var/log/rvc2mqtt"

[[entity]]
type = "dimmer_switch"
name = "DC_DIMMER_STATUS_3"
instance = 32
"#,
        )
        .unwrap();
        assert_eq!(s.can.interface, "vcan0");
        assert_eq!(s.can.source_address, 0x90);
        assert_eq!(s.can.poll_timeout(), Duration::from_millis(100));
        assert_eq!(s.can.ingress_capacity, 1024);
        assert_eq!(s.mqtt.resolve_client_id(), "coach");
        assert!(s.mqtt.publish_unhandled);
        assert_eq!(s.logging.log_dir, Some(PathBuf::from("/var/log/rvc2mqtt")));
        assert_eq!(s.entities.len(), 1);
        assert_eq!(s.entities[0]["instance"].as_integer(), Some(32));

        let cfg = s.mqtt.client_config("coach", "rvc2mqtt/coach/state".to_string());
        assert_eq!(cfg.host, "broker.lan");
        assert_eq!(cfg.keep_alive, Duration::from_secs(30));
    }

    #[test]
    fn test_random_client_id() {
        let m = MqttSettings::default();
        let a = m.resolve_client_id();
        assert!(a.starts_with("rvc2mqtt-"));
        assert_ne!(a, m.resolve_client_id());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[mqtt]\nport = 8883").unwrap();
        let s = Settings::load(file.path()).unwrap();
        assert_eq!(s.mqtt.port, 8883);

        let err = Settings::load(Path::new("/nonexistent/rvc2mqtt.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "[can]\nsource_address = 300").unwrap();
        assert!(matches!(Settings::load(bad.path()), Err(ConfigError::Parse(_))));
    }
}
