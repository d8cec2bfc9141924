//! Bridge configuration resolved from the environment
//!
//! Every key is looked up in the process environment first (exact lower-case
//! name, then the upper-case form), then in the optional add-on options file,
//! and finally falls back to the documented default. The resolved
//! [`BridgeConfig`] is immutable and validated before anything touches the
//! network.

use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_MQTT_HOST: &str = "core-mosquitto";
pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_CLIENT_ID: &str = "sensehat-bridge";
pub const DEFAULT_TOPIC_PREFIX: &str = "home/sensehat";
pub const DEFAULT_DISCOVERY_PREFIX: &str = "homeassistant";
pub const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_I2C_BUS: u8 = 1;

/// Options file written by the Home Assistant supervisor for add-ons
pub const ADDON_OPTIONS_PATH: &str = "/data/options.json";

/// Immutable bridge configuration
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BridgeConfig {
    pub mqtt: MqttSection,
    pub topics: TopicSection,
    pub sensor: SensorSection,
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MqttSection {
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub client_id: String,
}

/// Topic namespace shared by state, availability and discovery messages
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TopicSection {
    /// Prefix for state topics, without trailing slash
    pub topic_prefix: String,
    /// Home Assistant discovery prefix
    pub discovery_prefix: String,
}

impl TopicSection {
    /// `{topic_prefix}/status`
    pub fn state_topic(&self) -> String {
        format!("{}/status", self.topic_prefix)
    }

    /// `{topic_prefix}/availability`
    pub fn availability_topic(&self) -> String {
        format!("{}/availability", self.topic_prefix)
    }

    /// `{discovery_prefix}/sensor/{unique_id}/config`
    pub fn discovery_topic(&self, unique_id: &str) -> String {
        format!("{}/sensor/{}/config", self.discovery_prefix, unique_id)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SensorSection {
    /// Seconds between sample ticks (>= 1)
    pub update_interval_secs: u64,
    /// I2C bus the Sense HAT is attached to
    pub i2c_bus: u8,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read options file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse options file: {0}")]
    OptionsParse(#[from] serde_json::Error),
    #[error("Options file must contain a JSON object")]
    OptionsNotObject,
    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Name of the offending field, when the error concerns a single value
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ConfigError::InvalidValue { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// Parsed add-on options file (`/data/options.json` style)
#[derive(Debug, Clone, Default)]
pub struct OptionsFile {
    values: Map<String, Value>,
}

impl OptionsFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        match serde_json::from_str::<Value>(content)? {
            Value::Object(values) => Ok(Self { values }),
            _ => Err(ConfigError::OptionsNotObject),
        }
    }

    /// Scalar value as a string; numbers are rendered, null and nested values ignored
    fn get(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

/// Layered key lookup: environment, then options file
struct Sources<'a, F> {
    env: F,
    options: Option<&'a OptionsFile>,
}

impl<F> Sources<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// First non-blank value; a blank value defers to the next source
    fn get(&self, key: &str) -> Option<String> {
        (self.env)(key)
            .and_then(non_blank)
            .or_else(|| (self.env)(&key.to_uppercase()).and_then(non_blank))
            .or_else(|| self.options.and_then(|o| o.get(key)).and_then(non_blank))
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl BridgeConfig {
    /// Resolve configuration from the process environment and, if present,
    /// an options file. An explicit `options_path` must exist; otherwise the
    /// add-on path is used only when it is a file.
    pub fn load(options_path: Option<&Path>) -> Result<Self, ConfigError> {
        let options = match options_path {
            Some(path) => Some(OptionsFile::load(path)?),
            None => {
                let addon = Path::new(ADDON_OPTIONS_PATH);
                if addon.is_file() {
                    Some(OptionsFile::load(addon)?)
                } else {
                    None
                }
            }
        };
        Self::resolve(|key| std::env::var(key).ok(), options.as_ref())
    }

    /// Resolve configuration from the process environment only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(|key| std::env::var(key).ok(), None)
    }

    /// Resolve configuration from an arbitrary key lookup and options file
    pub fn resolve<F>(env: F, options: Option<&OptionsFile>) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let sources = Sources { env, options };

        let host = sources
            .get("mqtt_host")
            .unwrap_or_else(|| DEFAULT_MQTT_HOST.to_string());
        validate_host(&host)?;

        let port = match sources.get("mqtt_port") {
            Some(raw) => parse_port(&raw)?,
            None => DEFAULT_MQTT_PORT,
        };

        // Password without a username is meaningless for the broker handshake
        let username = sources.get("mqtt_username");
        let password = username.as_ref().and(sources.get("mqtt_password"));

        let client_id = sources
            .get("mqtt_client_id")
            .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string());

        let topic_prefix = normalize_prefix(
            "topic_prefix",
            sources.get("topic_prefix").as_deref(),
            DEFAULT_TOPIC_PREFIX,
        )?;
        let discovery_prefix = normalize_prefix(
            "discovery_prefix",
            sources.get("discovery_prefix").as_deref(),
            DEFAULT_DISCOVERY_PREFIX,
        )?;

        let update_interval_secs = match sources.get("update_interval") {
            Some(raw) => parse_interval(&raw)?,
            None => DEFAULT_UPDATE_INTERVAL_SECS,
        };

        let i2c_bus = match sources.get("i2c_bus") {
            Some(raw) => raw
                .parse::<u8>()
                .map_err(|e| ConfigError::invalid("i2c_bus", &raw, e.to_string()))?,
            None => DEFAULT_I2C_BUS,
        };

        Ok(Self {
            mqtt: MqttSection {
                host,
                port,
                username,
                password,
                client_id,
            },
            topics: TopicSection {
                topic_prefix,
                discovery_prefix,
            },
            sensor: SensorSection {
                update_interval_secs,
                i2c_bus,
            },
        })
    }

    pub fn update_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sensor.update_interval_secs)
    }

    /// Copy with the broker password masked, for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.mqtt.password.is_some() {
            copy.mqtt.password = Some("***".to_string());
        }
        copy
    }
}

fn validate_host(host: &str) -> Result<(), ConfigError> {
    if host.chars().any(char::is_whitespace) {
        return Err(ConfigError::invalid(
            "mqtt_host",
            host,
            "must not contain whitespace",
        ));
    }
    Ok(())
}

fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    let port: u32 = raw
        .parse()
        .map_err(|_| ConfigError::invalid("mqtt_port", raw, "not a number"))?;
    if !(1..=65535).contains(&port) {
        return Err(ConfigError::invalid(
            "mqtt_port",
            raw,
            "must be between 1 and 65535",
        ));
    }
    Ok(port as u16)
}

fn parse_interval(raw: &str) -> Result<u64, ConfigError> {
    let secs: u64 = raw.parse().map_err(|_| {
        ConfigError::invalid("update_interval", raw, "not a whole number of seconds")
    })?;
    if secs == 0 {
        return Err(ConfigError::invalid(
            "update_interval",
            raw,
            "must be at least 1 second",
        ));
    }
    Ok(secs)
}

/// Strip trailing slashes and reject MQTT wildcards
fn normalize_prefix(
    field: &'static str,
    raw: Option<&str>,
    default: &str,
) -> Result<String, ConfigError> {
    let raw = raw.unwrap_or(default);
    let prefix = raw.trim_end_matches('/');
    if prefix.is_empty() {
        return Err(ConfigError::invalid(field, raw, "must not be empty"));
    }
    if prefix.contains(['+', '#']) {
        return Err(ConfigError::invalid(
            field,
            raw,
            "must not contain MQTT wildcards",
        ));
    }
    Ok(prefix.to_string())
}
