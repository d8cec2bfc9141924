//! Configuration loading tests
//!
//! Options files on disk layered under the environment, and the errors that
//! must stop the bridge before any network activity.

use sensehat_mqtt::config::{BridgeConfig, ConfigError, OptionsFile};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

fn options_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{content}").unwrap();
    file
}

fn no_env(_: &str) -> Option<String> {
    None
}

#[test]
fn test_addon_options_file_is_applied() {
    // Arrange: the shape Home Assistant writes to /data/options.json
    let file = options_file(
        r#"{
            "mqtt_host": "192.168.1.20",
            "mqtt_port": 1884,
            "mqtt_username": "hass",
            "mqtt_password": "s3cret",
            "topic_prefix": "garage/sensehat/",
            "update_interval": 30,
            "discovery_prefix": "homeassistant"
        }"#,
    );

    // Act
    let options = OptionsFile::load(file.path()).unwrap();
    let config = BridgeConfig::resolve(no_env, Some(&options)).unwrap();

    // Assert
    assert_eq!(config.mqtt.host, "192.168.1.20");
    assert_eq!(config.mqtt.port, 1884);
    assert_eq!(config.mqtt.username.as_deref(), Some("hass"));
    assert_eq!(config.mqtt.password.as_deref(), Some("s3cret"));
    assert_eq!(config.topics.topic_prefix, "garage/sensehat");
    assert_eq!(config.sensor.update_interval_secs, 30);
}

#[test]
fn test_empty_credentials_in_options_mean_anonymous() {
    // Arrange
    let file = options_file(r#"{"mqtt_username": "", "mqtt_password": ""}"#);

    // Act
    let options = OptionsFile::load(file.path()).unwrap();
    let config = BridgeConfig::resolve(no_env, Some(&options)).unwrap();

    // Assert
    assert_eq!(config.mqtt.username, None);
    assert_eq!(config.mqtt.password, None);
}

#[test]
fn test_environment_beats_options_file() {
    // Arrange
    let file = options_file(r#"{"update_interval": 30, "topic_prefix": "from/file"}"#);
    let options = OptionsFile::load(file.path()).unwrap();

    // Act
    let config = BridgeConfig::resolve(
        |key| (key == "UPDATE_INTERVAL").then(|| "5".to_string()),
        Some(&options),
    )
    .unwrap();

    // Assert
    assert_eq!(config.sensor.update_interval_secs, 5);
    assert_eq!(config.topics.topic_prefix, "from/file");
}

#[test]
fn test_invalid_interval_in_options_names_the_field() {
    // Arrange
    let file = options_file(r#"{"update_interval": 0}"#);
    let options = OptionsFile::load(file.path()).unwrap();

    // Act
    let err = BridgeConfig::resolve(no_env, Some(&options)).unwrap_err();

    // Assert
    assert_eq!(err.field(), Some("update_interval"));
}

#[test]
fn test_explicit_missing_options_file_is_an_error() {
    // Act
    let err =
        BridgeConfig::load(Some(Path::new("/nonexistent/sensehat/options.json"))).unwrap_err();

    // Assert
    assert!(matches!(err, ConfigError::FileRead { .. }));
    assert!(err.to_string().contains("/nonexistent/sensehat/options.json"));
}

#[test]
fn test_malformed_options_file_is_an_error() {
    // Arrange
    let file = options_file("{\"mqtt_host\": ");

    // Act
    let err = BridgeConfig::load(Some(file.path())).unwrap_err();

    // Assert
    assert!(matches!(err, ConfigError::OptionsParse(_)));
}

#[test]
fn test_redacted_toml_rendering() {
    // Arrange
    let file = options_file(r#"{"mqtt_username": "hass", "mqtt_password": "s3cret"}"#);
    let options = OptionsFile::load(file.path()).unwrap();
    let config = BridgeConfig::resolve(no_env, Some(&options)).unwrap();

    // Act
    let rendered = toml::to_string_pretty(&config.redacted()).unwrap();

    // Assert
    assert!(rendered.contains("[mqtt]"));
    assert!(rendered.contains("hass"));
    assert!(!rendered.contains("s3cret"));
}
