//! Testing utilities and mock implementations
//!
//! Scripted broker and sensor doubles for exercising the bridge without a
//! broker or a Sense HAT.

pub mod mocks;

pub use mocks::*;

use crate::config::{BridgeConfig, OptionsFile};

/// Default configuration, independent of the process environment
pub fn test_config() -> BridgeConfig {
    test_config_with(&[])
}

/// Configuration built from `key=value` overrides only
pub fn test_config_with(pairs: &[(&str, &str)]) -> BridgeConfig {
    let owned: Vec<(String, String)> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    BridgeConfig::resolve(
        move |key| {
            owned
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        },
        None::<&OptionsFile>,
    )
    .unwrap_or_else(|e| panic!("invalid test configuration: {e}"))
}
