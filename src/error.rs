//! Error taxonomy for the bridge
//!
//! [`BridgeError`] carries only what stops the process: invalid configuration
//! and signal handler setup. [`SessionError`] and [`SensorError`] never reach
//! it; the session manager turns them into a retry with backoff and the
//! sample loop into a skipped tick.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

pub use crate::config::ConfigError;
pub use crate::sensor::SensorError;
pub use crate::transport::SessionError;

/// Top-level error type for bridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration invalid: {0}")]
    ConfigInvalid(#[from] ConfigError),

    #[error("Signal handler setup failed: {0}")]
    Signal(#[source] std::io::Error),
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|passwd|token|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

static CREDENTIAL_URL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"://[^/@\s]+@").expect("credential url pattern is valid"));

const MAX_MESSAGE_LEN: usize = 500;

/// Redact credentials and bound the length of error text before it is logged
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = SECRET_PATTERN
        .replace_all(message, "${1}=***")
        .to_string();
    sanitized = CREDENTIAL_URL_PATTERN
        .replace_all(&sanitized, "://***@")
        .to_string();

    if sanitized.len() > MAX_MESSAGE_LEN {
        let suffix = "...[truncated]";
        let mut cut = MAX_MESSAGE_LEN - suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], suffix);
    }

    sanitized
}
