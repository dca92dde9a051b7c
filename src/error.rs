//! Top-level error types for the bridge
//!
//! Only configuration and connection failures cross the bridge boundary as
//! errors the caller must handle. Codec, send and handler failures are
//! contained and logged where they happen.

use crate::config::ConfigError;
use crate::protocol::codec::CodecError;
use crate::protocol::topics::ValidationError;
use crate::transport::mqtt::MqttError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for bridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection error: {0}")]
    Connection(#[from] MqttError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Invalid device id: {0}")]
    InvalidDeviceId(#[from] ValidationError),

    #[error("Bridge already started")]
    AlreadyStarted,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl BridgeError {
    /// Whether the process should abort on this error
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::Config(_) | BridgeError::Connection(_) | BridgeError::Internal { .. }
        )
    }

    /// Create internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

static SECRET_PAIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("valid secret regex")
});

static TTN_API_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"NNSXS\.[A-Za-z0-9.]+").expect("valid api key regex"));

/// Redact credentials before an error message is logged
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = SECRET_PAIR.replace_all(message, "${1}=***");
    let mut sanitized = TTN_API_KEY.replace_all(&sanitized, "NNSXS.***").to_string();

    if sanitized.len() > 500 {
        let truncate_suffix = "...[truncated]";
        let mut cut = 500 - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(truncate_suffix);
    }

    sanitized
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(BridgeError::Config(ConfigError::MissingField("region".into())).is_fatal());
        assert!(
            BridgeError::Connection(MqttError::ConnectionFailedStr("refused".into())).is_fatal()
        );
        assert!(!BridgeError::AlreadyStarted.is_fatal());
        assert!(!BridgeError::InvalidDeviceId(ValidationError::Empty).is_fatal());
    }

    #[test]
    fn test_error_display() {
        let error = BridgeError::Config(ConfigError::MissingField("user_id".into()));
        assert_eq!(
            error.to_string(),
            "Configuration error: Missing required configuration value: user_id"
        );
        assert_eq!(
            BridgeError::internal("boom").to_string(),
            "Internal error: boom"
        );
    }

    #[test]
    fn test_sanitize_ttn_api_key() {
        let message = "connection refused for NNSXS.ABCDEF123.XYZ789 on eu1";
        let sanitized = sanitize_error_message(message);
        assert!(!sanitized.contains("ABCDEF123"));
        assert!(sanitized.contains("NNSXS.***"));
        assert!(sanitized.contains("eu1"));
    }

    #[test]
    fn test_sanitize_key_pairs() {
        let message = "auth failed: password=pass1 access_key=key123 token: tok456";
        let sanitized = sanitize_error_message(message);
        assert!(!sanitized.contains("pass1"));
        assert!(!sanitized.contains("key123"));
        assert!(!sanitized.contains("tok456"));
        assert!(sanitized.contains("password=***"));
    }

    #[test]
    fn test_long_message_truncation() {
        let sanitized = sanitize_error_message(&"x".repeat(600));
        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));

        let exact = sanitize_error_message(&"x".repeat(500));
        assert_eq!(exact.len(), 500);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let sanitized = sanitize_error_message(&"é".repeat(400));
        assert!(sanitized.ends_with("...[truncated]"));
        assert!(sanitized.len() <= 500);
    }

    #[test]
    fn test_sanitize_empty_message() {
        assert_eq!(sanitize_error_message(""), "");
    }
}
