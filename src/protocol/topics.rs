//! Topic construction and identifier validation for the TTN v3 MQTT server
//!
//! Identifiers are interpolated into topic levels, so anything that would
//! change the topic structure (level separators, wildcards) is rejected.

use thiserror::Error;

/// Wildcard filter covering every topic under the account
pub const SUBSCRIBE_ALL: &str = "#";

/// Domain suffix of the regional TTN clusters
pub const TTN_CLOUD_DOMAIN: &str = "cloud.thethings.network";

/// Broker host for a region: `{region}.cloud.thethings.network`
pub fn broker_host(region: &str) -> String {
    format!("{region}.{TTN_CLOUD_DOMAIN}")
}

/// Downlink queue push topic: `v3/{user_id}/devices/{device_id}/down/push`
pub fn downlink_push_topic(user_id: &str, device_id: &str) -> String {
    format!("v3/{user_id}/devices/{device_id}/down/push")
}

/// Extract the device id from a `v3/{user}/devices/{device}/...` topic
pub fn device_id_from_topic(topic: &str) -> Option<&str> {
    let mut levels = topic.split('/');
    match (levels.next(), levels.next(), levels.next(), levels.next()) {
        (Some("v3"), Some(user), Some("devices"), Some(device))
            if !user.is_empty() && !device.is_empty() =>
        {
            Some(device)
        }
        _ => None,
    }
}

/// Validate a value that becomes a single topic level
pub fn validate_topic_level(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Empty);
    }

    for ch in value.chars() {
        if matches!(ch, '/' | '+' | '#' | '\0') {
            return Err(ValidationError::InvalidChar(ch));
        }
    }

    Ok(())
}

/// Topic level validation errors
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("identifier cannot be empty")]
    Empty,
    #[error("identifier contains invalid character: '{0}'")]
    InvalidChar(char),
}
