//! Envelope codec
//!
//! Pure conversions between application bytes and the TTN JSON envelopes.

use super::messages::DownlinkEnvelope;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::Number;
use thiserror::Error;
use uuid::Uuid;

/// Envelope codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed uplink envelope: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("decoded payload byte {index} out of range: {value}")]
    ByteOutOfRange { index: usize, value: Number },
    #[error("failed to serialize downlink envelope: {0}")]
    Serialization(#[source] serde_json::Error),
}

// Only the path to the bytes array. Sibling fields such as `received_at`
// or `end_device_ids` are never looked at, so their shape cannot fail a decode.
#[derive(Deserialize)]
struct BytesEnvelope {
    #[serde(default)]
    uplink_message: Option<BytesMessage>,
}

#[derive(Deserialize)]
struct BytesMessage {
    #[serde(default)]
    decoded_payload: Option<BytesPayload>,
}

#[derive(Deserialize)]
struct BytesPayload {
    #[serde(default)]
    bytes: Option<Vec<Number>>,
}

/// Extract the application bytes from a raw uplink envelope
///
/// Returns `Ok(None)` when any of `uplink_message`, `decoded_payload` or
/// `bytes` is missing. Any element that is not an integer in 0..=255 is an
/// error, never truncated.
pub fn decode_uplink(raw: &[u8]) -> Result<Option<Vec<u8>>, CodecError> {
    let envelope: BytesEnvelope = serde_json::from_slice(raw).map_err(CodecError::Malformed)?;

    let Some(values) = envelope
        .uplink_message
        .and_then(|message| message.decoded_payload)
        .and_then(|payload| payload.bytes)
    else {
        return Ok(None);
    };

    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            value
                .as_u64()
                .and_then(|v| u8::try_from(v).ok())
                .ok_or(CodecError::ByteOutOfRange { index, value })
        })
        .collect::<Result<Vec<u8>, _>>()
        .map(Some)
}

/// Wrap a payload in a downlink push envelope with a fresh correlation id
pub fn encode_downlink(payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    encode_downlink_with_correlation(payload, &Uuid::new_v4().to_string())
}

/// Wrap a payload in a downlink push envelope with the given correlation id
pub fn encode_downlink_with_correlation(
    payload: &[u8],
    correlation_id: &str,
) -> Result<Vec<u8>, CodecError> {
    let envelope =
        DownlinkEnvelope::single(BASE64_STANDARD.encode(payload), correlation_id.to_string());
    serde_json::to_vec(&envelope).map_err(CodecError::Serialization)
}
