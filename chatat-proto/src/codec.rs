//! Serialization and deserialization for the `ChatAt` wire protocol.
//!
//! Frames travel as JSON text over the persistent connection. Decoding
//! distinguishes an unknown `type` discriminator (log-and-drop material
//! for the read loop) from a genuinely malformed payload.

use serde_json::Value;

use crate::frame::{FrameType, InboundFrame, OutboundFrame};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The frame has no `type` field.
    #[error("frame is missing the type field")]
    MissingType,
    /// The `type` discriminator names no known inbound frame.
    #[error("unknown frame type: {frame_type}")]
    UnknownType {
        /// The unrecognized discriminator string.
        frame_type: String,
    },
}

/// Encodes an [`OutboundFrame`] into its JSON text representation.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the frame cannot be serialized.
pub fn encode(frame: &OutboundFrame) -> Result<String, CodecError> {
    serde_json::to_string(frame).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes an [`InboundFrame`] from JSON text.
///
/// # Errors
///
/// - [`CodecError::MissingType`] if the record has no `type` field.
/// - [`CodecError::UnknownType`] for a discriminator outside the known set.
/// - [`CodecError::Serialization`] if the payload is malformed.
pub fn decode(text: &str) -> Result<InboundFrame, CodecError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| CodecError::Serialization(e.to_string()))?;
    let Some(frame_type) = value.get("type").and_then(Value::as_str) else {
        return Err(CodecError::MissingType);
    };
    if FrameType::from_wire(frame_type).is_none() {
        return Err(CodecError::UnknownType {
            frame_type: frame_type.to_string(),
        });
    }
    serde_json::from_value(value).map_err(|e| CodecError::Serialization(e.to_string()))
}
