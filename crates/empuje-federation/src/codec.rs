//! Canonical JSON wire format.
//!
//! ```json
//! { "message_id": "…", "type": "donation_request", "organization_id": "org-A",
//!   "timestamp": "2026-01-15T10:00:00Z", "payload": { … } }
//! ```

use chrono::{DateTime, Utc};
use empuje_core::error::SyncError;
use empuje_core::registry::OrganizationId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::messages::{Envelope, Message, MessageType};

/// Errors raised while encoding or decoding a message.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The bytes are not a well-formed envelope.
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The payload does not match the schema of its declared type.
    #[error("payload does not match type {message_type}: {source}")]
    PayloadMismatch {
        /// The declared type.
        message_type: MessageType,
        /// The underlying parse failure.
        #[source]
        source: serde_json::Error,
    },

    /// The message could not be serialized.
    #[error("serialization failed: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl From<CodecError> for SyncError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Serialize(_) => Self::Validation(err.to_string()),
            CodecError::Malformed(_) | CodecError::PayloadMismatch { .. } => {
                Self::Decode(err.to_string())
            }
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    message_id: Uuid,
    #[serde(rename = "type")]
    message_type: MessageType,
    organization_id: OrganizationId,
    timestamp: DateTime<Utc>,
    payload: serde_json::Value,
}

fn payload_value<T: Serialize>(payload: &T) -> Result<serde_json::Value, CodecError> {
    serde_json::to_value(payload).map_err(CodecError::Serialize)
}

fn payload_of<T: DeserializeOwned>(
    message_type: MessageType,
    payload: serde_json::Value,
) -> Result<T, CodecError> {
    serde_json::from_value(payload).map_err(|source| CodecError::PayloadMismatch {
        message_type,
        source,
    })
}

/// Serializes an envelope to its canonical UTF-8 JSON form.
///
/// # Errors
///
/// Returns `CodecError::Serialize` if the payload cannot be represented as
/// JSON.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    let payload = match &envelope.message {
        Message::DonationOffer(p) => payload_value(p)?,
        Message::DonationRequest(p) => payload_value(p)?,
        Message::DonationTransfer(p) => payload_value(p)?,
        Message::RequestCancellation(p) => payload_value(p)?,
        Message::ExternalEvent(p) => payload_value(p)?,
        Message::EventCancellation(p) => payload_value(p)?,
        Message::EventAdhesion(p) => payload_value(p)?,
    };
    let wire = WireEnvelope {
        message_id: envelope.message_id,
        message_type: envelope.message_type(),
        organization_id: envelope.organization_id.clone(),
        timestamp: envelope.timestamp,
        payload,
    };
    serde_json::to_vec(&wire).map_err(CodecError::Serialize)
}

/// Parses an envelope from its canonical JSON form.
///
/// # Errors
///
/// Returns `CodecError::Malformed` if the envelope itself cannot be parsed and
/// `CodecError::PayloadMismatch` if the payload does not fit its declared type.
pub fn decode(bytes: &[u8]) -> Result<Envelope, CodecError> {
    let wire: WireEnvelope = serde_json::from_slice(bytes).map_err(CodecError::Malformed)?;
    let t = wire.message_type;
    let message = match t {
        MessageType::DonationOffer => Message::DonationOffer(payload_of(t, wire.payload)?),
        MessageType::DonationRequest => Message::DonationRequest(payload_of(t, wire.payload)?),
        MessageType::DonationTransfer => Message::DonationTransfer(payload_of(t, wire.payload)?),
        MessageType::RequestCancellation => {
            Message::RequestCancellation(payload_of(t, wire.payload)?)
        }
        MessageType::ExternalEvent => Message::ExternalEvent(payload_of(t, wire.payload)?),
        MessageType::EventCancellation => {
            Message::EventCancellation(payload_of(t, wire.payload)?)
        }
        MessageType::EventAdhesion => Message::EventAdhesion(payload_of(t, wire.payload)?),
    };
    Ok(Envelope {
        message_id: wire.message_id,
        organization_id: wire.organization_id,
        timestamp: wire.timestamp,
        message,
    })
}
