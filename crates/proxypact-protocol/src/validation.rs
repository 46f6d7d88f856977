//! Schema validation and the JSON decode/encode boundary.
//!
//! Envelopes cross the trust boundary exactly once, here. Anything
//! that decodes successfully is structurally sound: routing ids are
//! non-empty and handshake payloads carry a usable instance id.
//! Everything downstream can rely on that and skip re-checking.

use proxypact_types::{ProxypactError, Result};

use crate::message::{Envelope, InstanceHandshake, PeerMessage};

// ---------------------------------------------------------------------------
// Decode / encode
// ---------------------------------------------------------------------------

/// Decodes one envelope from its JSON wire form and validates it.
///
/// # Errors
///
/// - [`ProxypactError::ProtocolError`] if the JSON is malformed.
/// - [`ProxypactError::InvalidMessage`] if required identifiers are
///   empty (see [`validate_envelope`]).
pub fn decode_envelope(raw: &str) -> Result<Envelope> {
    let envelope: Envelope =
        serde_json::from_str(raw).map_err(|e| ProxypactError::ProtocolError {
            reason: format!("malformed envelope JSON: {e}"),
        })?;
    validate_envelope(&envelope)?;
    Ok(envelope)
}

/// Encodes one envelope to its JSON wire form.
///
/// # Errors
///
/// Returns [`ProxypactError::ProtocolError`] if serialization fails
/// (non-string keys in a signal payload, for example).
pub fn encode_envelope(envelope: &Envelope) -> Result<String> {
    serde_json::to_string(envelope).map_err(|e| ProxypactError::ProtocolError {
        reason: format!("failed to encode envelope: {e}"),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Checks the structural invariants of an envelope.
///
/// Sender identifiers must be present — dispatch routes on them.
/// Receiver identifiers are the transport's concern and may be empty
/// on channels that address implicitly.
///
/// # Errors
///
/// Returns [`ProxypactError::InvalidMessage`] naming the offending
/// field.
pub fn validate_envelope(envelope: &Envelope) -> Result<()> {
    if envelope.from_user_id.is_empty() {
        return Err(ProxypactError::InvalidMessage {
            reason: "envelope with empty from_user_id".into(),
        });
    }
    if envelope.from_client_id.is_empty() {
        return Err(ProxypactError::InvalidMessage {
            reason: "envelope with empty from_client_id".into(),
        });
    }
    if let PeerMessage::Instance(handshake) = &envelope.message {
        validate_handshake(handshake)?;
    }
    Ok(())
}

/// Checks the structural invariants of an instance handshake.
///
/// # Errors
///
/// Returns [`ProxypactError::InvalidMessage`] if the instance id is
/// empty — such a handshake could never be reconciled.
pub fn validate_handshake(handshake: &InstanceHandshake) -> Result<()> {
    if handshake.instance_id.is_empty() {
        return Err(ProxypactError::InvalidMessage {
            reason: "instance handshake with empty instance_id".into(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
