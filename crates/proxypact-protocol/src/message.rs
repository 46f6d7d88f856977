//! Core message types for the proxypact wire protocol.
//!
//! An [`Envelope`] is the unit of delivery on the social-messaging
//! channel. It carries routing identifiers plus one [`PeerMessage`]
//! payload. The payload union is closed and strictly typed; unknown
//! message types decode to [`PeerMessage::Unknown`] so that dispatch
//! can drop them without failing the whole envelope.

use proxypact_types::{ClientId, InstanceId, KeyHash, UserId};
use serde::{Deserialize, Serialize};

/// Opaque signalling payload carried for the data plane.
///
/// The core never interprets it; it is forwarded verbatim to whichever
/// component manages the peer connection.
pub type SignalPayload = serde_json::Value;

// ---------------------------------------------------------------------------
// WireConsent
// ---------------------------------------------------------------------------

/// The only consent bits that travel on the wire.
///
/// Each side asserts its own intents: `is_requesting` mirrors the
/// sender's "I want to use you as a proxy" state and `is_offering`
/// mirrors "you may use me as a proxy". The receiver maps them into
/// the `remote_*` fields of its local consent state; ignore flags and
/// local intents never leave the device.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct WireConsent {
    /// Sender requests access to the receiver's connection.
    pub is_requesting: bool,
    /// Sender offers its connection to the receiver.
    pub is_offering: bool,
}

// ---------------------------------------------------------------------------
// InstanceHandshake
// ---------------------------------------------------------------------------

/// Payload of an `INSTANCE` message: binds the sending client to a
/// stable instance identity and carries trust/consent metadata.
///
/// Re-sent on every reconnect and on every local consent change, so
/// receivers must treat it as idempotent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstanceHandshake {
    /// Stable, sender-generated instance identity.
    pub instance_id: InstanceId,
    /// Opaque trust fingerprint for the sending installation.
    pub key_hash: KeyHash,
    /// Human label for the sending device.
    pub description: String,
    /// The sender's current consent assertions.
    pub consent: WireConsent,
    /// The sender's own user id, when known. Lets a receiver label a
    /// peer it has no roster profile for yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// The sender's display name, same fallback purpose as `user_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

// ---------------------------------------------------------------------------
// PeerMessage
// ---------------------------------------------------------------------------

/// Closed union of peer message payloads, tagged by `type` with the
/// payload under `data`.
///
/// `Unknown` absorbs any tag this build does not recognize; dispatch
/// drops such messages quietly so newer peers can extend the protocol
/// without breaking older ones.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeerMessage {
    /// Instance handshake binding the sending client to its instance.
    Instance(InstanceHandshake),
    /// Data-plane signal from the remote acting as a client peer.
    SignalFromClientPeer(SignalPayload),
    /// Data-plane signal from the remote acting as a server peer.
    SignalFromServerPeer(SignalPayload),
    /// Ask the receiver to (re-)send its instance handshake.
    InstanceRequest,
    /// Any message type this build does not know.
    #[serde(other)]
    Unknown,
}

impl PeerMessage {
    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Instance(_) => "INSTANCE",
            Self::SignalFromClientPeer(_) => "SIGNAL_FROM_CLIENT_PEER",
            Self::SignalFromServerPeer(_) => "SIGNAL_FROM_SERVER_PEER",
            Self::InstanceRequest => "INSTANCE_REQUEST",
            Self::Unknown => "UNKNOWN",
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Unit of delivery on the social-messaging channel.
///
/// Transport adapters fill the routing fields; the core reads
/// `from_user_id`/`from_client_id` to route inbound envelopes and
/// fills all four when sending.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    /// Peer identity of the sender.
    pub from_user_id: UserId,
    /// Client connection the envelope was sent from.
    pub from_client_id: ClientId,
    /// Peer identity of the receiver.
    pub to_user_id: UserId,
    /// Client connection the envelope is addressed to.
    pub to_client_id: ClientId,
    /// The typed payload.
    #[serde(flatten)]
    pub message: PeerMessage,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_message_wire_shape() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let msg = PeerMessage::Instance(InstanceHandshake {
            instance_id: InstanceId::new("i1"),
            key_hash: KeyHash::new("kh"),
            description: "laptop".into(),
            consent: WireConsent::default(),
            user_id: None,
            name: None,
        });
        let json = serde_json::to_value(&msg)?;
        assert_eq!(json["type"], "INSTANCE");
        assert_eq!(json["data"]["instance_id"], "i1");
        Ok(())
    }

    #[test]
    fn instance_request_has_no_data() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_value(&PeerMessage::InstanceRequest)?;
        assert_eq!(json["type"], "INSTANCE_REQUEST");
        assert!(json.get("data").is_none());
        let parsed: PeerMessage = serde_json::from_value(json)?;
        assert!(matches!(parsed, PeerMessage::InstanceRequest));
        Ok(())
    }

    #[test]
    fn unknown_type_is_tolerated() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let parsed: PeerMessage = serde_json::from_str(
            r#"{"type":"HOLOGRAM_TRANSFER","data":{"x":1}}"#,
        )?;
        assert!(matches!(parsed, PeerMessage::Unknown));
        Ok(())
    }

    #[test]
    fn signal_payload_survives_verbatim() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let payload = serde_json::json!({"sdp": "v=0", "seq": 3});
        let msg = PeerMessage::SignalFromServerPeer(payload.clone());
        let round: PeerMessage = serde_json::from_str(&serde_json::to_string(&msg)?)?;
        match round {
            PeerMessage::SignalFromServerPeer(p) => assert_eq!(p, payload),
            other => panic!("unexpected variant: {}", other.kind()),
        }
        Ok(())
    }
}
