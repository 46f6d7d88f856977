//! Core shared types for the proxypact consent and presence system.
//!
//! This crate defines all fundamental types used across the workspace.
//! No other crate should define shared types — everything lives here.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// UserId
// ---------------------------------------------------------------------------

/// Stable identifier for a remote person across all of their devices
/// and sessions.
///
/// Assigned by the social network; never rotates. All durable state is
/// keyed on a `UserId` (directly or via an instance), never on a
/// transient client id.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a new `UserId` from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the identifier is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// ClientId
// ---------------------------------------------------------------------------

/// A single transient session/device connection for a peer identity.
///
/// Client ids rotate: the same person reconnecting from the same device
/// gets a fresh client id, and a client id may later be reassigned by
/// the network. Nothing durable may be keyed on a `ClientId` alone.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Creates a new `ClientId` from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the identifier is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ClientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// InstanceId
// ---------------------------------------------------------------------------

/// Stable device-level identity established via handshake.
///
/// Peer-generated, never reused across identities. An instance outlives
/// any particular `ClientId` currently carrying it: the same instance
/// reconnects under fresh client ids over its lifetime.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Creates a new `InstanceId` from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the identifier is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for InstanceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// KeyHash
// ---------------------------------------------------------------------------

/// Opaque trust fingerprint asserted by a remote instance.
///
/// The core stores and compares it verbatim; interpretation belongs to
/// the data plane.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyHash(String);

impl KeyHash {
    /// Creates a new `KeyHash` from any string-like value.
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    /// Returns the fingerprint as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KeyHash {
    fn from(hash: &str) -> Self {
        Self(hash.to_string())
    }
}

impl From<String> for KeyHash {
    fn from(hash: String) -> Self {
        Self(hash)
    }
}

// ---------------------------------------------------------------------------
// Timestamp
// ---------------------------------------------------------------------------

/// UTC timestamp in RFC 3339 format.
///
/// All timestamps use UTC so that event times are comparable across
/// peers regardless of timezone.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a `Timestamp` representing the current UTC time.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a `Timestamp` from a `DateTime<Utc>`.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the inner `DateTime<Utc>`.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

// ---------------------------------------------------------------------------
// ClientStatus
// ---------------------------------------------------------------------------

/// Presence status of one remote client, as reported by the social
/// network transport.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientStatus {
    /// The client is online and runs this protocol.
    Online,
    /// The client is online with a plain chat app that does not speak
    /// this protocol. Such clients are never handshaken.
    OnlineWithOtherApp,
    /// The client disconnected.
    Offline,
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::OnlineWithOtherApp => write!(f, "online_with_other_app"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

// ---------------------------------------------------------------------------
// ClientState
// ---------------------------------------------------------------------------

/// A presence event for one client of one peer identity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientState {
    /// Peer identity this client belongs to.
    pub user_id: UserId,
    /// The transient client id carrying the presence.
    pub client_id: ClientId,
    /// Reported status.
    pub status: ClientStatus,
    /// Transport-assigned event time.
    pub timestamp: Timestamp,
}

// ---------------------------------------------------------------------------
// UserProfile
// ---------------------------------------------------------------------------

/// Roster profile for a peer identity, delivered by the transport.
///
/// May arrive before, after, or never relative to presence and
/// handshake traffic for the same peer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserProfile {
    /// Peer identity the profile describes.
    pub user_id: UserId,
    /// Display name on the social network.
    pub name: String,
    /// Transport-assigned event time.
    pub timestamp: Timestamp,
}

// ---------------------------------------------------------------------------
// CoreEvent
// ---------------------------------------------------------------------------

/// Events emitted by the core to its consumer (UI, policy layer, and
/// the data-plane proxy).
///
/// The core never acts on policy itself: offers surface as events and
/// the consumer decides whether to respond.
#[derive(Clone, Debug)]
pub enum CoreEvent {
    /// A roster entry changed (presence, name, instances, or consent).
    /// Consumers re-read the user summary.
    UserUpdated {
        /// Peer identity whose state changed.
        user_id: UserId,
    },
    /// The first handshake ever seen from an instance asserted that the
    /// remote is offering access.
    OfferReceived {
        /// Peer identity the offering instance belongs to.
        user_id: UserId,
        /// The offering instance.
        instance_id: InstanceId,
    },
    /// Opaque signalling payload from the remote acting as a client
    /// peer, to be forwarded to the data plane.
    SignalFromClientPeer {
        /// Originating peer identity.
        user_id: UserId,
        /// Originating instance.
        instance_id: InstanceId,
        /// Uninterpreted signalling payload.
        payload: serde_json::Value,
    },
    /// Opaque signalling payload from the remote acting as a server
    /// peer, to be forwarded to the data plane.
    SignalFromServerPeer {
        /// Originating peer identity.
        user_id: UserId,
        /// Originating instance.
        instance_id: InstanceId,
        /// Uninterpreted signalling payload.
        payload: serde_json::Value,
    },
}

// ---------------------------------------------------------------------------
// ProxypactError
// ---------------------------------------------------------------------------

/// Central error type for the proxypact system.
///
/// All crates in the workspace convert their internal errors into
/// variants of this enum, ensuring a unified error handling surface.
#[derive(Debug, Error)]
pub enum ProxypactError {
    /// An identifier is empty or otherwise malformed.
    #[error("invalid identifier: {reason}")]
    InvalidIdentifier {
        /// Human-readable description of the problem.
        reason: String,
    },

    /// A message is malformed, missing required fields, or fails
    /// validation.
    #[error("invalid message: {reason}")]
    InvalidMessage {
        /// Human-readable description of the validation failure.
        reason: String,
    },

    /// A protocol-level error (serialization, schema, routing).
    #[error("protocol error: {reason}")]
    ProtocolError {
        /// Human-readable description of the protocol failure.
        reason: String,
    },

    /// A storage operation failed.
    #[error("storage error: {reason}")]
    StorageError {
        /// Human-readable description of the storage failure.
        reason: String,
    },

    /// A load was requested for a key that does not exist.
    #[error("no record stored under key '{key}'")]
    MissingRecord {
        /// The absent storage key.
        key: String,
    },

    /// A transport/network operation failed.
    #[error("network error: {reason}")]
    NetworkError {
        /// Human-readable description of the network failure.
        reason: String,
    },

    /// A configuration value is invalid or missing.
    #[error("config error: {reason}")]
    ConfigError {
        /// Human-readable description of the configuration problem.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Result alias
// ---------------------------------------------------------------------------

/// Convenience result type using [`ProxypactError`].
pub type Result<T> = std::result::Result<T, ProxypactError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
