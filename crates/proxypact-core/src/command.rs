//! Commands and summary types for external → network communication.
//!
//! [`NetworkCommand`] is the bounded-channel message type that the UI,
//! RPC handlers, and tests use to drive the network aggregate. Each
//! command that produces a result carries a
//! `tokio::sync::oneshot::Sender` for the reply.
//!
//! All commands are processed sequentially inside the event loop,
//! eliminating race conditions between concurrent callers.

use proxypact_types::{InstanceId, KeyHash, ProxypactError, UserId};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::consent::{ConsentAction, ConsentState};

/// Convenience alias to avoid shadowing `std::result::Result`.
type PResult<T> = std::result::Result<T, ProxypactError>;

// ---------------------------------------------------------------------------
// NetworkCommand
// ---------------------------------------------------------------------------

/// Commands accepted by the network event loop.
pub enum NetworkCommand {
    /// Apply one consent action toward a peer identity.
    ///
    /// The reply resolves only after every touched instance record
    /// has been persisted — callers must not assume the new state is
    /// durable before then.
    ModifyConsent {
        /// The peer the action is directed at.
        user_id: UserId,
        /// The action to apply.
        action: ConsentAction,
        /// Reply channel.
        reply: oneshot::Sender<PResult<()>>,
    },

    /// Snapshot every roster entry.
    GetRoster {
        /// Reply channel.
        reply: oneshot::Sender<Vec<UserSummary>>,
    },

    /// Snapshot one roster entry.
    GetUser {
        /// The peer to look up.
        user_id: UserId,
        /// Reply channel; `None` if the peer is unknown.
        reply: oneshot::Sender<Option<UserSummary>>,
    },

    /// Wipe all persisted state and the in-memory roster.
    Reset {
        /// Reply channel.
        reply: oneshot::Sender<PResult<()>>,
    },

    /// Exit the event loop. Fire-and-forget; await the `JoinHandle`
    /// returned by `Network::start` to confirm completion.
    Shutdown,
}

// Manual Debug because oneshot::Sender does not implement Debug.
impl std::fmt::Debug for NetworkCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ModifyConsent { user_id, action, .. } => f
                .debug_struct("ModifyConsent")
                .field("user_id", user_id)
                .field("action", action)
                .finish_non_exhaustive(),
            Self::GetRoster { .. } => f.write_str("GetRoster"),
            Self::GetUser { user_id, .. } => f
                .debug_struct("GetUser")
                .field("user_id", user_id)
                .finish_non_exhaustive(),
            Self::Reset { .. } => f.write_str("Reset"),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

// ---------------------------------------------------------------------------
// UserSummary
// ---------------------------------------------------------------------------

/// Snapshot of one roster entry.
///
/// All fields are cloned so the reply is self-contained.
#[derive(Clone, Debug, Serialize)]
pub struct UserSummary {
    /// Peer identity.
    pub user_id: UserId,
    /// Display name, when a profile or handshake supplied one.
    pub name: Option<String>,
    /// `true` if any instance currently has an online client.
    pub is_online: bool,
    /// Every known instance of this peer.
    pub instances: Vec<InstanceSummary>,
}

/// Snapshot of one remote instance.
#[derive(Clone, Debug, Serialize)]
pub struct InstanceSummary {
    /// Stable instance identity.
    pub instance_id: InstanceId,
    /// Trust fingerprint from the latest handshake.
    pub key_hash: KeyHash,
    /// Device label from the latest handshake.
    pub description: String,
    /// `true` if a client currently carries this instance online.
    pub is_online: bool,
    /// Full bilateral consent state.
    pub consent: ConsentState,
}
