//! Persisted record shapes.
//!
//! One JSON record per storage key (layout in `proxypact_storage::keys`).
//! Records are the only consent data that survives a restart; whatever
//! is in memory must never drift ahead of what was last written.

use proxypact_types::{InstanceId, KeyHash, UserId};
use serde::{Deserialize, Serialize};

use crate::consent::ConsentState;

// ---------------------------------------------------------------------------
// InstanceRecord
// ---------------------------------------------------------------------------

/// Durable state of one remote instance, stored under
/// `instance/<instance_id>`.
///
/// Carries enough roster info (`user_id`, `user_name`) to rebuild the
/// owning user at startup without any other per-user record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Stable instance identity.
    pub instance_id: InstanceId,
    /// Peer identity this instance belongs to.
    pub user_id: UserId,
    /// Last known display name of the peer, if any arrived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    /// Opaque trust fingerprint from the latest handshake.
    pub key_hash: KeyHash,
    /// Human label from the latest handshake.
    pub description: String,
    /// Full bilateral consent state.
    pub consent: ConsentState,
}

// ---------------------------------------------------------------------------
// LocalIdentityRecord
// ---------------------------------------------------------------------------

/// Durable local identity, stored under `me`.
///
/// Generated on first run and kept for the lifetime of the profile;
/// remote peers key their trust in us on this instance id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocalIdentityRecord {
    /// Our stable instance identity.
    pub instance_id: InstanceId,
    /// Our trust fingerprint.
    pub key_hash: KeyHash,
}

// ---------------------------------------------------------------------------
// OptionsRecord
// ---------------------------------------------------------------------------

/// Operator settings, stored under `options`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OptionsRecord {
    /// Device label sent in our handshakes.
    pub description: String,
}
