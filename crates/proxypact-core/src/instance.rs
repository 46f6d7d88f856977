//! One remote instance: a peer's stable device-level identity.
//!
//! A `RemoteInstance` is created the first time a valid handshake
//! arrives for an unknown `(user_id, instance_id)` pair, or loaded
//! from storage at startup. It is updated on every later handshake
//! (duplicates included) and on every consent change, persisted after
//! every mutation by the owning [`User`](crate::user::User), and never
//! deleted automatically — it represents a durable trust relationship
//! that only an explicit full reset clears.

use proxypact_protocol::InstanceHandshake;
use proxypact_types::{InstanceId, KeyHash, UserId};

use crate::consent::{ConsentAction, ConsentState};
use crate::records::InstanceRecord;

// ---------------------------------------------------------------------------
// RemoteInstance
// ---------------------------------------------------------------------------

/// Stable identity and consent state of one remote installation.
#[derive(Clone, Debug)]
pub struct RemoteInstance {
    instance_id: InstanceId,
    key_hash: KeyHash,
    description: String,
    consent: ConsentState,
}

impl RemoteInstance {
    /// Creates a fresh instance with default (all-false) consent.
    ///
    /// Used on first sight of an instance id; the caller follows up
    /// with [`update_from_handshake`](Self::update_from_handshake) to
    /// populate the remote-asserted fields.
    pub fn new(instance_id: InstanceId) -> Self {
        Self {
            instance_id,
            key_hash: KeyHash::default(),
            description: String::new(),
            consent: ConsentState::default(),
        }
    }

    /// Restores an instance from its persisted record.
    pub fn from_record(record: InstanceRecord) -> Self {
        Self {
            instance_id: record.instance_id,
            key_hash: record.key_hash,
            description: record.description,
            consent: record.consent,
        }
    }

    /// Converts to the persisted record shape.
    ///
    /// Roster info is supplied by the owning user — the instance
    /// itself does not track whose it is.
    pub fn to_record(&self, user_id: &UserId, user_name: Option<&str>) -> InstanceRecord {
        InstanceRecord {
            instance_id: self.instance_id.clone(),
            user_id: user_id.clone(),
            user_name: user_name.map(str::to_string),
            key_hash: self.key_hash.clone(),
            description: self.description.clone(),
            consent: self.consent,
        }
    }

    /// Merges a (possibly duplicate) handshake.
    ///
    /// Idempotent: replaying the same handshake leaves the instance
    /// unchanged. Only the remote-asserted fields move — `key_hash`,
    /// `description`, and the `remote_*` consent bits. Returns `true`
    /// if anything actually changed, so the caller can skip a save.
    pub fn update_from_handshake(&mut self, handshake: &InstanceHandshake) -> bool {
        let mut changed = false;

        if self.key_hash != handshake.key_hash {
            self.key_hash = handshake.key_hash.clone();
            changed = true;
        }
        if self.description != handshake.description {
            self.description = handshake.description.clone();
            changed = true;
        }

        let next = self.consent.update_from_wire(handshake.consent);
        if next != self.consent {
            self.consent = next;
            changed = true;
        }

        changed
    }

    /// Applies one operator consent action.
    ///
    /// Pure transition; persistence is the caller's job. Returns
    /// `true` if the state changed (an unmet precondition is a silent
    /// no-op and returns `false`).
    pub fn apply_consent(&mut self, action: ConsentAction) -> bool {
        let next = self.consent.apply(action);
        let changed = next != self.consent;
        self.consent = next;
        changed
    }

    /// The stable instance identity.
    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// The trust fingerprint from the latest handshake.
    pub fn key_hash(&self) -> &KeyHash {
        &self.key_hash
    }

    /// The device label from the latest handshake.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Current bilateral consent state.
    pub fn consent(&self) -> ConsentState {
        self.consent
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
