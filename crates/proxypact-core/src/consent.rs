//! The bilateral consent state machine.
//!
//! Consent between two peer identities is two unrelated sub-machines,
//! one per proxy direction:
//!
//! - **getter** — the local user wants to use the remote as a proxy;
//! - **giver** — the remote wants to use the local user as a proxy.
//!
//! Each half owns three booleans: the local intent, the remote's
//! mirrored assertion, and an ignore flag. The halves are separate
//! structs on purpose: an action on one direction cannot touch the
//! other's fields, by construction.
//!
//! [`ConsentState::apply`] is a pure, total function. An action whose
//! precondition does not hold is a silent no-op, never an error — the
//! operator may legitimately race against a remote-driven change that
//! invalidated the button they just clicked.

use proxypact_protocol::WireConsent;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ConsentAction
// ---------------------------------------------------------------------------

/// Operator actions on the consent state, one closed enum.
///
/// The first four act on the getter direction, the last four on the
/// giver direction.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsentAction {
    /// Ask the remote for access to its connection.
    Request,
    /// Withdraw a pending request.
    CancelRequest,
    /// Hide the remote's standing offer.
    IgnoreOffer,
    /// Surface a previously ignored offer again.
    UnignoreOffer,
    /// Offer the local connection to the remote.
    Offer,
    /// Withdraw a standing offer.
    CancelOffer,
    /// Hide the remote's standing request.
    IgnoreRequest,
    /// Surface a previously ignored request again.
    UnignoreRequest,
}

impl ConsentAction {
    /// `true` for actions on the getter direction.
    pub fn is_getter(self) -> bool {
        matches!(
            self,
            Self::Request | Self::CancelRequest | Self::IgnoreOffer | Self::UnignoreOffer
        )
    }
}

// ---------------------------------------------------------------------------
// GetterConsent
// ---------------------------------------------------------------------------

/// Consent state for using the remote as a proxy.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct GetterConsent {
    /// The local user asked the remote for access.
    pub local_requests_access_from_remote: bool,
    /// The remote asserted it grants the local user access.
    /// Set only from inbound wire consent, never by local actions.
    pub remote_grants_access_to_local: bool,
    /// The local user is hiding the remote's offer.
    pub ignoring_remote_offer: bool,
}

impl GetterConsent {
    fn request(mut self) -> Self {
        self.local_requests_access_from_remote = true;
        self.ignoring_remote_offer = false;
        self
    }

    fn cancel_request(mut self) -> Self {
        if self.local_requests_access_from_remote {
            self.local_requests_access_from_remote = false;
        }
        self
    }

    fn ignore_offer(mut self) -> Self {
        // There must be an offer to ignore.
        if self.remote_grants_access_to_local {
            self.ignoring_remote_offer = true;
        }
        self
    }

    fn unignore_offer(mut self) -> Self {
        if self.ignoring_remote_offer {
            self.ignoring_remote_offer = false;
        }
        self
    }

    fn update_from_wire(mut self, remote_is_offering: bool) -> Self {
        self.remote_grants_access_to_local = remote_is_offering;
        // A withdrawn offer has nothing left to ignore; if the remote
        // offers again later, the operator sees it fresh.
        if !remote_is_offering {
            self.ignoring_remote_offer = false;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// GiverConsent
// ---------------------------------------------------------------------------

/// Consent state for letting the remote use the local connection.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct GiverConsent {
    /// The local user grants the remote access.
    pub local_grants_access_to_remote: bool,
    /// The remote asserted it wants access from the local user.
    /// Set only from inbound wire consent, never by local actions.
    pub remote_requests_access_from_local: bool,
    /// The local user is hiding the remote's request.
    pub ignoring_remote_request: bool,
}

impl GiverConsent {
    fn offer(mut self) -> Self {
        self.local_grants_access_to_remote = true;
        self.ignoring_remote_request = false;
        self
    }

    fn cancel_offer(mut self) -> Self {
        if self.local_grants_access_to_remote {
            self.local_grants_access_to_remote = false;
        }
        self
    }

    fn ignore_request(mut self) -> Self {
        // There must be a request to ignore.
        if self.remote_requests_access_from_local {
            self.ignoring_remote_request = true;
        }
        self
    }

    fn unignore_request(mut self) -> Self {
        if self.ignoring_remote_request {
            self.ignoring_remote_request = false;
        }
        self
    }

    fn update_from_wire(mut self, remote_is_requesting: bool) -> Self {
        self.remote_requests_access_from_local = remote_is_requesting;
        if !remote_is_requesting {
            self.ignoring_remote_request = false;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// ConsentState
// ---------------------------------------------------------------------------

/// Full bilateral consent state toward one remote peer identity.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConsentState {
    /// Local-as-getter direction.
    pub getter: GetterConsent,
    /// Local-as-giver direction.
    pub giver: GiverConsent,
}

impl ConsentState {
    /// Applies one operator action, returning the new state.
    ///
    /// Pure and total: an action whose precondition does not hold
    /// returns the input unchanged. Getter actions route to the
    /// getter half only, giver actions to the giver half only.
    pub fn apply(self, action: ConsentAction) -> Self {
        match action {
            ConsentAction::Request => Self {
                getter: self.getter.request(),
                ..self
            },
            ConsentAction::CancelRequest => Self {
                getter: self.getter.cancel_request(),
                ..self
            },
            ConsentAction::IgnoreOffer => Self {
                getter: self.getter.ignore_offer(),
                ..self
            },
            ConsentAction::UnignoreOffer => Self {
                getter: self.getter.unignore_offer(),
                ..self
            },
            ConsentAction::Offer => Self {
                giver: self.giver.offer(),
                ..self
            },
            ConsentAction::CancelOffer => Self {
                giver: self.giver.cancel_offer(),
                ..self
            },
            ConsentAction::IgnoreRequest => Self {
                giver: self.giver.ignore_request(),
                ..self
            },
            ConsentAction::UnignoreRequest => Self {
                giver: self.giver.unignore_request(),
                ..self
            },
        }
    }

    /// Merges the remote's wire assertions, returning the new state.
    ///
    /// Only the `remote_*` fields (and the ignore flags they carry)
    /// change; local intents are untouched.
    pub fn update_from_wire(self, wire: WireConsent) -> Self {
        Self {
            getter: self.getter.update_from_wire(wire.is_offering),
            giver: self.giver.update_from_wire(wire.is_requesting),
        }
    }

    /// The consent bits the local side asserts on the wire.
    pub fn to_wire(self) -> WireConsent {
        WireConsent {
            is_requesting: self.getter.local_requests_access_from_remote,
            is_offering: self.giver.local_grants_access_to_remote,
        }
    }

    /// Both sides agreed: the local user may proxy through the remote.
    pub fn can_get(self) -> bool {
        self.getter.local_requests_access_from_remote && self.getter.remote_grants_access_to_local
    }

    /// Both sides agreed: the remote may proxy through the local user.
    pub fn can_give(self) -> bool {
        self.giver.local_grants_access_to_remote && self.giver.remote_requests_access_from_local
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
