//! Transport seams.
//!
//! The core never talks to a social network directly. Adapters deliver
//! inbound traffic as [`TransportEvent`]s on an mpsc channel and
//! implement [`Outbound`] for sends. Everything network-specific
//! (XMPP, OAuth, reconnect handling) stays on the adapter's side of
//! these two seams.

use async_trait::async_trait;
use proxypact_protocol::Envelope;
use proxypact_types::{ClientId, ClientState, Result, UserProfile};

// ---------------------------------------------------------------------------
// TransportEvent
// ---------------------------------------------------------------------------

/// Inbound events a transport adapter delivers to the core.
///
/// Arrival order across peers is arbitrary; within one peer the
/// adapter must deliver in receipt order (the channel preserves it).
#[derive(Clone, Debug)]
pub enum TransportEvent {
    /// Presence change for one client.
    Presence(ClientState),
    /// Roster profile for one peer identity.
    Profile(UserProfile),
    /// A message envelope from a remote client.
    Message(Envelope),
    /// The transport recovered from a short blip with the session
    /// intact. Handshakes are re-sent so peers that missed ours
    /// resync — re-sending is the recovery mechanism, not timeouts.
    Reconnected,
    /// The transport session ended (logout). All presence and
    /// `client ↔ instance` bookkeeping is session state and is
    /// dropped; durable instances stay.
    Disconnected,
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Outbound send surface implemented by transport adapters.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Delivers one envelope to the given client.
    ///
    /// Adapters may queue internally; an `Ok` return means accepted
    /// for delivery, not delivered. Failures are local to the one
    /// message — the core logs and moves on.
    async fn send(&self, to_client: &ClientId, envelope: Envelope) -> Result<()>;
}
