//! proxypact core: consent, reconciliation, and dispatch.
//!
//! Two peers mutually and asymmetrically authorize use of each
//! other's network connection while talking only over an untrusted,
//! asynchronous, out-of-order social-messaging channel. This crate is
//! the part with real invariants: the per-peer consent state machine,
//! the reconciliation of presence and handshake streams into a stable
//! `instance ↔ client` mapping, and the dispatch that ties them to a
//! transport.
//!
//! # Modules
//!
//! - [`consent`] — the pure bilateral consent state machine
//! - [`instance`] — `RemoteInstance`, one peer device's durable identity
//! - [`user`] — the per-peer reconciliation engine
//! - [`network`] — the roster aggregate and its lifecycle
//! - [`command`] — channel API for external callers
//! - [`transport`] — seams implemented by transport adapters
//! - [`context`] — shared dependencies for reconciliation code
//! - [`records`] — persisted record shapes

pub mod command;
pub mod consent;
pub mod context;
mod event_loop;
pub mod instance;
pub mod network;
pub mod records;
pub mod transport;
pub mod user;

pub use command::{InstanceSummary, NetworkCommand, UserSummary};
pub use consent::{ConsentAction, ConsentState};
pub use context::{LocalInstance, NetworkContext};
pub use instance::RemoteInstance;
pub use network::{Network, NetworkState};
pub use records::{InstanceRecord, LocalIdentityRecord, OptionsRecord};
pub use transport::{Outbound, TransportEvent};
pub use user::User;
