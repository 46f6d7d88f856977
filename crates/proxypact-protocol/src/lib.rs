//! Wire protocol for the proxypact consent and presence system.
//!
//! Defines the message envelope exchanged over the social-messaging
//! channel, the closed tagged union of peer message payloads, the
//! instance handshake, and the consent bits that travel on the wire.
//! JSON is the boundary format: envelopes are decoded exactly once, at
//! dispatch, into strictly typed payloads.
//!
//! # Modules
//!
//! - [`message`] — `Envelope`, `PeerMessage`, `InstanceHandshake`, `WireConsent`
//! - [`validation`] — schema checks and the decode/encode boundary

pub mod message;
pub mod validation;

pub use message::{Envelope, InstanceHandshake, PeerMessage, SignalPayload, WireConsent};
pub use validation::{decode_envelope, encode_envelope};
