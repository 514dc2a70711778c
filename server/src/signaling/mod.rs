//! Peer connection negotiation relay.
//!
//! The hub only forwards offer/answer/candidate metadata between two
//! registered connections and announces joins and departures; media flows
//! directly between peers once negotiation completes.

pub mod router;

pub use router::SignalKind;
