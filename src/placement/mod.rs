//! Deterministic content placement: suffix sharding plus rendezvous-hash
//! replica selection.

pub mod decider;
pub mod sharder;

pub use decider::RendezvousDecider;
pub use sharder::Sharder;
