//! State Management Module
//!
//! Heartbeat membership tracking and the election state machine.

mod membership;
pub mod election;

pub use membership::{majority_threshold, MembershipTracker, PeerRecord, PeerSummary};
pub use election::{ElectionState, ElectionStateMachine, ElectionStatus, NodeRole};
