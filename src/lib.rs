//! WolfElect - Leader Election over a Publish/Subscribe Bus
//!
//! Nodes that share nothing but a message bus agree on a single leader.
//! Every node broadcasts heartbeats, tracks which peers are alive, and runs
//! a majority-vote election whenever it notices there is no live leader.
//!
//! # Architecture
//!
//! Each node owns one [`ElectionStateMachine`](state::ElectionStateMachine),
//! driven by a single event loop ([`ElectionNode`](node::ElectionNode)) that
//! receives bus deliveries and timer ticks in order. Queries go through an
//! [`ElectionHandle`](node::ElectionHandle) that reads the latest published
//! status.
//!
//! # Features
//!
//! - Heartbeat-based membership with stale peer pruning
//! - Majority-vote elections with randomized leader checks
//! - In-memory bus for single-process clusters and tests
//! - Redis pub/sub bus, plus a TCP broker and client, for multi-process clusters
//! - HTTP status API

pub mod config;
pub mod error;
pub mod id;
pub mod bus;
pub mod state;
pub mod scheduler;
pub mod node;
pub mod network;
pub mod api;

pub use config::WolfElectConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bus::{BusEvent, ChannelKind, ChannelNames, MemoryBus, MessageBus, RedisBus};
    pub use crate::config::WolfElectConfig;
    pub use crate::error::{Error, Result};
    pub use crate::id::NodeId;
    pub use crate::network::{BrokerServer, TcpBus};
    pub use crate::node::{ElectionHandle, ElectionNode, NodeOptions};
    pub use crate::state::{ElectionStateMachine, ElectionStatus, NodeRole};
}
