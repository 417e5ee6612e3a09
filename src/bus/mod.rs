//! Message Bus Module
//!
//! The only thing election nodes share is a publish/subscribe bus. This
//! module defines the contract every bus implementation satisfies and the
//! four channels the election protocol runs over.

mod memory;
mod redis;

pub use memory::MemoryBus;
pub use self::redis::RedisBus;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

/// A message delivered by the bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusEvent {
    /// Fully qualified channel name
    pub channel: String,
    /// Message payload (a node id for every election channel)
    pub payload: String,
}

impl BusEvent {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Publish/subscribe transport used by election nodes
///
/// Publishing is fire-and-forget: a successful return only means the bus
/// accepted the message. Subscribers receive events in the order the bus
/// delivers them, with no ordering guarantee across channels. A bus delivers
/// a publisher's own messages back to it if it subscribes to the channel.
#[async_trait::async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a payload on a channel
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Subscribe to a set of channels
    async fn subscribe(&self, channels: &[String]) -> Result<mpsc::Receiver<BusEvent>>;
}

/// The four election channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    /// Liveness broadcast of a node id
    Heartbeat,
    /// A node announces its candidacy
    CallElection,
    /// A node casts a vote for a candidate
    Vote,
    /// A node announces it won
    ClaimPower,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 4] = [
        ChannelKind::Heartbeat,
        ChannelKind::ClaimPower,
        ChannelKind::CallElection,
        ChannelKind::Vote,
    ];

    /// Channel name suffix
    pub fn suffix(&self) -> &'static str {
        match self {
            ChannelKind::Heartbeat => "heartbeat",
            ChannelKind::CallElection => "call-election",
            ChannelKind::Vote => "vote",
            ChannelKind::ClaimPower => "claim-power",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.suffix())
    }
}

/// Channel names scoped under a prefix, e.g. `billing:heartbeat`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelNames {
    prefix: String,
}

impl ChannelNames {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Fully qualified name of a channel
    pub fn name(&self, kind: ChannelKind) -> String {
        format!("{}:{}", self.prefix, kind.suffix())
    }

    /// Map a fully qualified name back to its channel
    pub fn resolve(&self, channel: &str) -> Option<ChannelKind> {
        let suffix = channel
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix(':')?;
        ChannelKind::ALL
            .into_iter()
            .find(|kind| kind.suffix() == suffix)
    }

    /// Names of all four channels
    pub fn all(&self) -> Vec<String> {
        ChannelKind::ALL.iter().map(|kind| self.name(*kind)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names() {
        let names = ChannelNames::new("billing");
        assert_eq!(names.name(ChannelKind::Heartbeat), "billing:heartbeat");
        assert_eq!(names.name(ChannelKind::CallElection), "billing:call-election");
        assert_eq!(names.name(ChannelKind::Vote), "billing:vote");
        assert_eq!(names.name(ChannelKind::ClaimPower), "billing:claim-power");
        assert_eq!(names.all().len(), 4);
    }

    #[test]
    fn test_resolve() {
        let names = ChannelNames::new("billing");
        for kind in ChannelKind::ALL {
            assert_eq!(names.resolve(&names.name(kind)), Some(kind));
        }

        assert_eq!(names.resolve("billing:nonsense"), None);
        assert_eq!(names.resolve("other:vote"), None);
        assert_eq!(names.resolve("billingvote"), None);
        assert_eq!(names.resolve("billing-x:vote"), None);
    }
}
