//! Heartbeat Membership Tracking
//!
//! Tracks when each peer was last heard from on the heartbeat channel and
//! prunes peers that have gone quiet. The tracked set is the "active network"
//! used to size election majorities.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use serde::{Deserialize, Serialize};

use crate::id::NodeId;

/// A peer observed on the heartbeat channel
#[derive(Debug, Clone)]
pub struct PeerRecord {
    /// Peer node id
    pub id: NodeId,
    /// Last heartbeat time (monotonic, only moves forward)
    pub last_seen: Instant,
    /// When the peer was first observed
    pub first_seen: chrono::DateTime<chrono::Utc>,
}

impl PeerRecord {
    fn new(id: NodeId, at: Instant) -> Self {
        Self {
            id,
            last_seen: at,
            first_seen: chrono::Utc::now(),
        }
    }

    /// Time since last heartbeat, measured from `now`
    pub fn silent_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }
}

/// Serializable view of a tracked peer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSummary {
    pub id: NodeId,
    pub first_seen: chrono::DateTime<chrono::Utc>,
    pub silent_for_ms: u64,
}

/// Heartbeat-driven membership tracker
#[derive(Debug)]
pub struct MembershipTracker {
    /// Known peers by id
    peers: HashMap<NodeId, PeerRecord>,
    /// Peers silent for longer than this are pruned
    stale_after: Duration,
}

impl MembershipTracker {
    /// Create a tracker that prunes peers after two missed heartbeat intervals
    pub fn new(heartbeat_interval: Duration) -> Self {
        Self {
            peers: HashMap::new(),
            stale_after: heartbeat_interval * 2,
        }
    }

    /// Record a heartbeat received now
    ///
    /// Returns true if the peer was not tracked before.
    pub fn record_heartbeat(&mut self, id: NodeId) -> bool {
        self.record_heartbeat_at(id, Instant::now())
    }

    /// Record a heartbeat received at `at`
    pub fn record_heartbeat_at(&mut self, id: NodeId, at: Instant) -> bool {
        match self.peers.get_mut(&id) {
            Some(peer) => {
                if at > peer.last_seen {
                    peer.last_seen = at;
                }
                false
            }
            None => {
                tracing::info!("Found new node: {}", id);
                self.peers.insert(id, PeerRecord::new(id, at));
                true
            }
        }
    }

    /// Remove every peer that has been silent for longer than the stale window
    ///
    /// Ids are validated on the way in, so staleness is the only reason a
    /// record can be pruned here.
    pub fn sweep(&mut self, now: Instant) -> Vec<NodeId> {
        let stale_after = self.stale_after;
        let removed: Vec<NodeId> = self
            .peers
            .values()
            .filter(|peer| peer.silent_for(now) > stale_after)
            .map(|peer| peer.id)
            .collect();

        for id in &removed {
            self.peers.remove(id);
            tracing::info!("Removed node [{}] from the list", id);
        }

        removed
    }

    /// Whether a peer is currently tracked
    pub fn contains(&self, id: &NodeId) -> bool {
        self.peers.contains_key(id)
    }

    /// Number of tracked peers
    pub fn size(&self) -> usize {
        self.peers.len()
    }

    /// Votes needed to win an election given the current membership
    pub fn majority_threshold(&self) -> usize {
        majority_threshold(self.size())
    }

    /// Summaries of all tracked peers, ordered by id
    pub fn summaries(&self, now: Instant) -> Vec<PeerSummary> {
        let mut peers: Vec<PeerSummary> = self
            .peers
            .values()
            .map(|peer| PeerSummary {
                id: peer.id,
                first_seen: peer.first_seen,
                silent_for_ms: peer.silent_for(now).as_millis() as u64,
            })
            .collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        peers
    }
}

/// Majority of an active network of `size` nodes
pub fn majority_threshold(size: usize) -> usize {
    size / 2 + 1
}
