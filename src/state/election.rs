//! Leader Election
//!
//! Heartbeat-and-majority election over a publish/subscribe bus. Every node
//! tracks the peers it hears heartbeats from; when it sees no live leader it
//! calls an election, peers vote for the caller, and a caller holding votes
//! from a majority of its active network claims power.
//!
//! There are no terms. The most recently processed claim-power message
//! decides the leader, and a node always votes for the most recent caller.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use serde::{Deserialize, Serialize};

use crate::bus::{BusEvent, ChannelKind, ChannelNames, MessageBus};
use crate::error::{Error, Result};
use crate::id::NodeId;
use crate::state::membership::{MembershipTracker, PeerSummary};

/// Role of a node, derived from its election state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    /// No leader known and no election running
    Idle,
    /// Election running, collecting votes
    Candidate,
    /// Another node is the leader
    Follower,
    /// This node is the leader
    Leader,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Idle => write!(f, "IDLE"),
            NodeRole::Candidate => write!(f, "CANDIDATE"),
            NodeRole::Follower => write!(f, "FOLLOWER"),
            NodeRole::Leader => write!(f, "LEADER"),
        }
    }
}

/// Mutable election state of one node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElectionState {
    /// Leader from the last processed claim-power message
    pub leader_id: Option<NodeId>,
    /// Whether an election is in progress
    pub in_election: bool,
    /// Votes naming this node since the last claim
    pub votes_for_self: usize,
}

/// Point-in-time view of a node, published to queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionStatus {
    pub node_id: NodeId,
    pub leader_id: Option<NodeId>,
    pub role: NodeRole,
    pub is_leader: bool,
    pub in_election: bool,
    pub votes_for_self: usize,
    pub active_network_size: usize,
    pub majority_required_size: usize,
}

/// Election state machine for one node
///
/// Owns all mutable election state. Methods take `&mut self`, so a single
/// owner (the node event loop) serializes every transition.
pub struct ElectionStateMachine {
    /// This node's ID
    node_id: NodeId,
    /// Channel names on the bus
    channels: ChannelNames,
    /// Bus used for every outbound message
    bus: Arc<dyn MessageBus>,
    /// Peers heard on the heartbeat channel
    membership: MembershipTracker,
    /// Leader, election flag and vote tally
    state: ElectionState,
}

impl ElectionStateMachine {
    /// Create a new state machine
    pub fn new(
        node_id: NodeId,
        channels: ChannelNames,
        bus: Arc<dyn MessageBus>,
        heartbeat_interval: Duration,
    ) -> Self {
        tracing::info!("This node id: {}", node_id);
        Self {
            node_id,
            channels,
            bus,
            membership: MembershipTracker::new(heartbeat_interval),
            state: ElectionState::default(),
        }
    }

    /// This node's ID
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Current election state
    pub fn state(&self) -> &ElectionState {
        &self.state
    }

    /// Membership tracker
    pub fn membership(&self) -> &MembershipTracker {
        &self.membership
    }

    /// Called once when the node starts
    pub async fn start(&mut self) -> Result<()> {
        self.call_election().await
    }

    // ========== Queries ==========

    /// Whether this node is the leader
    pub fn is_leader(&self) -> bool {
        self.state.leader_id == Some(self.node_id)
    }

    /// Whether an election is in progress
    pub fn is_in_election(&self) -> bool {
        self.state.in_election
    }

    /// Number of peers currently considered alive
    pub fn active_network_size(&self) -> usize {
        self.membership.size()
    }

    /// Votes needed to win an election right now
    pub fn majority_required_size(&self) -> usize {
        self.membership.majority_threshold()
    }

    /// Current role
    pub fn role(&self) -> NodeRole {
        match self.state.leader_id {
            _ if self.state.in_election => NodeRole::Candidate,
            Some(leader) if leader == self.node_id => NodeRole::Leader,
            Some(_) => NodeRole::Follower,
            None => NodeRole::Idle,
        }
    }

    /// Snapshot of the node
    pub fn status(&self) -> ElectionStatus {
        ElectionStatus {
            node_id: self.node_id,
            leader_id: self.state.leader_id,
            role: self.role(),
            is_leader: self.is_leader(),
            in_election: self.is_in_election(),
            votes_for_self: self.state.votes_for_self,
            active_network_size: self.active_network_size(),
            majority_required_size: self.majority_required_size(),
        }
    }

    /// Summaries of tracked peers
    pub fn peers(&self) -> Vec<PeerSummary> {
        self.membership.summaries(Instant::now())
    }

    // ========== Inbound messages ==========

    /// Dispatch a bus event to the matching handler
    ///
    /// Events on unknown channels and payloads that are not v4 node ids are
    /// logged and dropped without touching any state. Errors returned from
    /// here are transport errors from the handler's own publishes.
    pub async fn handle_event(&mut self, event: BusEvent) -> Result<()> {
        let (kind, id) = match self.parse_event(&event) {
            Ok(parsed) => parsed,
            Err(e) if e.is_validation() => {
                tracing::warn!("Dropped message on {}: {}", event.channel, e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        match kind {
            ChannelKind::Heartbeat => {
                self.receive_heartbeat(id);
                Ok(())
            }
            ChannelKind::CallElection => self.receive_call_election(id).await,
            ChannelKind::Vote => self.receive_vote(id).await,
            ChannelKind::ClaimPower => {
                self.receive_claim_power(id);
                Ok(())
            }
        }
    }

    /// Resolve the channel and node id carried by a bus event
    pub fn parse_event(&self, event: &BusEvent) -> Result<(ChannelKind, NodeId)> {
        let kind = self
            .channels
            .resolve(&event.channel)
            .ok_or_else(|| Error::UnknownChannel(event.channel.clone()))?;
        let id = NodeId::parse(&event.payload)?;
        Ok((kind, id))
    }

    /// A peer is alive
    pub fn receive_heartbeat(&mut self, id: NodeId) {
        self.membership.record_heartbeat(id);
    }

    /// A peer called an election: refresh membership, then vote for it
    pub async fn receive_call_election(&mut self, caller: NodeId) -> Result<()> {
        tracing::debug!("Election called by {}", caller);
        self.state.in_election = true;
        self.vote_in_election(caller).await
    }

    async fn vote_in_election(&mut self, caller: NodeId) -> Result<()> {
        self.emit_heartbeat().await?;
        self.sweep(Instant::now());

        if self.state.in_election {
            self.publish(ChannelKind::Vote, caller).await?;
            tracing::debug!("Voted for {}", caller);
        }

        Ok(())
    }

    /// A vote was cast; only votes naming this node are counted
    pub async fn receive_vote(&mut self, voted_for: NodeId) -> Result<()> {
        if voted_for != self.node_id {
            tracing::debug!("A vote for a different node");
            return Ok(());
        }

        self.state.votes_for_self += 1;
        tracing::debug!(
            "A node voted for me ({}/{})",
            self.state.votes_for_self,
            self.majority_required_size()
        );

        if self.state.in_election && self.state.votes_for_self >= self.majority_required_size() {
            self.claim_power().await?;
        }

        Ok(())
    }

    /// A node claimed power; the latest claim always wins
    pub fn receive_claim_power(&mut self, winner: NodeId) {
        self.state.leader_id = Some(winner);
        self.state.in_election = false;
        self.state.votes_for_self = 0;

        tracing::info!("The leader is now [{}]", winner);
        if winner == self.node_id {
            tracing::info!("I am the LEADER");
        } else {
            tracing::info!("I am a FOLLOWER");
        }
    }

    // ========== Outbound actions ==========

    /// Publish this node's id on the heartbeat channel
    pub async fn emit_heartbeat(&self) -> Result<()> {
        self.publish(ChannelKind::Heartbeat, self.node_id).await
    }

    /// Start an election unless one is already running
    pub async fn call_election(&mut self) -> Result<()> {
        if self.state.in_election {
            return Ok(());
        }

        tracing::info!("Calling an election");
        self.state.in_election = true;
        if let Err(e) = self.publish(ChannelKind::CallElection, self.node_id).await {
            // Nobody heard the call, so leave the next leader check free to retry
            self.state.in_election = false;
            return Err(e);
        }
        Ok(())
    }

    /// Announce this node as leader
    pub async fn claim_power(&mut self) -> Result<()> {
        tracing::info!("Claiming power");
        self.state.in_election = false;
        self.state.votes_for_self = 0;
        self.publish(ChannelKind::ClaimPower, self.node_id).await
    }

    // ========== Timer ticks ==========

    /// Prune peers that have gone quiet
    pub fn sweep(&mut self, now: Instant) -> Vec<NodeId> {
        self.membership.sweep(now)
    }

    /// Whether the known leader is still heard on the heartbeat channel
    pub fn leader_is_connected(&mut self, now: Instant) -> bool {
        let leader = self.state.leader_id;
        self.sweep(now);
        leader.is_some_and(|id| self.membership.contains(&id))
    }

    /// Periodic check: call an election if the leader is unknown or gone
    pub async fn leader_check(&mut self, now: Instant) -> Result<()> {
        if self.leader_is_connected(now) {
            return Ok(());
        }

        if let Some(leader) = self.state.leader_id {
            tracing::warn!("Leader [{}] is no longer connected", leader);
        }
        self.call_election().await
    }

    async fn publish(&self, kind: ChannelKind, id: NodeId) -> Result<()> {
        self.bus
            .publish(&self.channels.name(kind), &id.to_payload())
            .await
    }
}
