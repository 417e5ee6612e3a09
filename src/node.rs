//! Election Node
//!
//! Runs one election state machine as an actor. Bus messages and timer
//! ticks are pushed onto a single queue drained by one task, so transitions
//! never interleave. Callers observe the node through an [`ElectionHandle`].

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::bus::{BusEvent, ChannelNames, MessageBus};
use crate::config::WolfElectConfig;
use crate::error::{Error, Result};
use crate::id::NodeId;
use crate::scheduler;
use crate::state::{ElectionStateMachine, ElectionStatus, PeerSummary};

/// Everything the node event loop reacts to
#[derive(Debug)]
pub enum NodeEvent {
    /// Message delivered by the bus
    Bus(BusEvent),
    /// Time to publish a heartbeat
    HeartbeatTick,
    /// Time to prune stale peers
    SweepTick,
    /// Time to check the leader is still alive
    LeaderCheckTick,
    /// Request for the tracked peer list
    Peers(oneshot::Sender<Vec<PeerSummary>>),
    /// Stop the node
    Shutdown,
}

impl NodeEvent {
    /// Get the event type name (for logging)
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeEvent::Bus(_) => "Bus",
            NodeEvent::HeartbeatTick => "HeartbeatTick",
            NodeEvent::SweepTick => "SweepTick",
            NodeEvent::LeaderCheckTick => "LeaderCheckTick",
            NodeEvent::Peers(_) => "Peers",
            NodeEvent::Shutdown => "Shutdown",
        }
    }
}

/// Node runtime options
#[derive(Debug, Clone)]
pub struct NodeOptions {
    /// Election channel names
    pub channels: ChannelNames,
    /// Heartbeat and sweep period
    pub heartbeat_interval: Duration,
    /// Shortest leader check period
    pub leader_check_min: Duration,
    /// Longest leader check period
    pub leader_check_max: Duration,
    /// Event queue capacity
    pub queue_capacity: usize,
}

impl NodeOptions {
    pub fn from_config(config: &WolfElectConfig) -> Self {
        Self {
            channels: ChannelNames::new(config.bus.prefix.clone()),
            heartbeat_interval: config.election.heartbeat_interval(),
            leader_check_min: config.election.leader_check_min(),
            leader_check_max: config.election.leader_check_max(),
            queue_capacity: config.election.event_queue_capacity,
        }
    }
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self::from_config(&WolfElectConfig::default())
    }
}

/// Handle for querying and stopping a running node
#[derive(Clone)]
pub struct ElectionHandle {
    node_id: NodeId,
    status_rx: watch::Receiver<ElectionStatus>,
    events_tx: mpsc::Sender<NodeEvent>,
}

impl ElectionHandle {
    /// This node's ID
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Latest status snapshot
    pub fn status(&self) -> ElectionStatus {
        self.status_rx.borrow().clone()
    }

    /// Whether this node is the leader
    pub fn is_leader(&self) -> bool {
        self.status_rx.borrow().is_leader
    }

    /// Whether an election is in progress
    pub fn is_in_election(&self) -> bool {
        self.status_rx.borrow().in_election
    }

    /// Number of peers currently considered alive
    pub fn active_network_size(&self) -> usize {
        self.status_rx.borrow().active_network_size
    }

    /// Votes needed to win an election right now
    pub fn majority_required_size(&self) -> usize {
        self.status_rx.borrow().majority_required_size
    }

    /// Current leader, if known
    pub fn leader_id(&self) -> Option<NodeId> {
        self.status_rx.borrow().leader_id
    }

    /// Tracked peers, as seen by the event loop
    pub async fn peers(&self) -> Result<Vec<PeerSummary>> {
        let (tx, rx) = oneshot::channel();
        self.events_tx
            .send(NodeEvent::Peers(tx))
            .await
            .map_err(|_| Error::NodeStopped)?;
        rx.await.map_err(|_| Error::NodeStopped)
    }

    /// Wait until the status satisfies `predicate`
    pub async fn wait_until<F>(&self, mut predicate: F) -> Result<ElectionStatus>
    where
        F: FnMut(&ElectionStatus) -> bool,
    {
        let mut rx = self.status_rx.clone();
        let status = rx
            .wait_for(|status| predicate(status))
            .await
            .map_err(|_| Error::NodeStopped)?;
        Ok(status.clone())
    }

    /// Ask the node to stop
    pub async fn shutdown(&self) -> Result<()> {
        self.events_tx
            .send(NodeEvent::Shutdown)
            .await
            .map_err(|_| Error::NodeStopped)
    }
}

/// A running election node
pub struct ElectionNode {
    machine: ElectionStateMachine,
    events_rx: mpsc::Receiver<NodeEvent>,
    status_tx: watch::Sender<ElectionStatus>,
    tasks: Vec<JoinHandle<()>>,
}

impl ElectionNode {
    /// Subscribe to the election channels and start the node
    ///
    /// Returns a handle to the node and the event loop task. The timer tasks
    /// keep the event queue open, so the node runs until
    /// [`ElectionHandle::shutdown`] is called or the runtime stops, even if
    /// every handle has been dropped.
    pub async fn spawn(
        node_id: NodeId,
        bus: Arc<dyn MessageBus>,
        options: NodeOptions,
    ) -> Result<(ElectionHandle, JoinHandle<()>)> {
        let (events_tx, events_rx) = mpsc::channel(options.queue_capacity.max(1));

        let mut inbound = bus.subscribe(&options.channels.all()).await?;
        tracing::info!("Subscribed to {:?}", options.channels.all());

        let machine = ElectionStateMachine::new(
            node_id,
            options.channels.clone(),
            bus,
            options.heartbeat_interval,
        );
        let (status_tx, status_rx) = watch::channel(machine.status());

        let mut tasks = Vec::new();

        // Bus receiver: forwards every delivery into the event queue
        let tx = events_tx.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                if tx.send(NodeEvent::Bus(event)).await.is_err() {
                    break;
                }
            }
            tracing::warn!("Bus subscription closed");
        }));

        tasks.push(tick(options.heartbeat_interval, &events_tx, || NodeEvent::HeartbeatTick));
        tasks.push(tick(options.heartbeat_interval, &events_tx, || NodeEvent::SweepTick));

        let tx = events_tx.clone();
        tasks.push(scheduler::every_jittered(
            options.leader_check_min,
            options.leader_check_max,
            move || {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(NodeEvent::LeaderCheckTick).await;
                }
            },
        ));

        let node = ElectionNode {
            machine,
            events_rx,
            status_tx,
            tasks,
        };
        let join = tokio::spawn(node.run());

        let handle = ElectionHandle {
            node_id,
            status_rx,
            events_tx,
        };

        Ok((handle, join))
    }

    /// Event loop: one event at a time, to completion
    async fn run(mut self) {
        if let Err(e) = self.machine.start().await {
            tracing::warn!("Failed to call election at startup: {}", e);
        }
        self.publish_status();

        while let Some(event) = self.events_rx.recv().await {
            let name = event.type_name();
            tracing::trace!("Handling {}", name);

            let result = match event {
                NodeEvent::Bus(event) => self.machine.handle_event(event).await,
                NodeEvent::HeartbeatTick => self.machine.emit_heartbeat().await,
                NodeEvent::SweepTick => {
                    self.machine.sweep(Instant::now());
                    Ok(())
                }
                NodeEvent::LeaderCheckTick => self.machine.leader_check(Instant::now()).await,
                NodeEvent::Peers(reply) => {
                    let _ = reply.send(self.machine.peers());
                    Ok(())
                }
                NodeEvent::Shutdown => {
                    tracing::info!("Election node {} stopping", self.machine.node_id());
                    break;
                }
            };

            if let Err(e) = result {
                tracing::warn!("{} failed: {}", name, e);
            }

            self.publish_status();
        }

        for task in &self.tasks {
            task.abort();
        }
    }

    fn publish_status(&self) {
        let status = self.machine.status();
        self.status_tx.send_if_modified(|current| {
            if *current != status {
                *current = status;
                true
            } else {
                false
            }
        });
    }
}

/// Push `make()` onto the queue every `period`
fn tick<F>(period: Duration, events_tx: &mpsc::Sender<NodeEvent>, make: F) -> JoinHandle<()>
where
    F: Fn() -> NodeEvent + Send + 'static,
{
    let tx = events_tx.clone();
    scheduler::every(period, move || {
        let tx = tx.clone();
        let event = make();
        async move {
            let _ = tx.send(event).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{ChannelKind, MemoryBus};

    const INTERVAL: Duration = Duration::from_millis(50);

    fn options() -> NodeOptions {
        NodeOptions {
            channels: ChannelNames::new("test"),
            heartbeat_interval: INTERVAL,
            leader_check_min: INTERVAL * 3,
            leader_check_max: INTERVAL * 6,
            queue_capacity: 256,
        }
    }

    async fn cluster(bus: &MemoryBus, size: usize) -> Vec<ElectionHandle> {
        let mut handles = Vec::new();
        for _ in 0..size {
            let (handle, _join) = ElectionNode::spawn(
                NodeId::generate(),
                Arc::new(bus.clone()),
                options(),
            )
            .await
            .unwrap();
            handles.push(handle);
        }
        handles
    }

    /// Wait until every node agrees on one leader and no election is running
    async fn converged(handles: &[ElectionHandle]) -> NodeId {
        let deadline = Instant::now() + Duration::from_secs(30);
        loop {
            let statuses: Vec<ElectionStatus> = handles.iter().map(|h| h.status()).collect();
            let leader = statuses[0].leader_id;
            let agreed = leader.is_some()
                && statuses
                    .iter()
                    .all(|s| s.leader_id == leader && !s.in_election);
            if agreed {
                return leader.unwrap();
            }
            assert!(Instant::now() < deadline, "cluster did not converge: {:?}", statuses);
            tokio::time::sleep(INTERVAL / 5).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cluster_converges_on_one_leader() {
        let bus = MemoryBus::new();
        let handles = cluster(&bus, 3).await;

        let leader = converged(&handles).await;

        let leaders: Vec<_> = handles.iter().filter(|h| h.is_leader()).collect();
        assert_eq!(leaders.len(), 1);
        assert_eq!(leaders[0].node_id(), leader);

        // Every node hears all three heartbeats, its own included
        tokio::time::sleep(INTERVAL * 2).await;
        for handle in &handles {
            assert_eq!(handle.active_network_size(), 3);
            assert_eq!(handle.majority_required_size(), 2);
        }

        // Leadership is stable while the leader keeps beating
        tokio::time::sleep(INTERVAL * 20).await;
        assert_eq!(converged(&handles).await, leader);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lone_node_on_loopback_bus_becomes_leader() {
        // The bus echoes the node's own call, heartbeat and vote back to it,
        // which is enough to reach the majority of a network of one.
        let bus = MemoryBus::new();
        let handles = cluster(&bus, 1).await;

        let status = handles[0]
            .wait_until(|s| s.is_leader)
            .await
            .unwrap();
        assert_eq!(status.active_network_size, 1);
        assert_eq!(status.leader_id, Some(handles[0].node_id()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failover_after_leader_stops() {
        let bus = MemoryBus::new();
        let handles = cluster(&bus, 3).await;
        let old_leader = converged(&handles).await;

        let (stopped, survivors): (Vec<_>, Vec<_>) = handles
            .into_iter()
            .partition(|h| h.node_id() == old_leader);
        stopped[0].shutdown().await.unwrap();

        for handle in &survivors {
            handle
                .wait_until(|s| s.leader_id != Some(old_leader))
                .await
                .unwrap();
        }
        let new_leader = converged(&survivors).await;
        assert_ne!(new_leader, old_leader);

        tokio::time::sleep(INTERVAL * 3).await;
        for handle in &survivors {
            assert_eq!(handle.active_network_size(), 2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_traffic_is_ignored() {
        let bus = MemoryBus::new();
        let handles = cluster(&bus, 3).await;
        let leader = converged(&handles).await;
        let names = ChannelNames::new("test");

        for kind in ChannelKind::ALL {
            bus.publish(&names.name(kind), "definitely-not-a-node").await.unwrap();
        }
        tokio::time::sleep(INTERVAL).await;

        assert_eq!(converged(&handles).await, leader);
        for handle in &handles {
            assert_eq!(handle.active_network_size(), 3);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bus_outage_does_not_stop_node() {
        let bus = MemoryBus::new();
        bus.set_available(false);
        let handles = cluster(&bus, 3).await;

        // Every publish fails, so nothing can be elected
        tokio::time::sleep(INTERVAL * 10).await;
        for handle in &handles {
            assert!(handle.leader_id().is_none());
        }

        bus.set_available(true);
        converged(&handles).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_peers_query_and_shutdown() {
        let bus = MemoryBus::new();
        let handles = cluster(&bus, 2).await;
        converged(&handles).await;
        tokio::time::sleep(INTERVAL * 2).await;

        let peers = handles[0].peers().await.unwrap();
        let ids: Vec<NodeId> = peers.iter().map(|p| p.id).collect();
        assert!(ids.contains(&handles[0].node_id()));
        assert!(ids.contains(&handles[1].node_id()));

        handles[0].shutdown().await.unwrap();
        tokio::time::sleep(INTERVAL).await;
        assert!(matches!(handles[0].peers().await, Err(Error::NodeStopped)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_outlives_dropped_handles() {
        let bus = MemoryBus::new();
        let (handle, join) = ElectionNode::spawn(NodeId::generate(), Arc::new(bus), options())
            .await
            .unwrap();
        drop(handle);

        tokio::time::sleep(INTERVAL * 10).await;
        assert!(!join.is_finished());
        join.abort();
    }
}
