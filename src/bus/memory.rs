//! In-Memory Bus
//!
//! A broadcast bus shared by every node in one process. Used to run a whole
//! cluster inside a single binary and as the transport in tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use super::{BusEvent, MessageBus};
use crate::error::{Error, Result};

/// Default broadcast buffer size
const DEFAULT_CAPACITY: usize = 4096;

/// Per-subscription delivery queue size
const SUBSCRIPTION_QUEUE: usize = 1024;

/// In-process publish/subscribe bus
///
/// Cloning a `MemoryBus` yields another handle onto the same bus.
#[derive(Clone)]
pub struct MemoryBus {
    sender: broadcast::Sender<BusEvent>,
    available: Arc<AtomicBool>,
}

impl MemoryBus {
    /// Create a new bus
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new bus with a specific broadcast buffer size
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate an outage: while unavailable every publish is rejected
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Whether publishes are currently accepted
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        if !self.is_available() {
            return Err(Error::Bus(format!("bus unavailable, dropped publish on {}", channel)));
        }

        // No subscribers is not an error, the message is simply lost
        let _ = self.sender.send(BusEvent::new(channel, payload));
        Ok(())
    }

    async fn subscribe(&self, channels: &[String]) -> Result<mpsc::Receiver<BusEvent>> {
        let wanted: HashSet<String> = channels.iter().cloned().collect();
        let mut source = self.sender.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_QUEUE);

        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(event) => {
                        if !wanted.contains(&event.channel) {
                            continue;
                        }
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Subscriber lagged, {} bus messages lost", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(rx)
    }
}
