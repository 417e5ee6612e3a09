//! Bus Broker
//!
//! TCP publish/subscribe broker. Each publish is fanned out to every
//! connection subscribed to the channel, the publisher included. All
//! subscribers observe publishes in one shared order. Delivery is best
//! effort: a subscriber whose outbound queue is full misses the message.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};

use super::{read_frame, write_frame, BusFrame};
use crate::error::{Error, Result};

/// Outbound queue size per connection
const CONNECTION_QUEUE: usize = 1024;

/// Connection id -> outbound queue
type Subscribers = HashMap<u64, mpsc::Sender<BusFrame>>;

/// Channel name -> subscribers
type SubscriptionMap = Arc<RwLock<HashMap<String, Subscribers>>>;

/// Publish/subscribe broker for election nodes
pub struct BrokerServer {
    /// Bind address
    bind_address: String,
    /// Subscriptions by channel
    subscriptions: SubscriptionMap,
    /// Connection id source
    next_connection: Arc<AtomicU64>,
    /// Shutdown signal
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl BrokerServer {
    /// Create a new broker
    pub fn new(bind_address: String) -> Self {
        let (shutdown_tx, _) = tokio::sync::watch::channel(false);

        Self {
            bind_address,
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            next_connection: Arc::new(AtomicU64::new(1)),
            shutdown: shutdown_tx,
        }
    }

    /// Bind and serve until stopped
    pub async fn start(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.bind_address).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        tracing::info!("Bus broker listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let peer_addr = addr.to_string();
                            let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
                            let subscriptions = Arc::clone(&self.subscriptions);

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(socket, id, peer_addr.clone(), subscriptions).await {
                                    tracing::warn!("Connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Bus broker stopped");
        Ok(())
    }

    /// Stop the broker
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Number of subscribers on a channel
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.subscriptions
            .read()
            .await
            .get(channel)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }
}

/// Handle a single client connection
async fn handle_connection(
    socket: TcpStream,
    id: u64,
    peer_addr: String,
    subscriptions: SubscriptionMap,
) -> Result<()> {
    socket.set_nodelay(true)?;
    let (mut reader, mut writer) = socket.into_split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<BusFrame>(CONNECTION_QUEUE);

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &frame).await {
                tracing::debug!("Write to subscriber failed: {}", e);
                break;
            }
        }
    });

    let result = loop {
        match read_frame(&mut reader).await {
            Ok(BusFrame::Subscribe { channels }) => {
                tracing::debug!("{} subscribed to {:?}", peer_addr, channels);
                let mut subs = subscriptions.write().await;
                for channel in channels {
                    subs.entry(channel).or_default().insert(id, outbound_tx.clone());
                }
            }
            Ok(BusFrame::Publish { channel, payload }) => {
                tracing::trace!("{} published on {}", peer_addr, channel);
                fan_out(&subscriptions, channel, payload).await;
            }
            Ok(other) => {
                tracing::warn!("Unexpected {} frame from {}", other.type_name(), peer_addr);
            }
            Err(Error::Io(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                // Connection closed
                break Ok(());
            }
            Err(e) => break Err(e),
        }
    };

    // Drop every subscription held by this connection
    {
        let mut subs = subscriptions.write().await;
        for channel_subs in subs.values_mut() {
            channel_subs.remove(&id);
        }
        subs.retain(|_, channel_subs| !channel_subs.is_empty());
    }
    writer_task.abort();

    result
}

/// Queue a delivery for every subscriber of `channel`
///
/// Holds the write lock so every subscriber sees publishes in the same order.
async fn fan_out(subscriptions: &SubscriptionMap, channel: String, payload: String) {
    let subs = subscriptions.write().await;
    let Some(targets) = subs.get(&channel) else {
        return;
    };

    let frame = BusFrame::Deliver { channel, payload };
    for (id, tx) in targets {
        if let Err(e) = tx.try_send(frame.clone()) {
            tracing::debug!("Dropped delivery to connection {}: {}", id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broker_creation() {
        let broker = BrokerServer::new("127.0.0.1:0".to_string());

        assert!(!broker.bind_address.is_empty());
        assert_eq!(broker.subscriber_count("p:vote").await, 0);
    }

    #[tokio::test]
    async fn test_publish_is_fanned_out_to_subscribers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let broker = Arc::new(BrokerServer::new(addr.to_string()));
        let server = Arc::clone(&broker);
        tokio::spawn(async move { server.serve(listener).await });

        let sub = TcpStream::connect(addr).await.unwrap();
        let (mut sub_reader, mut sub_writer) = sub.into_split();
        write_frame(&mut sub_writer, &BusFrame::Subscribe {
            channels: vec!["p:vote".into()],
        })
        .await
        .unwrap();

        // Wait for the subscription to register
        for _ in 0..100 {
            if broker.subscriber_count("p:vote").await == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(broker.subscriber_count("p:vote").await, 1);

        let mut publisher = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut publisher, &BusFrame::Publish {
            channel: "p:heartbeat".into(),
            payload: "not delivered".into(),
        })
        .await
        .unwrap();
        write_frame(&mut publisher, &BusFrame::Publish {
            channel: "p:vote".into(),
            payload: "delivered".into(),
        })
        .await
        .unwrap();

        let frame = read_frame(&mut sub_reader).await.unwrap();
        assert_eq!(frame, BusFrame::Deliver {
            channel: "p:vote".into(),
            payload: "delivered".into(),
        });

        // Subscriptions go away with the connection
        drop(sub_reader);
        drop(sub_writer);
        for _ in 0..100 {
            if broker.subscriber_count("p:vote").await == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(broker.subscriber_count("p:vote").await, 0);

        broker.stop();
    }
}
