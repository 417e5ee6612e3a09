//! Redis Bus
//!
//! [`MessageBus`] over Redis pub/sub. Publishes go through a
//! [`ConnectionManager`], which reconnects on its own; each subscription
//! holds a dedicated pub/sub connection and re-subscribes after a drop.
//! Redis delivers a client's own publishes back to it like any other.

use std::time::Duration;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, IntoConnectionInfo};
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::{BusEvent, MessageBus};
use crate::error::{Error, Result};

/// Delay between subscription reconnect attempts
const RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// Buffered deliveries per subscription
const SUBSCRIPTION_QUEUE: usize = 1024;

/// Redis pub/sub client
pub struct RedisBus {
    /// Client used to open pub/sub connections
    client: Client,
    /// Connection used for PUBLISH
    publisher: ConnectionManager,
    /// Connection timeout
    connect_timeout: Duration,
    /// Server address, for logging
    server: String,
}

impl RedisBus {
    /// Connect to the Redis server at `url`, selecting database `db`
    pub async fn connect(url: &str, db: i64, connect_timeout: Duration) -> Result<Self> {
        let client = open_client(url, db)?;
        let server = client.get_connection_info().addr.to_string();

        let publisher = match timeout(connect_timeout, ConnectionManager::new(client.clone())).await {
            Ok(result) => result?,
            Err(_) => return Err(Error::ConnectionTimeout(server)),
        };
        tracing::info!("Redis connected: {}", server);

        Ok(Self {
            client,
            publisher,
            connect_timeout,
            server,
        })
    }
}

#[async_trait::async_trait]
impl MessageBus for RedisBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.publisher.clone();
        let _receivers: i64 = conn.publish(channel, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, channels: &[String]) -> Result<mpsc::Receiver<BusEvent>> {
        let pubsub = open_pubsub(&self.client, channels, self.connect_timeout, &self.server).await?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_QUEUE);

        let client = self.client.clone();
        let connect_timeout = self.connect_timeout;
        let server = self.server.clone();
        let channels = channels.to_vec();

        tokio::spawn(async move {
            let mut pubsub = Some(pubsub);

            while !tx.is_closed() {
                let current = match pubsub.take() {
                    Some(p) => p,
                    None => match open_pubsub(&client, &channels, connect_timeout, &server).await {
                        Ok(p) => {
                            tracing::info!("Redis subscription restored: {}", server);
                            p
                        }
                        Err(e) => {
                            tracing::debug!("Redis unavailable: {}", e);
                            tokio::time::sleep(RECONNECT_DELAY).await;
                            continue;
                        }
                    },
                };

                let mut messages = current.into_on_message();
                while let Some(msg) = messages.next().await {
                    let payload: String = match msg.get_payload() {
                        Ok(payload) => payload,
                        Err(e) => {
                            tracing::warn!(
                                "Unreadable payload on {}: {}",
                                msg.get_channel_name(),
                                e
                            );
                            continue;
                        }
                    };

                    let event = BusEvent::new(msg.get_channel_name(), payload);
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }

                tracing::error!("Redis error: subscription to {} closed", server);
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        });

        Ok(rx)
    }
}

/// Build a client for `url` with database `db` selected
fn open_client(url: &str, db: i64) -> Result<Client> {
    let mut info = url
        .into_connection_info()
        .map_err(|e| Error::Config(format!("invalid redis url {:?}: {}", url, e)))?;
    info.redis.db = db;
    Ok(Client::open(info)?)
}

/// Open a pub/sub connection subscribed to `channels`
async fn open_pubsub(
    client: &Client,
    channels: &[String],
    connect_timeout: Duration,
    server: &str,
) -> Result<redis::aio::PubSub> {
    let mut pubsub = match timeout(connect_timeout, client.get_async_pubsub()).await {
        Ok(result) => result?,
        Err(_) => return Err(Error::ConnectionTimeout(server.to_string())),
    };

    for channel in channels {
        pubsub.subscribe(channel).await?;
    }

    Ok(pubsub)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ChannelNames;
    use crate::id::NodeId;
    use crate::node::{ElectionHandle, ElectionNode, NodeOptions};
    use std::sync::Arc;

    #[test]
    fn test_client_selects_database() {
        let client = open_client("redis://10.0.0.7:6380", 3).unwrap();
        let info = client.get_connection_info();

        assert_eq!(info.redis.db, 3);
        assert_eq!(info.addr.to_string(), "10.0.0.7:6380");
    }

    #[test]
    fn test_invalid_url_is_config_error() {
        let err = open_client("http://localhost:6379", 0).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_connection_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = RedisBus::connect(
            &format!("redis://{}", addr),
            0,
            Duration::from_millis(500),
        )
        .await;
        assert!(result.err().unwrap().is_retryable());
    }

    /// Needs a Redis server: `REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn test_cluster_elects_leader_over_redis() {
        let Ok(url) = std::env::var("REDIS_URL") else {
            return;
        };

        let interval = Duration::from_millis(50);
        let options = NodeOptions {
            channels: ChannelNames::new(format!("wolfelect-test-{}", NodeId::generate())),
            heartbeat_interval: interval,
            leader_check_min: interval * 3,
            leader_check_max: interval * 6,
            queue_capacity: 256,
        };

        let mut handles: Vec<ElectionHandle> = Vec::new();
        for _ in 0..3 {
            let bus = Arc::new(RedisBus::connect(&url, 0, Duration::from_secs(2)).await.unwrap());
            let (handle, _join) = ElectionNode::spawn(NodeId::generate(), bus, options.clone())
                .await
                .unwrap();
            handles.push(handle);
        }

        timeout(Duration::from_secs(20), async {
            loop {
                let statuses: Vec<_> = handles.iter().map(|h| h.status()).collect();
                let leader = statuses[0].leader_id;
                if leader.is_some()
                    && statuses.iter().all(|s| s.leader_id == leader && !s.in_election)
                {
                    return;
                }
                tokio::time::sleep(interval).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(handles.iter().filter(|h| h.is_leader()).count(), 1);
        for handle in &handles {
            handle.shutdown().await.unwrap();
        }
    }
}
