//! Bus Client
//!
//! [`MessageBus`] implementation backed by a [`BrokerServer`](super::BrokerServer).
//! Publishing reuses one connection; each subscription holds its own.

use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

use super::{read_frame, write_frame, BusFrame};
use crate::bus::{BusEvent, MessageBus};
use crate::error::{Error, Result};

/// Delay between subscription reconnect attempts
const RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// Buffered deliveries per subscription
const SUBSCRIPTION_QUEUE: usize = 1024;

/// TCP client for the bus broker
pub struct TcpBus {
    /// Broker address
    address: String,
    /// Connection timeout
    connect_timeout: Duration,
    /// Publish connection, opened on first use
    publisher: Mutex<Option<TcpStream>>,
}

impl TcpBus {
    /// Create a new client
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
            publisher: Mutex::new(None),
        }
    }

    /// Connect to the broker
    async fn connect(&self) -> Result<TcpStream> {
        connect(&self.address, self.connect_timeout).await
    }
}

#[async_trait::async_trait]
impl MessageBus for TcpBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut publisher = self.publisher.lock().await;

        if publisher.is_none() {
            *publisher = Some(self.connect().await?);
        }

        let frame = BusFrame::Publish {
            channel: channel.to_string(),
            payload: payload.to_string(),
        };

        if let Some(stream) = publisher.as_mut() {
            if let Err(e) = write_frame(stream, &frame).await {
                // Connection is dead, reconnect on next publish
                *publisher = None;
                return Err(Error::Bus(format!("publish on {} failed: {}", channel, e)));
            }
        }

        Ok(())
    }

    async fn subscribe(&self, channels: &[String]) -> Result<mpsc::Receiver<BusEvent>> {
        let stream = self.connect().await?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_QUEUE);

        let address = self.address.clone();
        let connect_timeout = self.connect_timeout;
        let channels = channels.to_vec();

        tokio::spawn(async move {
            let mut stream = Some(stream);

            while !tx.is_closed() {
                let current = match stream.take() {
                    Some(s) => s,
                    None => match connect(&address, connect_timeout).await {
                        Ok(s) => {
                            tracing::info!("Reconnected to bus broker at {}", address);
                            s
                        }
                        Err(e) => {
                            tracing::debug!("Bus broker unavailable: {}", e);
                            tokio::time::sleep(RECONNECT_DELAY).await;
                            continue;
                        }
                    },
                };

                if let Err(e) = receive(current, &channels, &tx).await {
                    tracing::warn!("Bus subscription to {} lost: {}", address, e);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        });

        Ok(rx)
    }
}

/// Subscribe on `stream` and forward deliveries until it fails or `tx` closes
async fn receive(
    stream: TcpStream,
    channels: &[String],
    tx: &mpsc::Sender<BusEvent>,
) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    write_frame(&mut writer, &BusFrame::Subscribe {
        channels: channels.to_vec(),
    })
    .await?;

    loop {
        match read_frame(&mut reader).await? {
            BusFrame::Deliver { channel, payload } => {
                if tx.send(BusEvent::new(channel, payload)).await.is_err() {
                    return Ok(());
                }
            }
            other => {
                tracing::warn!("Unexpected {} frame from broker", other.type_name());
            }
        }
    }
}

/// Connect to an address
async fn connect(address: &str, connect_timeout: Duration) -> Result<TcpStream> {
    let result = timeout(connect_timeout, TcpStream::connect(address)).await;

    match result {
        Ok(Ok(stream)) => {
            stream.set_nodelay(true)?;
            Ok(stream)
        }
        Ok(Err(e)) => Err(Error::ConnectionFailed {
            address: address.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(Error::ConnectionTimeout(address.to_string())),
    }
}
