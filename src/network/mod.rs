//! Network Module
//!
//! TCP transport for the election bus: a small publish/subscribe broker and
//! the client that implements [`MessageBus`](crate::bus::MessageBus) against it.

pub mod protocol;
mod server;
mod client;

pub use protocol::{BusFrame, FrameHeader};
pub use server::BrokerServer;
pub use client::TcpBus;

use crate::error::{Error, Result};

/// Read a framed message from a reader
pub async fn read_frame<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Result<BusFrame> {
    use tokio::io::AsyncReadExt;

    // Read header
    let mut header_bytes = [0u8; FrameHeader::SIZE];
    reader.read_exact(&mut header_bytes).await?;
    let header = FrameHeader::from_bytes(&header_bytes);

    if header.length > FrameHeader::MAX_BODY {
        return Err(Error::Network(format!(
            "Frame of {} bytes exceeds limit of {}",
            header.length,
            FrameHeader::MAX_BODY
        )));
    }

    // Read body
    let mut body = vec![0u8; header.length as usize];
    reader.read_exact(&mut body).await?;

    // Verify checksum
    if crc32fast::hash(&body) != header.checksum {
        return Err(Error::FrameChecksum);
    }

    Ok(BusFrame::deserialize(&body)?)
}

/// Write a framed message to a writer
pub async fn write_frame<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &BusFrame,
) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let body = frame.serialize()?;
    if body.len() > FrameHeader::MAX_BODY as usize {
        return Err(Error::Network(format!(
            "{} frame of {} bytes exceeds limit of {}",
            frame.type_name(),
            body.len(),
            FrameHeader::MAX_BODY
        )));
    }
    let header = FrameHeader::new(&body);

    writer.write_all(&header.to_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_frame_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let frame = BusFrame::Subscribe {
            channels: vec!["p:heartbeat".into(), "p:vote".into()],
        };

        write_frame(&mut a, &frame).await.unwrap();
        assert_eq!(read_frame(&mut b).await.unwrap(), frame);
    }

    #[tokio::test]
    async fn test_corrupted_body_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let body = BusFrame::Publish {
            channel: "p:vote".into(),
            payload: "x".into(),
        }
        .serialize()
        .unwrap();
        let mut header = FrameHeader::new(&body);
        header.checksum ^= 1;

        a.write_all(&header.to_bytes()).await.unwrap();
        a.write_all(&body).await.unwrap();

        assert!(matches!(read_frame(&mut b).await, Err(Error::FrameChecksum)));
    }

    #[tokio::test]
    async fn test_oversized_frame_is_not_written() {
        let (mut a, _b) = tokio::io::duplex(1024);
        let frame = BusFrame::Publish {
            channel: "x".repeat(FrameHeader::MAX_BODY as usize),
            payload: "p".into(),
        };

        assert!(matches!(write_frame(&mut a, &frame).await, Err(Error::Network(_))));
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let header = FrameHeader {
            length: FrameHeader::MAX_BODY + 1,
            checksum: 0,
        };
        a.write_all(&header.to_bytes()).await.unwrap();

        assert!(matches!(read_frame(&mut b).await, Err(Error::Network(_))));
    }
}
