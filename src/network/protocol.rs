//! Broker Wire Protocol
//!
//! Frames exchanged between bus clients and the broker. Every frame is a
//! bincode body preceded by a length and CRC32 header.

use serde::{Deserialize, Serialize};

/// Protocol frames for broker communication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusFrame {
    /// Register interest in channels (client to broker)
    Subscribe {
        channels: Vec<String>,
    },

    /// Publish a payload (client to broker)
    Publish {
        channel: String,
        payload: String,
    },

    /// A published payload (broker to subscribed client)
    Deliver {
        channel: String,
        payload: String,
    },
}

impl BusFrame {
    /// Serialize frame to bytes
    pub fn serialize(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize frame from bytes
    pub fn deserialize(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    /// Get the frame type name (for logging)
    pub fn type_name(&self) -> &'static str {
        match self {
            BusFrame::Subscribe { .. } => "Subscribe",
            BusFrame::Publish { .. } => "Publish",
            BusFrame::Deliver { .. } => "Deliver",
        }
    }
}

/// Frame header for length-prefixed messages
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    /// Body length
    pub length: u32,
    /// Body checksum
    pub checksum: u32,
}

impl FrameHeader {
    /// Header size in bytes
    pub const SIZE: usize = 8;

    /// Largest body accepted from the wire
    pub const MAX_BODY: u32 = 64 * 1024;

    /// Create a new frame header
    ///
    /// `data` must be no longer than [`Self::MAX_BODY`].
    pub fn new(data: &[u8]) -> Self {
        Self {
            length: data.len() as u32,
            checksum: crc32fast::hash(data),
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let [l0, l1, l2, l3, c0, c1, c2, c3] = *bytes;
        Self {
            length: u32::from_le_bytes([l0, l1, l2, l3]),
            checksum: u32::from_le_bytes([c0, c1, c2, c3]),
        }
    }
}
