//! WolfElect Error Types

use thiserror::Error;

/// Result type alias for WolfElect operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfElect error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Payload validation errors
    #[error("Invalid node id {value:?}: {reason}")]
    InvalidNodeId { value: String, reason: String },

    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    // Bus errors
    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Bus frame serialization error: {0}")]
    FrameSerialization(#[from] bincode::Error),

    #[error("Bus frame checksum mismatch")]
    FrameChecksum,

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Election node has stopped")]
    NodeStopped,
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionTimeout(_)
                | Error::ConnectionFailed { .. }
                | Error::Network(_)
                | Error::Bus(_)
                | Error::Redis(_)
        )
    }

    /// Check if this error came from a malformed payload rather than the transport
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::InvalidNodeId { .. } | Error::UnknownChannel(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let invalid = Error::InvalidNodeId {
            value: "nope".into(),
            reason: "not a uuid".into(),
        };
        assert!(invalid.is_validation());
        assert!(!invalid.is_retryable());

        let bus = Error::Bus("broker went away".into());
        assert!(bus.is_retryable());
        assert!(!bus.is_validation());

        assert!(Error::ConnectionTimeout("127.0.0.1:7700".into()).is_retryable());
        assert!(!Error::NodeStopped.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::ConnectionFailed {
            address: "broker:7700".into(),
            reason: "refused".into(),
        };
        assert_eq!(err.to_string(), "Connection failed to broker:7700: refused");
    }
}
