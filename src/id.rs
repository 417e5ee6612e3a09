//! Node Identity
//!
//! Every process participating in an election is identified by a random
//! version-4 UUID generated once at startup. The same textual form is the
//! payload of every message on the bus, so parsing a payload and validating
//! a node id are the same operation.

use serde::{Deserialize, Serialize};
use uuid::{Uuid, Version};

use crate::error::{Error, Result};

/// Node identifier wrapper type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(Uuid);

impl NodeId {
    /// Generate a fresh random node id
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a bus payload into a node id
    ///
    /// Only well-formed, version-4 UUIDs are accepted. Anything else,
    /// including valid UUIDs of another version, is rejected.
    pub fn parse(value: &str) -> Result<Self> {
        let uuid = Uuid::parse_str(value).map_err(|e| Error::InvalidNodeId {
            value: value.to_string(),
            reason: e.to_string(),
        })?;

        match uuid.get_version() {
            Some(Version::Random) => Ok(Self(uuid)),
            other => Err(Error::InvalidNodeId {
                value: value.to_string(),
                reason: format!("expected a version 4 uuid, got {:?}", other),
            }),
        }
    }

    /// Hyphenated lowercase form, as published on the bus
    pub fn to_payload(&self) -> String {
        self.0.hyphenated().to_string()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl std::str::FromStr for NodeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for NodeId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.to_payload()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_unique_ids() {
        let mut ids = HashSet::new();
        for _ in 0..1000 {
            let id = NodeId::generate();
            assert!(ids.insert(id), "Duplicate node id generated: {}", id);
        }
    }

    #[test]
    fn test_roundtrip_through_payload() {
        let id = NodeId::generate();
        let parsed = NodeId::parse(&id.to_payload()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_rejects_garbage() {
        for bad in ["", "node-1", "not-a-uuid-at-all", "1234"] {
            let err = NodeId::parse(bad).unwrap_err();
            assert!(err.is_validation(), "{bad:?} should be a validation error");
        }
    }

    #[test]
    fn test_rejects_other_uuid_versions() {
        // Nil UUID and a version-1 UUID are well-formed but not v4
        assert!(NodeId::parse("00000000-0000-0000-0000-000000000000").is_err());
        assert!(NodeId::parse("c232ab00-9414-11ec-b3c8-9f6bdeced846").is_err());
    }

    #[test]
    fn test_accepts_uppercase_v4() {
        let id = NodeId::parse("9B2E7B4C-3F1A-4D6E-8A2B-1C3D5E7F9A0B").unwrap();
        assert_eq!(id.to_payload(), "9b2e7b4c-3f1a-4d6e-8a2b-1c3d5e7f9a0b");
    }

    #[test]
    fn test_serde_uses_string_form() {
        let id = NodeId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));

        let bad: std::result::Result<NodeId, _> = serde_json::from_str("\"node-1\"");
        assert!(bad.is_err());
    }
}
