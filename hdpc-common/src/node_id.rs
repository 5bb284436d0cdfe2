//! Node addressing

use serde::{Deserialize, Deserializer};

/// A newtype on u8 to enforce a valid node ID (1-127)
///
/// Node 0 is reserved for NMT broadcast and is never assigned to a device, so it cannot be
/// represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u8);

impl NodeId {
    /// The lowest assignable node ID
    pub const MIN: NodeId = NodeId(1);
    /// The highest assignable node ID
    pub const MAX: NodeId = NodeId(127);

    /// Validate `value` as a device address
    pub const fn new(value: u8) -> Result<Self, InvalidNodeIdError> {
        match value {
            1..=127 => Ok(NodeId(value)),
            _ => Err(InvalidNodeIdError(value)),
        }
    }

    /// The address as it appears in COB-IDs and NMT frames
    pub const fn raw(&self) -> u8 {
        self.0
    }
}

impl core::fmt::Display for NodeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<NodeId> for u8 {
    fn from(id: NodeId) -> u8 {
        id.0
    }
}

impl TryFrom<u8> for NodeId {
    type Error = InvalidNodeIdError;

    fn try_from(raw: u8) -> Result<Self, InvalidNodeIdError> {
        Self::new(raw)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u8::deserialize(deserializer)?;
        NodeId::new(raw).map_err(serde::de::Error::custom)
    }
}

/// A value outside 1..=127 was used as a node address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidNodeIdError(pub u8);

impl core::fmt::Display for InvalidNodeIdError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "node ID {} is outside 1..=127", self.0)
    }
}

impl core::error::Error for InvalidNodeIdError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_range() {
        assert_eq!(Err(InvalidNodeIdError(0)), NodeId::new(0));
        assert_eq!(1, NodeId::new(1).unwrap().raw());
        assert_eq!(127, NodeId::new(127).unwrap().raw());
        assert!(NodeId::try_from(128).is_err());
        assert!(NodeId::try_from(255).is_err());
    }
}
