//! Network management: node state, NMT commands and heartbeats

use crate::messages::{cob_id, CanMessage, HEARTBEAT_BASE, NMT_CMD_ID};
use crate::NodeId;

/// Node state as reported in the heartbeat byte
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum NmtState {
    /// Sent once after power up; nodes move on to PreOperational on their own
    Bootup = 0x00,
    /// Only NMT and heartbeat traffic
    Stopped = 0x04,
    /// PDOs are exchanged
    Operational = 0x05,
    /// SDO access only, waiting for a start command
    PreOperational = 0x7F,
}

impl core::fmt::Display for NmtState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            NmtState::Bootup => "Bootup",
            NmtState::Stopped => "Stopped",
            NmtState::Operational => "Operational",
            NmtState::PreOperational => "PreOperational",
        };
        f.write_str(name)
    }
}

/// The heartbeat byte did not hold a known state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnknownNmtState(pub u8);

impl TryFrom<u8> for NmtState {
    type Error = UnknownNmtState;

    fn try_from(raw: u8) -> Result<Self, UnknownNmtState> {
        Ok(match raw {
            0x00 => NmtState::Bootup,
            0x04 => NmtState::Stopped,
            0x05 => NmtState::Operational,
            0x7F => NmtState::PreOperational,
            other => return Err(UnknownNmtState(other)),
        })
    }
}

/// The command specifier byte of an NMT command
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum NmtCommandSpecifier {
    /// Enter Operational
    Start = 0x01,
    /// Enter Stopped
    Stop = 0x02,
    /// Enter PreOperational
    EnterPreOp = 0x80,
    /// Reset the application
    ResetApp = 0x81,
    /// Reset communications
    ResetComm = 0x82,
}

impl TryFrom<u8> for NmtCommandSpecifier {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use NmtCommandSpecifier::*;
        match value {
            0x01 => Ok(Start),
            0x02 => Ok(Stop),
            0x80 => Ok(EnterPreOp),
            0x81 => Ok(ResetApp),
            0x82 => Ok(ResetComm),
            _ => Err(value),
        }
    }
}

/// An NMT command addressed to one node, or to all nodes when `node` is 0
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NmtCommand {
    /// The command to execute
    pub cs: NmtCommandSpecifier,
    /// The target node, or 0 for broadcast
    pub node: u8,
}

impl NmtCommand {
    /// Build the CAN frame carrying this command
    pub fn to_can_message(&self) -> CanMessage {
        CanMessage::new(NMT_CMD_ID, &[self.cs as u8, self.node])
    }
}

impl TryFrom<&CanMessage> for NmtCommand {
    type Error = ();

    fn try_from(msg: &CanMessage) -> Result<Self, Self::Error> {
        if msg.id() != NMT_CMD_ID || msg.data().len() < 2 {
            return Err(());
        }
        let cs = NmtCommandSpecifier::try_from(msg.data()[0]).map_err(|_| ())?;
        Ok(NmtCommand {
            cs,
            node: msg.data()[1],
        })
    }
}

/// A heartbeat message produced by a node
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Heartbeat {
    /// The producing node
    pub node: NodeId,
    /// The toggle bit, only used by node guarding
    pub toggle: bool,
    /// The reported NMT state
    pub state: NmtState,
}

impl Heartbeat {
    /// Build the CAN frame for this heartbeat
    pub fn to_can_message(&self) -> CanMessage {
        let mut byte = self.state as u8;
        if self.toggle {
            byte |= 0x80;
        }
        CanMessage::new(cob_id(HEARTBEAT_BASE, self.node.raw()), &[byte])
    }
}

impl TryFrom<&CanMessage> for Heartbeat {
    type Error = ();

    fn try_from(msg: &CanMessage) -> Result<Self, Self::Error> {
        let (function, node) = msg.id().function_and_node().ok_or(())?;
        if function != HEARTBEAT_BASE || msg.data().is_empty() {
            return Err(());
        }
        let node = NodeId::new(node).map_err(|_| ())?;
        let byte = msg.data()[0];
        let state = NmtState::try_from(byte & 0x7F).map_err(|_| ())?;
        Ok(Heartbeat {
            node,
            toggle: byte & 0x80 != 0,
            state,
        })
    }
}
