//! CAN message types and the standard CANopen COB-ID layout

/// A CAN identifier, either an 11-bit standard ID or a 29-bit extended ID
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CanId {
    /// An extended 29-bit identifier
    Extended(u32),
    /// A standard 11-bit identifier
    Std(u16),
}

impl CanId {
    /// Create a new extended ID
    pub const fn extended(id: u32) -> CanId {
        CanId::Extended(id & 0x1FFF_FFFF)
    }

    /// Create a new standard ID
    pub const fn std(id: u16) -> CanId {
        CanId::Std(id & 0x7FF)
    }

    /// Get the raw ID as a u32
    pub fn raw(&self) -> u32 {
        match self {
            CanId::Extended(id) => *id,
            CanId::Std(id) => *id as u32,
        }
    }

    /// Returns true if this ID is an extended ID
    pub fn is_extended(&self) -> bool {
        matches!(self, CanId::Extended(_))
    }

    /// Split a standard ID into its CANopen function code and node ID
    ///
    /// Returns None for extended IDs, which are not used by the predefined connection set.
    pub fn function_and_node(&self) -> Option<(u16, u8)> {
        match self {
            CanId::Std(id) => Some((id & 0x780, (id & 0x7F) as u8)),
            CanId::Extended(_) => None,
        }
    }
}

impl core::fmt::Display for CanId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CanId::Extended(id) => write!(f, "0x{id:08X}x"),
            CanId::Std(id) => write!(f, "0x{id:03X}"),
        }
    }
}

/// The maximum payload of a classic CAN frame
pub const MAX_DATA_LENGTH: usize = 8;

/// A single classic CAN frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CanMessage {
    /// The identifier of the frame
    pub id: CanId,
    dlc: u8,
    data: [u8; MAX_DATA_LENGTH],
    rtr: bool,
}

impl CanMessage {
    /// Create a new data frame
    ///
    /// Data beyond 8 bytes is dropped.
    pub fn new(id: CanId, data: &[u8]) -> Self {
        let dlc = data.len().min(MAX_DATA_LENGTH);
        let mut buf = [0u8; MAX_DATA_LENGTH];
        buf[..dlc].copy_from_slice(&data[..dlc]);
        Self {
            id,
            dlc: dlc as u8,
            data: buf,
            rtr: false,
        }
    }

    /// Create a new remote transmission request frame
    pub fn new_rtr(id: CanId) -> Self {
        Self {
            id,
            dlc: 0,
            data: [0; MAX_DATA_LENGTH],
            rtr: true,
        }
    }

    /// Get the ID of the message
    pub fn id(&self) -> CanId {
        self.id
    }

    /// Get the valid data bytes of the message
    pub fn data(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }

    /// Get the data length code
    pub fn dlc(&self) -> u8 {
        self.dlc
    }

    /// Returns true if this is a remote transmission request
    pub fn is_rtr(&self) -> bool {
        self.rtr
    }
}

/// Bus level errors reported by a CAN controller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CanError {
    /// Transmit timeout
    TxTimeout,
    /// Lost arbitration
    LostArbitration,
    /// Controller problem, e.g. buffer overflow
    Controller,
    /// Protocol violation (bit, stuff, form error)
    Protocol,
    /// Transceiver problem
    Transceiver,
    /// No acknowledge received
    NoAck,
    /// The controller went bus off
    BusOff,
    /// An error not otherwise classified
    Other(u8),
}

impl CanError {
    /// Interpret the error class bits reported by a linux socketcan error frame
    pub fn from_raw(bits: u8) -> Self {
        match bits {
            b if b & 0x01 != 0 => CanError::TxTimeout,
            b if b & 0x02 != 0 => CanError::LostArbitration,
            b if b & 0x04 != 0 => CanError::Controller,
            b if b & 0x08 != 0 => CanError::Protocol,
            b if b & 0x10 != 0 => CanError::Transceiver,
            b if b & 0x20 != 0 => CanError::NoAck,
            b if b & 0x40 != 0 => CanError::BusOff,
            b => CanError::Other(b),
        }
    }
}

impl core::fmt::Display for CanError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl core::error::Error for CanError {}

/// COB-ID used for NMT commands
pub const NMT_CMD_ID: CanId = CanId::Std(0x000);
/// COB-ID used for the SYNC message
pub const SYNC_ID: CanId = CanId::Std(0x080);

/// Function code base for emergency messages
pub const EMCY_BASE: u16 = 0x080;
/// Function code base for TPDO1 (device to master)
pub const TPDO1_BASE: u16 = 0x180;
/// Function code base for RPDO1 (master to device)
pub const RPDO1_BASE: u16 = 0x200;
/// Function code base for TPDO2
pub const TPDO2_BASE: u16 = 0x280;
/// Function code base for RPDO2
pub const RPDO2_BASE: u16 = 0x300;
/// Function code base for TPDO3
pub const TPDO3_BASE: u16 = 0x380;
/// Function code base for RPDO3
pub const RPDO3_BASE: u16 = 0x400;
/// Function code base for TPDO4
pub const TPDO4_BASE: u16 = 0x480;
/// Function code base for RPDO4
pub const RPDO4_BASE: u16 = 0x500;
/// Function code base for SDO server responses
pub const SDO_RESP_BASE: u16 = 0x580;
/// Function code base for SDO client requests
pub const SDO_REQ_BASE: u16 = 0x600;
/// Function code base for heartbeat / NMT error control messages
pub const HEARTBEAT_BASE: u16 = 0x700;

/// Build a standard COB-ID from a function code base and a node ID
pub const fn cob_id(base: u16, node_id: u8) -> CanId {
    CanId::Std(base + node_id as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_and_node() {
        assert_eq!(Some((0x580, 5)), cob_id(SDO_RESP_BASE, 5).function_and_node());
        assert_eq!(Some((0x700, 127)), cob_id(HEARTBEAT_BASE, 127).function_and_node());
        assert_eq!(None, CanId::extended(0x1234).function_and_node());
    }

    #[test]
    fn test_message_truncates_to_eight_bytes() {
        let msg = CanMessage::new(CanId::std(0x181), &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(8, msg.dlc());
        assert_eq!(&[0, 1, 2, 3, 4, 5, 6, 7], msg.data());

        let short = CanMessage::new(CanId::std(0x181), &[1, 2]);
        assert_eq!(&[1, 2], short.data());
    }
}
