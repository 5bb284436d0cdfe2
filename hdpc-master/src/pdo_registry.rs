//! PDO decoding and encoding keyed by COB-ID
//!
//! Each registered PDO has a [`PdoLayout`] built from its mapping entries, which places every
//! mapped sub object at a fixed byte offset in the frame. Received PDOs keep the last decoded
//! value of each mapped field. Transmitted PDOs hold the values which are encoded each time the
//! bus emits them.
use std::collections::BTreeMap;

use hdpc_common::{messages::MAX_DATA_LENGTH, pdo::PdoMapping, CanId, CanMessage};
use snafu::Snafu;

/// Error raised by the [`PdoRegistry`]
#[derive(Clone, Debug, PartialEq, Eq, Snafu)]
pub enum PdoError {
    /// A received frame is shorter than the mapping of its COB-ID
    #[snafu(display("PDO {cob_id} is {len} bytes, mapping needs {expected}"))]
    MalformedFrame {
        /// The COB-ID of the frame
        cob_id: CanId,
        /// The received length
        len: usize,
        /// The length required by the mapping
        expected: usize,
    },
    /// A decoder is already registered for the COB-ID
    #[snafu(display("A receive PDO is already registered on {cob_id}"))]
    DuplicateReceiver {
        /// The COB-ID
        cob_id: CanId,
    },
    /// An encoder is already registered for the COB-ID
    #[snafu(display("A transmit PDO is already registered on {cob_id}"))]
    DuplicateTransmitter {
        /// The COB-ID
        cob_id: CanId,
    },
    /// The mapping cannot be laid out in a CAN frame
    #[snafu(display("Invalid PDO mapping: {reason}"))]
    InvalidMapping {
        /// What is wrong with the mapping
        reason: String,
    },
    /// No transmit PDO is registered for the COB-ID
    #[snafu(display("No transmit PDO registered on {cob_id}"))]
    UnknownTransmitter {
        /// The COB-ID
        cob_id: CanId,
    },
    /// The object is not mapped into the PDO
    #[snafu(display("Object 0x{index:04X}sub{sub} is not mapped in PDO {cob_id}"))]
    UnmappedField {
        /// The COB-ID
        cob_id: CanId,
        /// Object index
        index: u16,
        /// Object sub index
        sub: u8,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PdoField {
    index: u16,
    sub: u8,
    offset: usize,
    size: usize,
}

/// The byte layout of a PDO
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PdoLayout {
    fields: Vec<PdoField>,
    len: usize,
}

impl PdoLayout {
    /// Lay out mapping entries in order
    ///
    /// Every entry must be 8, 16 or 32 bits, and the total must fit in 8 bytes.
    pub fn new(mappings: &[PdoMapping]) -> Result<Self, PdoError> {
        let mut fields = Vec::with_capacity(mappings.len());
        let mut offset = 0;
        for m in mappings {
            if !matches!(m.size, 8 | 16 | 32) {
                return InvalidMappingSnafu {
                    reason: format!(
                        "0x{:04X}sub{} has unsupported size {} bits",
                        m.index, m.sub, m.size
                    ),
                }
                .fail();
            }
            if fields
                .iter()
                .any(|f: &PdoField| f.index == m.index && f.sub == m.sub)
            {
                return InvalidMappingSnafu {
                    reason: format!("0x{:04X}sub{} is mapped twice", m.index, m.sub),
                }
                .fail();
            }
            let size = m.size as usize / 8;
            fields.push(PdoField {
                index: m.index,
                sub: m.sub,
                offset,
                size,
            });
            offset += size;
        }
        if offset > MAX_DATA_LENGTH {
            return InvalidMappingSnafu {
                reason: format!("mapping needs {offset} bytes"),
            }
            .fail();
        }
        Ok(Self {
            fields,
            len: offset,
        })
    }

    /// Total mapped length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when nothing is mapped
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn position(&self, index: u16, sub: u8) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.index == index && f.sub == sub)
    }
}

fn sign_extend(raw: u32, size: usize) -> i32 {
    let shift = 32 - size as u32 * 8;
    ((raw << shift) as i32) >> shift
}

/// Decoder state for one PDO received from a device
#[derive(Clone, Debug)]
pub struct ReceivePdo {
    layout: PdoLayout,
    values: Vec<Option<u32>>,
    last_update_us: Option<u64>,
}

impl ReceivePdo {
    fn new(layout: PdoLayout) -> Self {
        let values = vec![None; layout.fields.len()];
        Self {
            layout,
            values,
            last_update_us: None,
        }
    }

    fn decode(&mut self, cob_id: CanId, data: &[u8], now_us: u64) -> Result<(), PdoError> {
        if data.len() < self.layout.len {
            return MalformedFrameSnafu {
                cob_id,
                len: data.len(),
                expected: self.layout.len,
            }
            .fail();
        }
        for (field, value) in self.layout.fields.iter().zip(self.values.iter_mut()) {
            let mut bytes = [0u8; 4];
            bytes[..field.size].copy_from_slice(&data[field.offset..field.offset + field.size]);
            *value = Some(u32::from_le_bytes(bytes));
        }
        self.last_update_us = Some(now_us);
        Ok(())
    }

    /// The last decoded value of a field, zero extended
    ///
    /// None if the field is not mapped, or no frame has been decoded yet.
    pub fn raw(&self, index: u16, sub: u8) -> Option<u32> {
        self.layout
            .position(index, sub)
            .and_then(|i| self.values[i])
    }

    /// The last decoded value of a field, sign extended from its mapped size
    pub fn signed(&self, index: u16, sub: u8) -> Option<i32> {
        let i = self.layout.position(index, sub)?;
        self.values[i].map(|raw| sign_extend(raw, self.layout.fields[i].size))
    }

    /// When the last valid frame was decoded
    pub fn last_update_us(&self) -> Option<u64> {
        self.last_update_us
    }
}

/// Encoder state for one PDO sent to a device
#[derive(Clone, Debug)]
pub struct TransmitPdo {
    layout: PdoLayout,
    values: Vec<u32>,
}

impl TransmitPdo {
    fn new(layout: PdoLayout) -> Self {
        let values = vec![0; layout.fields.len()];
        Self { layout, values }
    }

    /// The value which will be encoded for a field
    pub fn get(&self, index: u16, sub: u8) -> Option<u32> {
        self.layout.position(index, sub).map(|i| self.values[i])
    }

    fn encode(&self, cob_id: CanId) -> CanMessage {
        let mut data = [0u8; MAX_DATA_LENGTH];
        for (field, value) in self.layout.fields.iter().zip(&self.values) {
            data[field.offset..field.offset + field.size]
                .copy_from_slice(&value.to_le_bytes()[..field.size]);
        }
        CanMessage::new(cob_id, &data[..self.layout.len])
    }
}

/// All PDOs known to a bus, keyed by COB-ID
#[derive(Debug, Default)]
pub struct PdoRegistry {
    receivers: BTreeMap<CanId, ReceivePdo>,
    transmitters: BTreeMap<CanId, TransmitPdo>,
}

impl PdoRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a decoder for frames received on `cob_id`
    pub fn register_receiver(&mut self, cob_id: CanId, layout: PdoLayout) -> Result<(), PdoError> {
        if self.receivers.contains_key(&cob_id) {
            return DuplicateReceiverSnafu { cob_id }.fail();
        }
        self.receivers.insert(cob_id, ReceivePdo::new(layout));
        Ok(())
    }

    /// Register an encoder for frames sent on `cob_id`
    pub fn register_transmitter(
        &mut self,
        cob_id: CanId,
        layout: PdoLayout,
    ) -> Result<(), PdoError> {
        if self.transmitters.contains_key(&cob_id) {
            return DuplicateTransmitterSnafu { cob_id }.fail();
        }
        self.transmitters.insert(cob_id, TransmitPdo::new(layout));
        Ok(())
    }

    /// Decode a received frame
    ///
    /// Returns Ok(true) if a decoder consumed the frame, and Ok(false) if no decoder is registered
    /// for its COB-ID. A frame too short for its mapping is rejected and the previously decoded
    /// values are kept.
    pub fn dispatch(&mut self, msg: &CanMessage, now_us: u64) -> Result<bool, PdoError> {
        let Some(receiver) = self.receivers.get_mut(&msg.id()) else {
            return Ok(false);
        };
        receiver.decode(msg.id(), msg.data(), now_us).map(|_| true)
    }

    /// Look up a receive PDO
    pub fn receiver(&self, cob_id: CanId) -> Option<&ReceivePdo> {
        self.receivers.get(&cob_id)
    }

    /// Look up a transmit PDO
    pub fn transmitter(&self, cob_id: CanId) -> Option<&TransmitPdo> {
        self.transmitters.get(&cob_id)
    }

    /// Set the value of a field in a transmit PDO
    pub fn set_field(
        &mut self,
        cob_id: CanId,
        index: u16,
        sub: u8,
        value: u32,
    ) -> Result<(), PdoError> {
        let tpdo = self
            .transmitters
            .get_mut(&cob_id)
            .ok_or(PdoError::UnknownTransmitter { cob_id })?;
        let i = tpdo
            .layout
            .position(index, sub)
            .ok_or(PdoError::UnmappedField { cob_id, index, sub })?;
        tpdo.values[i] = value;
        Ok(())
    }

    /// Encode the current values of a transmit PDO into a frame
    pub fn emit(&self, cob_id: CanId) -> Result<CanMessage, PdoError> {
        self.transmitters
            .get(&cob_id)
            .map(|tpdo| tpdo.encode(cob_id))
            .ok_or(PdoError::UnknownTransmitter { cob_id })
    }

    /// The COB-IDs of all transmit PDOs, in ascending order
    pub fn transmitter_ids(&self) -> impl Iterator<Item = CanId> + '_ {
        self.transmitters.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position_velocity() -> PdoLayout {
        PdoLayout::new(&[
            PdoMapping::new(0x6064, 0, 32),
            PdoMapping::new(0x6069, 0, 32),
        ])
        .unwrap()
    }

    fn frame(id: u16, data: &[u8]) -> CanMessage {
        CanMessage::new(CanId::std(id), data)
    }

    #[test]
    fn test_decode_signed_fields() {
        let mut reg = PdoRegistry::new();
        reg.register_receiver(CanId::std(0x381), position_velocity())
            .unwrap();
        reg.register_receiver(
            CanId::std(0x481),
            PdoLayout::new(&[
                PdoMapping::new(0x2205, 1, 16),
                PdoMapping::new(0x6078, 0, 16),
            ])
            .unwrap(),
        )
        .unwrap();

        let mut data = Vec::new();
        data.extend_from_slice(&(-1234i32).to_le_bytes());
        data.extend_from_slice(&5678i32.to_le_bytes());
        assert_eq!(Ok(true), reg.dispatch(&frame(0x381, &data), 10));
        assert_eq!(Ok(true), reg.dispatch(&frame(0x481, &[0xFF, 0xFF, 0x10, 0x00]), 11));

        let rx = reg.receiver(CanId::std(0x381)).unwrap();
        assert_eq!(Some(-1234), rx.signed(0x6064, 0));
        assert_eq!(Some(5678), rx.signed(0x6069, 0));
        assert_eq!(Some(10), rx.last_update_us());
        assert_eq!(None, rx.signed(0x6078, 0));

        let rx = reg.receiver(CanId::std(0x481)).unwrap();
        assert_eq!(Some(-1), rx.signed(0x2205, 1));
        assert_eq!(Some(0xFFFF), rx.raw(0x2205, 1));
        assert_eq!(Some(16), rx.signed(0x6078, 0));
    }

    #[test]
    fn test_short_frame_keeps_previous_values() {
        let mut reg = PdoRegistry::new();
        let id = CanId::std(0x382);
        reg.register_receiver(id, position_velocity()).unwrap();
        reg.dispatch(&frame(0x382, &[1, 0, 0, 0, 2, 0, 0, 0]), 100)
            .unwrap();

        let result = reg.dispatch(&frame(0x382, &[9, 9]), 200);
        assert_eq!(
            Err(PdoError::MalformedFrame {
                cob_id: id,
                len: 2,
                expected: 8
            }),
            result
        );
        let rx = reg.receiver(id).unwrap();
        assert_eq!(Some(1), rx.signed(0x6064, 0));
        assert_eq!(Some(2), rx.signed(0x6069, 0));
        assert_eq!(Some(100), rx.last_update_us());
    }

    #[test]
    fn test_unknown_cob_id_is_ignored() {
        let mut reg = PdoRegistry::new();
        let id = CanId::std(0x383);
        reg.register_receiver(id, position_velocity()).unwrap();
        reg.dispatch(&frame(0x383, &[1, 0, 0, 0, 2, 0, 0, 0]), 100)
            .unwrap();

        assert_eq!(Ok(false), reg.dispatch(&frame(0x384, &[7; 8]), 150));
        assert_eq!(Ok(false), reg.dispatch(&frame(0x080, &[]), 160));
        let rx = reg.receiver(id).unwrap();
        assert_eq!(Some(1), rx.signed(0x6064, 0));
        assert_eq!(Some(100), rx.last_update_us());
    }

    #[test]
    fn test_registration_errors() {
        let mut reg = PdoRegistry::new();
        let id = CanId::std(0x381);
        reg.register_receiver(id, position_velocity()).unwrap();
        assert_eq!(
            Err(PdoError::DuplicateReceiver { cob_id: id }),
            reg.register_receiver(id, position_velocity())
        );
        // The same COB-ID may be used in the other direction
        reg.register_transmitter(id, position_velocity()).unwrap();
        assert_eq!(
            Err(PdoError::DuplicateTransmitter { cob_id: id }),
            reg.register_transmitter(id, position_velocity())
        );

        let too_long = [
            PdoMapping::new(0x6064, 0, 32),
            PdoMapping::new(0x6069, 0, 32),
            PdoMapping::new(0x6078, 0, 16),
        ];
        assert!(matches!(
            PdoLayout::new(&too_long),
            Err(PdoError::InvalidMapping { .. })
        ));
        assert!(matches!(
            PdoLayout::new(&[PdoMapping::new(0x6064, 0, 12)]),
            Err(PdoError::InvalidMapping { .. })
        ));
    }

    #[test]
    fn test_emit_transmitter() {
        let mut reg = PdoRegistry::new();
        let id = CanId::std(0x201);
        reg.register_transmitter(
            id,
            PdoLayout::new(&[PdoMapping::new(0x60FF, 0, 32)]).unwrap(),
        )
        .unwrap();

        let msg = reg.emit(id).unwrap();
        assert_eq!(&[0, 0, 0, 0], msg.data());

        reg.set_field(id, 0x60FF, 0, (-2i32) as u32).unwrap();
        let msg = reg.emit(id).unwrap();
        assert_eq!(id, msg.id());
        assert_eq!(&[0xFE, 0xFF, 0xFF, 0xFF], msg.data());

        assert_eq!(
            Err(PdoError::UnmappedField {
                cob_id: id,
                index: 0x6040,
                sub: 0
            }),
            reg.set_field(id, 0x6040, 0, 1)
        );
        assert_eq!(
            Err(PdoError::UnknownTransmitter {
                cob_id: CanId::std(0x202)
            }),
            reg.emit(CanId::std(0x202))
        );
        assert_eq!(vec![id], reg.transmitter_ids().collect::<Vec<_>>());
    }
}
