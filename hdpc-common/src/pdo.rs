//! PDO mapping and communication parameters as written to a node

use crate::messages::CanId;

/// One entry of a PDO mapping object: which object is packed into the frame, and how wide it is
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PdoMapping {
    /// Mapped object
    pub index: u16,
    /// Mapped sub object
    pub sub: u8,
    /// Width in bits
    pub size: u8,
}

impl PdoMapping {
    /// Create a new mapping entry
    pub const fn new(index: u16, sub: u8, size: u8) -> Self {
        Self { index, sub, size }
    }

    /// Pack as `index << 16 | sub << 8 | size`, the layout of a mapping sub object
    pub fn to_object_value(&self) -> u32 {
        (u32::from(self.index) << 16) | (u32::from(self.sub) << 8) | u32::from(self.size)
    }

    /// Inverse of [`PdoMapping::to_object_value`]
    pub fn from_object_value(value: u32) -> Self {
        let [index_hi, index_lo, sub, size] = value.to_be_bytes();
        Self {
            index: u16::from_be_bytes([index_hi, index_lo]),
            sub,
            size,
        }
    }
}

/// Transmission type value for a PDO sent on every SYNC
pub const TRANSMISSION_TYPE_SYNC: u8 = 0x01;

/// The complete communication and mapping configuration of one PDO
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PdoConfig {
    /// The COB-ID the PDO is sent on
    pub cob_id: CanId,
    /// Whether the PDO is enabled
    pub enabled: bool,
    /// Objects mapped into the PDO, in frame order
    pub mappings: Vec<PdoMapping>,
    /// The transmission type
    pub transmission_type: u8,
}

impl PdoConfig {
    /// The value written to the COB-ID sub object (sub 1) of the PDO communication object
    pub fn cob_id_value(&self) -> u32 {
        let mut value = self.cob_id.raw() & 0x1FFF_FFFF;
        if !self.enabled {
            value |= 1 << 31;
        }
        if self.cob_id.is_extended() {
            value |= 1 << 29;
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_object_value() {
        let mapping = PdoMapping::new(0x6064, 0, 32);
        assert_eq!(0x6064_0020, mapping.to_object_value());
        assert_eq!(mapping, PdoMapping::from_object_value(0x6064_0020));
    }

    #[test]
    fn test_cob_id_value() {
        let mut cfg = PdoConfig {
            cob_id: CanId::std(0x381),
            enabled: true,
            mappings: vec![PdoMapping::new(0x6064, 0, 32), PdoMapping::new(0x6069, 0, 32)],
            transmission_type: TRANSMISSION_TYPE_SYNC,
        };
        assert_eq!(0x381, cfg.cob_id_value());
        cfg.enabled = false;
        assert_eq!(0x8000_0381, cfg.cob_id_value());
    }
}
