//! Object indices and special values used by the master

/// Object indices for standard objects
pub mod object_ids {
    /// The first TPDO communication parameter index. TPDO comms can be stored from 0x1800 to 0x19FF.
    pub const TPDO_COMM_BASE: u16 = 0x1800;
    ///  The first TPDO mapping parameter index. TPDO mappings can be stored from 0x1A00 to 0x1BFF;
    pub const TPDO_MAP_BASE: u16 = 0x1A00;

    /// Manufacturer specific analog input block. Sub 1 holds analog input 1.
    pub const ANALOG_INPUT: u16 = 0x2205;

    /// CiA 402 controlword
    pub const CONTROLWORD: u16 = 0x6040;
    /// CiA 402 statusword
    pub const STATUSWORD: u16 = 0x6041;
    /// CiA 402 modes of operation
    pub const MODES_OF_OPERATION: u16 = 0x6060;
    /// CiA 402 position actual value, in encoder ticks
    pub const POSITION_ACTUAL: u16 = 0x6064;
    /// CiA 402 velocity actual value, in counts/s
    pub const VELOCITY_ACTUAL: u16 = 0x6069;
    /// CiA 402 current actual value
    pub const CURRENT_ACTUAL: u16 = 0x6078;
    /// CiA 402 software position limit. Sub 1 is the minimum, sub 2 the maximum.
    pub const SOFTWARE_POSITION_LIMIT: u16 = 0x607D;
    /// CiA 402 homing method
    pub const HOMING_METHOD: u16 = 0x6098;
    /// CiA 402 target velocity, in counts/s
    pub const TARGET_VELOCITY: u16 = 0x60FF;
}

/// Special values used to access standard objects
pub mod values {
    /// Homing method 35: take the current position as the home position
    pub const HOMING_METHOD_CURRENT_POSITION: i8 = 35;
}
