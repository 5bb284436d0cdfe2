//! CiA 402 drive profile helpers
//!
//! Motor controllers on the fleet bus follow the CiA 402 power state machine. The master drives
//! it by writing the controlword, and observes it by reading the statusword.

/// Controlword commands
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum ControlCommand {
    /// Shutdown: transition to Ready to switch on
    Shutdown = 0x0006,
    /// Switch on: transition to Switched on
    SwitchOn = 0x0007,
    /// Enable operation: transition to Operation enabled
    EnableOperation = 0x000F,
    /// Start a homing procedure while in homing mode and operation enabled
    StartHoming = 0x001F,
    /// Clear a latched fault
    FaultReset = 0x0080,
}

impl ControlCommand {
    /// Disable operation shares its bit pattern with switch on
    pub const DISABLE_OPERATION: ControlCommand = ControlCommand::SwitchOn;

    /// The raw controlword value
    pub fn word(self) -> u16 {
        self as u16
    }
}

/// Modes of operation (object 0x6060)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i8)]
pub enum OperationMode {
    /// Profile position mode
    ProfilePosition = 1,
    /// Profile velocity mode
    ProfileVelocity = 3,
    /// Homing mode
    Homing = 6,
}

/// The CiA 402 power states, as decoded from the statusword
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerState {
    /// Not ready to switch on
    NotReadyToSwitchOn,
    /// Switch on disabled
    SwitchOnDisabled,
    /// Ready to switch on
    ReadyToSwitchOn,
    /// Switched on
    SwitchedOn,
    /// Operation enabled
    OperationEnabled,
    /// Quick stop active
    QuickStopActive,
    /// Fault reaction active
    FaultReactionActive,
    /// Fault
    Fault,
}

/// Statusword bit 10
pub const STATUS_TARGET_REACHED: u16 = 1 << 10;
/// Statusword bit 12, homing attained while in homing mode
pub const STATUS_HOMING_ATTAINED: u16 = 1 << 12;

impl PowerState {
    /// Classify a statusword
    pub fn from_statusword(sw: u16) -> Self {
        if sw & 0x004F == 0x0000 {
            PowerState::NotReadyToSwitchOn
        } else if sw & 0x004F == 0x0040 {
            PowerState::SwitchOnDisabled
        } else if sw & 0x006F == 0x0021 {
            PowerState::ReadyToSwitchOn
        } else if sw & 0x006F == 0x0023 {
            PowerState::SwitchedOn
        } else if sw & 0x006F == 0x0027 {
            PowerState::OperationEnabled
        } else if sw & 0x006F == 0x0007 {
            PowerState::QuickStopActive
        } else if sw & 0x004F == 0x000F {
            PowerState::FaultReactionActive
        } else {
            PowerState::Fault
        }
    }

    /// The statusword a drive reports in this state, with no optional bits set
    pub fn statusword(self) -> u16 {
        match self {
            PowerState::NotReadyToSwitchOn => 0x0000,
            PowerState::SwitchOnDisabled => 0x0040,
            PowerState::ReadyToSwitchOn => 0x0021,
            PowerState::SwitchedOn => 0x0023,
            PowerState::OperationEnabled => 0x0027,
            PowerState::QuickStopActive => 0x0007,
            PowerState::FaultReactionActive => 0x000F,
            PowerState::Fault => 0x0008,
        }
    }

    /// True for the two fault states
    pub fn is_fault(self) -> bool {
        matches!(self, PowerState::Fault | PowerState::FaultReactionActive)
    }
}

/// The drive has power applied to the motor and follows commands
pub fn is_enabled(sw: u16) -> bool {
    PowerState::from_statusword(sw) == PowerState::OperationEnabled
}

/// The drive has left Operation enabled without faulting
pub fn is_disabled(sw: u16) -> bool {
    let state = PowerState::from_statusword(sw);
    state != PowerState::OperationEnabled && !state.is_fault()
}

/// The drive is ready to be enabled
pub fn is_ready(sw: u16) -> bool {
    matches!(
        PowerState::from_statusword(sw),
        PowerState::ReadyToSwitchOn | PowerState::SwitchedOn
    )
}

/// The drive reports a completed homing procedure
pub fn is_homed(sw: u16) -> bool {
    sw & (STATUS_HOMING_ATTAINED | STATUS_TARGET_REACHED)
        == (STATUS_HOMING_ATTAINED | STATUS_TARGET_REACHED)
}
