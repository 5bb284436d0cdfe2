//! The seam between the supervisor and the devices it drives

use hdpc_common::{device_config::DeviceKind, traits::CanSender};
use hdpc_master::{Bus, Device, DeviceError, QueryResult};

/// The operations the supervisor needs from each device it sequences
///
/// Commands queue bus traffic and return immediately. Queries follow the single outstanding
/// query pattern of [`Device`]: they return [`QueryResult::Pending`] until the device answers.
pub trait DriveUnit {
    /// A name for log messages
    fn name(&self) -> &str;
    /// Which motor the unit drives
    fn kind(&self) -> DeviceKind;
    /// The velocity commanded by the motor test states, in rad/s
    fn test_velocity(&self) -> f64;

    /// Register PDOs with the bus. Called once at setup.
    fn attach<S: CanSender>(&mut self, bus: &mut Bus<S>) -> Result<(), DeviceError>;
    /// Start the node, configure it, and request Ready to switch on
    fn initialize<S: CanSender>(&mut self, bus: &mut Bus<S>) -> Result<(), DeviceError>;
    /// Start homing
    fn start_homing<S: CanSender>(&mut self, bus: &mut Bus<S>) -> Result<(), DeviceError>;
    /// Enable the motor
    fn enable<S: CanSender>(&mut self, bus: &mut Bus<S>) -> Result<(), DeviceError>;
    /// Disable the motor
    fn disable<S: CanSender>(&mut self, bus: &mut Bus<S>) -> Result<(), DeviceError>;
    /// Set the velocity command, in rad/s
    fn set_velocity<S: CanSender>(
        &mut self,
        bus: &mut Bus<S>,
        rad_s: f64,
    ) -> Result<(), DeviceError>;

    /// Is the unit ready to be enabled
    fn query_ready<S: CanSender>(&mut self, bus: &mut Bus<S>) -> Result<QueryResult, DeviceError>;
    /// Has the unit finished homing
    fn query_homed<S: CanSender>(&mut self, bus: &mut Bus<S>) -> Result<QueryResult, DeviceError>;
    /// Is the unit enabled
    fn query_enabled<S: CanSender>(&mut self, bus: &mut Bus<S>)
        -> Result<QueryResult, DeviceError>;
    /// Is the unit disabled
    fn query_disabled<S: CanSender>(
        &mut self,
        bus: &mut Bus<S>,
    ) -> Result<QueryResult, DeviceError>;
}

impl DriveUnit for Device {
    fn name(&self) -> &str {
        Device::name(self)
    }

    fn kind(&self) -> DeviceKind {
        Device::kind(self)
    }

    fn test_velocity(&self) -> f64 {
        self.config().test_velocity
    }

    fn attach<S: CanSender>(&mut self, bus: &mut Bus<S>) -> Result<(), DeviceError> {
        Device::attach(self, bus)
    }

    fn initialize<S: CanSender>(&mut self, bus: &mut Bus<S>) -> Result<(), DeviceError> {
        Device::initialize(self, bus)
    }

    fn start_homing<S: CanSender>(&mut self, bus: &mut Bus<S>) -> Result<(), DeviceError> {
        Device::start_homing(self, bus)
    }

    fn enable<S: CanSender>(&mut self, bus: &mut Bus<S>) -> Result<(), DeviceError> {
        Device::enable(self, bus)
    }

    fn disable<S: CanSender>(&mut self, bus: &mut Bus<S>) -> Result<(), DeviceError> {
        Device::disable(self, bus)
    }

    fn set_velocity<S: CanSender>(
        &mut self,
        bus: &mut Bus<S>,
        rad_s: f64,
    ) -> Result<(), DeviceError> {
        Device::set_velocity(self, bus, rad_s)
    }

    fn query_ready<S: CanSender>(&mut self, bus: &mut Bus<S>) -> Result<QueryResult, DeviceError> {
        self.get_is_ready(bus)
    }

    fn query_homed<S: CanSender>(&mut self, bus: &mut Bus<S>) -> Result<QueryResult, DeviceError> {
        self.get_is_homed(bus)
    }

    fn query_enabled<S: CanSender>(
        &mut self,
        bus: &mut Bus<S>,
    ) -> Result<QueryResult, DeviceError> {
        self.get_is_enabled(bus)
    }

    fn query_disabled<S: CanSender>(
        &mut self,
        bus: &mut Bus<S>,
    ) -> Result<QueryResult, DeviceError> {
        self.get_is_disabled(bus)
    }
}
