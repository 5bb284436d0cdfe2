//! The hierarchical supervisory state machine
//!
//! ```text
//! Top
//! ├── Init ──(all ready)──> Homing ──(all homed)──> Stop
//! ├── Stop ──Starting──> Starting ──(all enabled)──> Drive | DriveTest*
//! ├── Stop ──Reseting──> Init
//! ├── Drive, DriveTestDrivingMotor, DriveTestSteeringMotor ──Stopping──> Stopping
//! ├── Stopping ──(all disabled)──> Stop
//! └── Fault ──Reseting──> Init
//! ```
//!
//! Homing leaves the drives in Operation enabled, so entering `Stop` from `Homing` disables them.
//!
//! `EmergencyStop` is a reaction of `Top`, so it is checked before the active leaf sees the event
//! and moves the machine to `Fault` from anywhere. `TerminateSM` is also handled by `Top`.
//!
//! States which wait for the whole fleet own a [`DeviceGate`], created on entry and dropped on
//! exit. Each `Execute` the gate issues the state's command to devices which have not received it
//! yet, then polls each unfinished device, counting it done the first time it reports
//! `Determined(true)`. The state transitions once the count reaches zero.
use hdpc_common::{device_config::DeviceKind, traits::CanSender};
use hdpc_master::{Bus, DeviceError, QueryResult};
use snafu::{ResultExt, Snafu};

use crate::drive_unit::DriveUnit;

/// Error raised while building a [`Supervisor`]
#[derive(Debug, Snafu)]
pub enum SupervisorError {
    /// A device could not be attached to the bus
    #[snafu(display("Failed to set up device {name}: {source}"))]
    Setup {
        /// Device name
        name: String,
        /// The underlying error
        source: DeviceError,
    },
}

/// Events accepted by the state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// The periodic tick
    Execute,
    /// Disable everything and go to Fault
    EmergencyStop,
    /// Log and return the current state
    StateInfo,
    /// Leave Stop and enable the motors
    Starting,
    /// Leave a drive state and disable the motors
    Stopping,
    /// Re-initialize from Stop or Fault
    Reseting,
    /// Shut the machine down
    TerminateSM,
}

/// The leaf states
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateId {
    /// Bringing the devices up
    Init,
    /// Homing the devices
    Homing,
    /// Idle, motors not enabled
    Stop,
    /// Enabling the motors
    Starting,
    /// Driving with the commanded velocities
    Drive,
    /// Spinning the driving motors at their test velocity
    DriveTestDrivingMotor,
    /// Spinning the steering motors at their test velocity
    DriveTestSteeringMotor,
    /// Disabling the motors
    Stopping,
    /// Stopped after an emergency stop
    Fault,
}

impl core::fmt::Display for StateId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Which drive state `Starting` completes into
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DriveMode {
    /// Drive with the commanded velocities
    #[default]
    Normal,
    /// Test the driving motors
    TestDrivingMotor,
    /// Test the steering motors
    TestSteeringMotor,
}

/// A snapshot of the state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateInfo {
    /// The active leaf
    pub state: StateId,
    /// Devices the active state is still waiting for, if it waits for devices
    pub devices_remaining: Option<usize>,
}

/// The outcome of [`Supervisor::process_event`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventResult {
    /// No state reacted to the event
    Discarded,
    /// The event was handled without changing state
    Handled,
    /// The event caused a transition into the given state
    Transitioned(StateId),
    /// Reply to [`Event::StateInfo`]
    Info(StateInfo),
}

#[derive(Clone, Copy, Debug, Default)]
struct DeviceProgress {
    command_issued: bool,
    done: bool,
}

/// Per-state tracking of which devices have reached the state's goal
#[derive(Debug)]
struct DeviceGate {
    remaining: usize,
    progress: Vec<DeviceProgress>,
}

impl DeviceGate {
    fn new(device_count: usize) -> Self {
        Self {
            remaining: device_count,
            progress: vec![DeviceProgress::default(); device_count],
        }
    }

    /// Issue commands and poll every unfinished device once
    ///
    /// Returns true when every device has reported done.
    fn step<D, S, C, Q>(
        &mut self,
        devices: &mut [D],
        bus: &mut Bus<S>,
        mut command: C,
        mut query: Q,
    ) -> bool
    where
        D: DriveUnit,
        S: CanSender,
        C: FnMut(&mut D, &mut Bus<S>) -> Result<(), DeviceError>,
        Q: FnMut(&mut D, &mut Bus<S>) -> Result<QueryResult, DeviceError>,
    {
        for (device, progress) in devices.iter_mut().zip(self.progress.iter_mut()) {
            if progress.done {
                continue;
            }
            if !progress.command_issued {
                match command(device, bus) {
                    Ok(()) => progress.command_issued = true,
                    Err(e) => {
                        log::warn!("{e}");
                        continue;
                    }
                }
            }
            match query(device, bus) {
                Ok(QueryResult::Determined(true)) => {
                    progress.done = true;
                    self.remaining -= 1;
                    log::debug!(
                        "Device {} done, {} remaining",
                        device.name(),
                        self.remaining
                    );
                }
                Ok(_) => (),
                Err(e) => log::warn!("{e}"),
            }
        }
        self.remaining == 0
    }
}

/// The active leaf state, with its local context
#[derive(Debug)]
enum Leaf {
    Init(DeviceGate),
    Homing(DeviceGate),
    Stop,
    Starting(DeviceGate),
    Drive,
    DriveTestDrivingMotor,
    DriveTestSteeringMotor,
    Stopping(DeviceGate),
    Fault,
}

impl Leaf {
    fn id(&self) -> StateId {
        match self {
            Leaf::Init(_) => StateId::Init,
            Leaf::Homing(_) => StateId::Homing,
            Leaf::Stop => StateId::Stop,
            Leaf::Starting(_) => StateId::Starting,
            Leaf::Drive => StateId::Drive,
            Leaf::DriveTestDrivingMotor => StateId::DriveTestDrivingMotor,
            Leaf::DriveTestSteeringMotor => StateId::DriveTestSteeringMotor,
            Leaf::Stopping(_) => StateId::Stopping,
            Leaf::Fault => StateId::Fault,
        }
    }

    fn gate(&self) -> Option<&DeviceGate> {
        match self {
            Leaf::Init(g) | Leaf::Homing(g) | Leaf::Starting(g) | Leaf::Stopping(g) => Some(g),
            _ => None,
        }
    }
}

/// Sequences a fleet of drive units through their lifecycle
#[derive(Debug)]
pub struct Supervisor<D> {
    devices: Vec<D>,
    leaf: Leaf,
    drive_mode: DriveMode,
    velocities: Vec<f64>,
    terminated: bool,
}

impl<D: DriveUnit> Supervisor<D> {
    /// Attach every device to the bus and start in `Init`
    pub fn new<S: CanSender>(mut devices: Vec<D>, bus: &mut Bus<S>) -> Result<Self, SupervisorError> {
        for device in devices.iter_mut() {
            device
                .attach(bus)
                .context(SetupSnafu { name: device.name() })?;
        }
        let count = devices.len();
        log::info!("Supervisor starting with {count} devices");
        Ok(Self {
            devices,
            leaf: Leaf::Init(DeviceGate::new(count)),
            drive_mode: DriveMode::Normal,
            velocities: vec![0.0; count],
            terminated: false,
        })
    }

    /// The active leaf state
    pub fn state(&self) -> StateId {
        self.leaf.id()
    }

    /// A snapshot of the active state
    pub fn state_info(&self) -> StateInfo {
        StateInfo {
            state: self.leaf.id(),
            devices_remaining: self.leaf.gate().map(|g| g.remaining),
        }
    }

    /// True once [`Event::TerminateSM`] has been processed
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// The supervised devices
    pub fn devices(&self) -> &[D] {
        &self.devices
    }

    /// The supervised devices, mutably
    ///
    /// For work outside the state machine, such as a final disable on shutdown.
    pub fn devices_mut(&mut self) -> &mut [D] {
        &mut self.devices
    }

    /// The drive state selected when `Starting` completes
    pub fn drive_mode(&self) -> DriveMode {
        self.drive_mode
    }

    /// Select the drive state entered when `Starting` completes
    pub fn set_drive_mode(&mut self, mode: DriveMode) {
        self.drive_mode = mode;
    }

    /// Set the velocity commands applied in `Drive`, in device order
    ///
    /// Devices beyond the end of `velocities` are commanded zero.
    pub fn set_velocities(&mut self, velocities: &[f64]) {
        for (i, v) in self.velocities.iter_mut().enumerate() {
            *v = velocities.get(i).copied().unwrap_or(0.0);
        }
    }

    /// The velocity commands applied in `Drive`
    pub fn velocities(&self) -> &[f64] {
        &self.velocities
    }

    /// Process one event
    ///
    /// `Top` reactions to `EmergencyStop` run before the leaf; other events go to the leaf first
    /// and fall back to `Top`. At most one transition happens per call.
    pub fn process_event<S: CanSender>(&mut self, event: Event, bus: &mut Bus<S>) -> EventResult {
        if self.terminated {
            return EventResult::Discarded;
        }

        if event == Event::EmergencyStop {
            log::error!("Emergency stop in state {}", self.leaf.id());
            return self.transition(StateId::Fault, bus);
        }

        if let Some(result) = self.react_leaf(event, bus) {
            return result;
        }

        match event {
            Event::TerminateSM => {
                log::info!("Supervisor terminated in state {}", self.leaf.id());
                self.terminated = true;
                EventResult::Handled
            }
            // Execute is always claimed at Top, even by states with nothing to do
            Event::Execute => EventResult::Handled,
            _ => {
                log::debug!("{event:?} discarded in state {}", self.leaf.id());
                EventResult::Discarded
            }
        }
    }

    fn react_leaf<S: CanSender>(&mut self, event: Event, bus: &mut Bus<S>) -> Option<EventResult> {
        let id = self.leaf.id();
        match (id, event) {
            (_, Event::StateInfo) => {
                let info = self.state_info();
                log::info!(
                    "State {} ({} devices remaining)",
                    info.state,
                    info.devices_remaining
                        .map(|n| n.to_string())
                        .unwrap_or_else(|| "-".into())
                );
                Some(EventResult::Info(info))
            }
            (_, Event::Execute) => Some(self.execute(bus)),
            (StateId::Stop, Event::Starting) => Some(self.transition(StateId::Starting, bus)),
            (StateId::Stop | StateId::Fault, Event::Reseting) => {
                Some(self.transition(StateId::Init, bus))
            }
            (
                StateId::Drive | StateId::DriveTestDrivingMotor | StateId::DriveTestSteeringMotor,
                Event::Stopping,
            ) => Some(self.transition(StateId::Stopping, bus)),
            _ => None,
        }
    }

    fn execute<S: CanSender>(&mut self, bus: &mut Bus<S>) -> EventResult {
        let devices = &mut self.devices;
        let next = match &mut self.leaf {
            Leaf::Init(gate) => gate
                .step(devices, bus, |d, b| d.initialize(b), |d, b| d.query_ready(b))
                .then_some(StateId::Homing),
            Leaf::Homing(gate) => gate
                .step(devices, bus, |d, b| d.start_homing(b), |d, b| d.query_homed(b))
                .then_some(StateId::Stop),
            Leaf::Starting(gate) => gate
                .step(devices, bus, |d, b| d.enable(b), |d, b| d.query_enabled(b))
                .then_some(match self.drive_mode {
                    DriveMode::Normal => StateId::Drive,
                    DriveMode::TestDrivingMotor => StateId::DriveTestDrivingMotor,
                    DriveMode::TestSteeringMotor => StateId::DriveTestSteeringMotor,
                }),
            Leaf::Stopping(gate) => gate
                .step(devices, bus, |d, b| d.disable(b), |d, b| d.query_disabled(b))
                .then_some(StateId::Stop),
            Leaf::Drive => {
                for (device, v) in devices.iter_mut().zip(&self.velocities) {
                    if let Err(e) = device.set_velocity(bus, *v) {
                        log::warn!("{e}");
                    }
                }
                None
            }
            Leaf::DriveTestDrivingMotor => {
                Self::apply_test_velocity(devices, bus, DeviceKind::Driving);
                None
            }
            Leaf::DriveTestSteeringMotor => {
                Self::apply_test_velocity(devices, bus, DeviceKind::Steering);
                None
            }
            Leaf::Stop | Leaf::Fault => None,
        };

        match next {
            Some(state) => self.transition(state, bus),
            None => EventResult::Handled,
        }
    }

    fn apply_test_velocity<S: CanSender>(devices: &mut [D], bus: &mut Bus<S>, kind: DeviceKind) {
        for device in devices.iter_mut() {
            let v = if device.kind() == kind {
                device.test_velocity()
            } else {
                0.0
            };
            if let Err(e) = device.set_velocity(bus, v) {
                log::warn!("{e}");
            }
        }
    }

    /// Replace the leaf, dropping the old leaf's context, and run the new leaf's entry action
    fn transition<S: CanSender>(&mut self, to: StateId, bus: &mut Bus<S>) -> EventResult {
        let from = self.leaf.id();
        let count = self.devices.len();
        self.leaf = match to {
            StateId::Init => Leaf::Init(DeviceGate::new(count)),
            StateId::Homing => Leaf::Homing(DeviceGate::new(count)),
            StateId::Stop => Leaf::Stop,
            StateId::Starting => Leaf::Starting(DeviceGate::new(count)),
            StateId::Drive => Leaf::Drive,
            StateId::DriveTestDrivingMotor => Leaf::DriveTestDrivingMotor,
            StateId::DriveTestSteeringMotor => Leaf::DriveTestSteeringMotor,
            StateId::Stopping => Leaf::Stopping(DeviceGate::new(count)),
            StateId::Fault => Leaf::Fault,
        };
        log::info!("Supervisor: {from} -> {to}");

        match (from, to) {
            // Homing finishes with the drives in Operation enabled. Stopping has already
            // confirmed every drive disabled, so only the Homing path needs it here.
            (_, StateId::Fault) | (StateId::Homing, StateId::Stop) => self.disable_all(bus),
            (_, StateId::Drive) => self.velocities.iter_mut().for_each(|v| *v = 0.0),
            _ => (),
        }
        EventResult::Transitioned(to)
    }

    fn disable_all<S: CanSender>(&mut self, bus: &mut Bus<S>) {
        for device in self.devices.iter_mut() {
            if let Err(e) = device.disable(bus) {
                log::warn!("{e}");
            }
        }
    }
}
