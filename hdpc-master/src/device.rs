//! Per-node view of a CiA 402 motor controller
//!
//! A [`Device`] never owns the bus. Every operation borrows it for the duration of the call.
//! Process data is read from the PDOs the device registers on [`Device::attach`], and commands
//! are queued as SDO writes which complete on later ticks.
use hdpc_common::{
    cia402::{self, ControlCommand, OperationMode, PowerState},
    constants::{object_ids, values::HOMING_METHOD_CURRENT_POSITION},
    device_config::{DeviceConfig, DeviceKind},
    messages::{cob_id, RPDO1_BASE, TPDO3_BASE, TPDO4_BASE},
    nmt::NmtCommandSpecifier,
    pdo::{PdoConfig, PdoMapping, TRANSMISSION_TYPE_SYNC},
    traits::CanSender,
    CanId, NodeId,
};
use snafu::{ResultExt, Snafu};

use crate::{
    bus::Bus,
    pdo_registry::{PdoError, PdoLayout},
    sdo_manager::{SdoManagerError, SdoTransaction, TransactionState},
};

/// Error returned by [`Device`] operations
#[derive(Clone, Debug, PartialEq, Eq, Snafu)]
pub enum DeviceError {
    /// An SDO transaction could not be queued
    #[snafu(display("Device {name}: failed to queue SDO: {source}"))]
    Sdo {
        /// Device name
        name: String,
        /// The underlying error
        source: SdoManagerError,
    },
    /// The device PDOs could not be registered or updated
    #[snafu(display("Device {name}: PDO configuration error: {source}"))]
    Configuration {
        /// Device name
        name: String,
        /// The underlying error
        source: PdoError,
    },
    /// The transport refused a frame
    #[snafu(display("Device {name}: failed to send frame on {cob_id}"))]
    SendFailed {
        /// Device name
        name: String,
        /// The COB-ID of the frame
        cob_id: CanId,
    },
}

/// The outcome of a status query
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryResult {
    /// The device answered
    Determined(bool),
    /// No answer yet. This is not the same as false.
    Pending,
}

impl QueryResult {
    /// True only for `Determined(true)`
    pub fn is_true(self) -> bool {
        self == QueryResult::Determined(true)
    }
}

/// The statusword predicates which can be queried
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StatusQuery {
    Ready,
    Enabled,
    Disabled,
    Homed,
}

impl StatusQuery {
    const COUNT: usize = 4;

    fn evaluate(self, statusword: u16) -> bool {
        match self {
            StatusQuery::Ready => cia402::is_ready(statusword),
            StatusQuery::Enabled => cia402::is_enabled(statusword),
            StatusQuery::Disabled => cia402::is_disabled(statusword),
            StatusQuery::Homed => cia402::is_homed(statusword),
        }
    }
}

#[derive(Clone, Debug, Default)]
enum QuerySlot {
    #[default]
    Idle,
    Pending(SdoTransaction),
}

/// Mapping of TPDO3: position and velocity actual values
const POSITION_VELOCITY_MAP: [PdoMapping; 2] = [
    PdoMapping::new(object_ids::POSITION_ACTUAL, 0, 32),
    PdoMapping::new(object_ids::VELOCITY_ACTUAL, 0, 32),
];

/// Mapping of TPDO4: analog input and current actual value
const ANALOG_CURRENT_MAP: [PdoMapping; 2] = [
    PdoMapping::new(object_ids::ANALOG_INPUT, 1, 16),
    PdoMapping::new(object_ids::CURRENT_ACTUAL, 0, 16),
];

/// Mapping of RPDO1: target velocity
const TARGET_VELOCITY_MAP: [PdoMapping; 1] =
    [PdoMapping::new(object_ids::TARGET_VELOCITY, 0, 32)];

/// A motor controller on the bus
#[derive(Debug)]
pub struct Device {
    node_id: NodeId,
    config: DeviceConfig,
    queries: [QuerySlot; StatusQuery::COUNT],
    last_statusword: Option<u16>,
}

impl Device {
    /// Create a device from its configuration
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            node_id: config.node_id(),
            config,
            queries: Default::default(),
            last_statusword: None,
        }
    }

    /// The node ID
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// The configured name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Which motor this device drives
    pub fn kind(&self) -> DeviceKind {
        self.config.kind
    }

    /// The static device parameters
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// COB-ID of the position/velocity PDO sent by the device
    pub fn position_velocity_cob_id(&self) -> CanId {
        cob_id(TPDO3_BASE, self.node_id.raw())
    }

    /// COB-ID of the analog/current PDO sent by the device
    pub fn analog_current_cob_id(&self) -> CanId {
        cob_id(TPDO4_BASE, self.node_id.raw())
    }

    /// COB-ID of the target velocity PDO sent to the device
    pub fn target_velocity_cob_id(&self) -> CanId {
        cob_id(RPDO1_BASE, self.node_id.raw())
    }

    /// Register this device's PDO decoders and its velocity encoder with the bus
    ///
    /// Must be called once, before the first tick.
    pub fn attach<S: CanSender>(&self, bus: &mut Bus<S>) -> Result<(), DeviceError> {
        let pdos = bus.pdos_mut();
        let result = (|| -> Result<(), PdoError> {
            pdos.register_receiver(
                self.position_velocity_cob_id(),
                PdoLayout::new(&POSITION_VELOCITY_MAP)?,
            )?;
            pdos.register_receiver(
                self.analog_current_cob_id(),
                PdoLayout::new(&ANALOG_CURRENT_MAP)?,
            )?;
            pdos.register_transmitter(
                self.target_velocity_cob_id(),
                PdoLayout::new(&TARGET_VELOCITY_MAP)?,
            )
        })();
        result.context(ConfigurationSnafu { name: self.name() })
    }

    /// Position at the gear output, in radians
    pub fn get_position<S: CanSender>(&self, bus: &Bus<S>) -> Option<f64> {
        let ticks = bus
            .pdos()
            .receiver(self.position_velocity_cob_id())?
            .signed(object_ids::POSITION_ACTUAL, 0)?;
        Some(ticks as f64 / (self.config.gear_ratio * self.config.rad_to_ticks))
    }

    /// Velocity at the gear output, in rad/s
    pub fn get_velocity<S: CanSender>(&self, bus: &Bus<S>) -> Option<f64> {
        let counts = bus
            .pdos()
            .receiver(self.position_velocity_cob_id())?
            .signed(object_ids::VELOCITY_ACTUAL, 0)?;
        Some(counts as f64 / self.config.rad_s_to_counts_s)
    }

    /// Motor current, in the controller's native units
    pub fn get_current<S: CanSender>(&self, bus: &Bus<S>) -> Option<f64> {
        bus.pdos()
            .receiver(self.analog_current_cob_id())?
            .signed(object_ids::CURRENT_ACTUAL, 0)
            .map(f64::from)
    }

    /// Analog input 1, in the controller's native units
    pub fn get_analog<S: CanSender>(&self, bus: &Bus<S>) -> Option<f64> {
        bus.pdos()
            .receiver(self.analog_current_cob_id())?
            .signed(object_ids::ANALOG_INPUT, 1)
            .map(f64::from)
    }

    /// When process data was last received from this device
    pub fn last_update_us<S: CanSender>(&self, bus: &Bus<S>) -> Option<u64> {
        let pdos = bus.pdos();
        let a = pdos
            .receiver(self.position_velocity_cob_id())
            .and_then(|r| r.last_update_us());
        let b = pdos
            .receiver(self.analog_current_cob_id())
            .and_then(|r| r.last_update_us());
        a.max(b)
    }

    /// The last statusword returned by any status query
    pub fn statusword(&self) -> Option<u16> {
        self.last_statusword
    }

    /// The power state decoded from the last statusword
    pub fn power_state(&self) -> Option<PowerState> {
        self.last_statusword.map(PowerState::from_statusword)
    }

    fn write<S: CanSender>(
        &self,
        bus: &mut Bus<S>,
        index: u16,
        sub: u8,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let t = SdoTransaction::write(self.node_id, index, sub, data, bus.sdo_timeout_us());
        bus.submit(&t).context(SdoSnafu { name: self.name() })
    }

    fn control<S: CanSender>(
        &self,
        bus: &mut Bus<S>,
        command: ControlCommand,
    ) -> Result<(), DeviceError> {
        self.write(
            bus,
            object_ids::CONTROLWORD,
            0,
            &command.word().to_le_bytes(),
        )
    }

    fn set_mode<S: CanSender>(
        &self,
        bus: &mut Bus<S>,
        mode: OperationMode,
    ) -> Result<(), DeviceError> {
        self.write(bus, object_ids::MODES_OF_OPERATION, 0, &[mode as i8 as u8])
    }

    /// Write the software position limits
    ///
    /// The limits are given in radians at the gear output, in either order.
    pub fn set_position_limits<S: CanSender>(
        &self,
        bus: &mut Bus<S>,
        limits: [f64; 2],
    ) -> Result<(), DeviceError> {
        let (min, max) = if limits[0] < limits[1] {
            (limits[0], limits[1])
        } else {
            (limits[1], limits[0])
        };
        let scale = self.config.gear_ratio * self.config.rad_to_ticks;
        let min_ticks = (min * scale) as i32;
        let max_ticks = (max * scale) as i32;
        self.write(
            bus,
            object_ids::SOFTWARE_POSITION_LIMIT,
            1,
            &min_ticks.to_le_bytes(),
        )?;
        self.write(
            bus,
            object_ids::SOFTWARE_POSITION_LIMIT,
            2,
            &max_ticks.to_le_bytes(),
        )
    }

    /// Configure the device to send TPDO3 (position, velocity) and TPDO4 (analog, current) on
    /// every SYNC, with all other TPDOs disabled
    pub fn configure_mapping<S: CanSender>(&self, bus: &mut Bus<S>) -> Result<(), DeviceError> {
        for n in 0..4 {
            self.write(bus, object_ids::TPDO_MAP_BASE + n, 0, &[0])?;
        }
        self.configure_tpdo(bus, 2, &self.tpdo_config(TPDO3_BASE, &POSITION_VELOCITY_MAP))?;
        self.configure_tpdo(bus, 3, &self.tpdo_config(TPDO4_BASE, &ANALOG_CURRENT_MAP))
    }

    fn tpdo_config(&self, base: u16, mappings: &[PdoMapping]) -> PdoConfig {
        PdoConfig {
            cob_id: cob_id(base, self.node_id.raw()),
            enabled: true,
            mappings: mappings.to_vec(),
            transmission_type: TRANSMISSION_TYPE_SYNC,
        }
    }

    /// Write the communication and mapping parameters of one TPDO (0 based)
    ///
    /// The mapping count is zeroed before the entries are written and set last, so the node never
    /// sees a partial mapping.
    fn configure_tpdo<S: CanSender>(
        &self,
        bus: &mut Bus<S>,
        tpdo: u16,
        config: &PdoConfig,
    ) -> Result<(), DeviceError> {
        let comm = object_ids::TPDO_COMM_BASE + tpdo;
        let map = object_ids::TPDO_MAP_BASE + tpdo;
        self.write(bus, comm, 1, &config.cob_id_value().to_le_bytes())?;
        self.write(bus, comm, 2, &[config.transmission_type])?;
        self.write(bus, map, 0, &[0])?;
        for (i, m) in config.mappings.iter().enumerate() {
            self.write(bus, map, i as u8 + 1, &m.to_object_value().to_le_bytes())?;
        }
        self.write(bus, map, 0, &[config.mappings.len() as u8])
    }

    /// Bring the device up: start its NMT state machine, configure its PDOs and position limits,
    /// then clear any fault and request Ready to switch on
    pub fn initialize<S: CanSender>(&mut self, bus: &mut Bus<S>) -> Result<(), DeviceError> {
        self.reset_queries();
        if let Err(msg) = bus.send_nmt(NmtCommandSpecifier::Start, Some(self.node_id)) {
            return SendFailedSnafu {
                name: self.name(),
                cob_id: msg.id(),
            }
            .fail();
        }
        self.configure_mapping(bus)?;
        if let Some(limits) = self.config.position_limits {
            self.set_position_limits(bus, limits)?;
        }
        self.control(bus, ControlCommand::FaultReset)?;
        self.control(bus, ControlCommand::Shutdown)
    }

    /// Run homing method 35, which takes the current position as home
    pub fn start_homing<S: CanSender>(&mut self, bus: &mut Bus<S>) -> Result<(), DeviceError> {
        self.reset_queries();
        self.set_mode(bus, OperationMode::Homing)?;
        self.write(
            bus,
            object_ids::HOMING_METHOD,
            0,
            &[HOMING_METHOD_CURRENT_POSITION as u8],
        )?;
        self.control(bus, ControlCommand::Shutdown)?;
        self.control(bus, ControlCommand::SwitchOn)?;
        self.control(bus, ControlCommand::EnableOperation)?;
        self.control(bus, ControlCommand::StartHoming)
    }

    /// Enable the motor in profile velocity mode with a zero velocity command
    pub fn enable<S: CanSender>(&mut self, bus: &mut Bus<S>) -> Result<(), DeviceError> {
        self.reset_queries();
        self.set_velocity(bus, 0.0)?;
        self.set_mode(bus, OperationMode::ProfileVelocity)?;
        self.control(bus, ControlCommand::FaultReset)?;
        self.control(bus, ControlCommand::Shutdown)?;
        self.control(bus, ControlCommand::SwitchOn)?;
        self.control(bus, ControlCommand::EnableOperation)
    }

    /// Disable the motor and zero the velocity command
    pub fn disable<S: CanSender>(&mut self, bus: &mut Bus<S>) -> Result<(), DeviceError> {
        self.reset_queries();
        self.set_velocity(bus, 0.0)?;
        self.control(bus, ControlCommand::DISABLE_OPERATION)
    }

    /// Set the velocity command, in rad/s at the gear output
    ///
    /// The value is sent in RPDO1 on every tick.
    pub fn set_velocity<S: CanSender>(
        &self,
        bus: &mut Bus<S>,
        rad_s: f64,
    ) -> Result<(), DeviceError> {
        let counts = (rad_s * self.config.rad_s_to_counts_s).round() as i32;
        bus.pdos_mut()
            .set_field(
                self.target_velocity_cob_id(),
                object_ids::TARGET_VELOCITY,
                0,
                counts as u32,
            )
            .context(ConfigurationSnafu { name: self.name() })
    }

    /// The velocity command currently sent to the device, in rad/s
    pub fn commanded_velocity<S: CanSender>(&self, bus: &Bus<S>) -> Option<f64> {
        let counts = bus
            .pdos()
            .transmitter(self.target_velocity_cob_id())?
            .get(object_ids::TARGET_VELOCITY, 0)? as i32;
        Some(counts as f64 / self.config.rad_s_to_counts_s)
    }

    /// Forget all outstanding status queries
    ///
    /// Queries already submitted still complete on the bus, but their answers are ignored.
    pub fn reset_queries(&mut self) {
        self.queries = Default::default();
    }

    /// Is the drive in Ready to switch on or Switched on
    pub fn get_is_ready<S: CanSender>(
        &mut self,
        bus: &mut Bus<S>,
    ) -> Result<QueryResult, DeviceError> {
        self.query(bus, StatusQuery::Ready)
    }

    /// Is the drive in Operation enabled
    pub fn get_is_enabled<S: CanSender>(
        &mut self,
        bus: &mut Bus<S>,
    ) -> Result<QueryResult, DeviceError> {
        self.query(bus, StatusQuery::Enabled)
    }

    /// Has the drive left Operation enabled without faulting
    pub fn get_is_disabled<S: CanSender>(
        &mut self,
        bus: &mut Bus<S>,
    ) -> Result<QueryResult, DeviceError> {
        self.query(bus, StatusQuery::Disabled)
    }

    /// Has the drive completed homing
    pub fn get_is_homed<S: CanSender>(
        &mut self,
        bus: &mut Bus<S>,
    ) -> Result<QueryResult, DeviceError> {
        self.query(bus, StatusQuery::Homed)
    }

    /// Advance one status query by a step
    ///
    /// At most one statusword read per query kind is outstanding. A received answer is returned
    /// once and the slot goes idle, so the next call reads the statusword again. Timed out and
    /// aborted reads are replaced by a fresh read.
    fn query<S: CanSender>(
        &mut self,
        bus: &mut Bus<S>,
        query: StatusQuery,
    ) -> Result<QueryResult, DeviceError> {
        let i = query as usize;
        if let QuerySlot::Pending(t) = std::mem::take(&mut self.queries[i]) {
            match t.state() {
                TransactionState::Queued | TransactionState::Waiting => {
                    self.queries[i] = QuerySlot::Pending(t);
                    return Ok(QueryResult::Pending);
                }
                TransactionState::Received => {
                    if let Some(statusword) = t.data().and_then(|d| d.to_u16()) {
                        self.last_statusword = Some(statusword);
                        return Ok(QueryResult::Determined(query.evaluate(statusword)));
                    }
                    log::debug!(
                        "Device {}: statusword read failed ({:?}), retrying",
                        self.name(),
                        t.abort_code()
                    );
                }
                TransactionState::TimedOut => {
                    log::debug!("Device {}: statusword read timed out, retrying", self.name());
                }
            }
        }

        let t = SdoTransaction::read(
            self.node_id,
            object_ids::STATUSWORD,
            0,
            bus.sdo_timeout_us(),
        );
        bus.submit(&t).context(SdoSnafu { name: self.name() })?;
        self.queries[i] = QuerySlot::Pending(t);
        Ok(QueryResult::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdpc_common::{
        device_config::BusConfig,
        messages::{SDO_REQ_BASE, SDO_RESP_BASE},
        sdo::{AbortCode, SdoRequest, SdoResponse},
        CanMessage,
    };

    #[derive(Default, Debug)]
    struct CaptureSender {
        sent: Vec<CanMessage>,
    }

    impl CanSender for CaptureSender {
        fn send(&mut self, msg: CanMessage) -> Result<(), CanMessage> {
            self.sent.push(msg);
            Ok(())
        }
    }

    fn device(node: u8) -> Device {
        let mut config = DeviceConfig::new("test", NodeId::new(node).unwrap(), DeviceKind::Driving);
        config.gear_ratio = 10.0;
        config.rad_to_ticks = 100.0;
        config.rad_s_to_counts_s = 1000.0;
        Device::new(config)
    }

    fn bus() -> Bus<CaptureSender> {
        let config = BusConfig {
            sdo_window: 8,
            produce_sync: false,
            ..Default::default()
        };
        Bus::new(CaptureSender::default(), &config)
    }

    /// Decode all SDO requests sent to `node`, clearing the capture
    fn take_requests(bus: &mut Bus<CaptureSender>, node: u8) -> Vec<SdoRequest> {
        let sent = std::mem::take(&mut bus.sender_mut().sent);
        sent.iter()
            .filter(|m| m.id() == cob_id(SDO_REQ_BASE, node))
            .map(|m| SdoRequest::try_from(m.data()).unwrap())
            .collect()
    }

    /// Tick and confirm every request to `node` until nothing is left, returning the requests in
    /// the order they were sent
    fn confirm_all(bus: &mut Bus<CaptureSender>, node: u8) -> Vec<SdoRequest> {
        let mut requests = Vec::new();
        for now_us in 0..100 {
            bus.tick(now_us);
            let sent = take_requests(bus, node);
            if sent.is_empty() {
                break;
            }
            for req in &sent {
                let (index, sub) = req.object();
                let resp = match req {
                    SdoRequest::InitiateUpload { .. } => SdoResponse::upload(index, sub, &[0, 0]),
                    _ => SdoResponse::download_confirmed(index, sub),
                };
                respond(bus, node, resp, now_us);
            }
            requests.extend(sent);
        }
        requests
    }

    fn respond(bus: &mut Bus<CaptureSender>, node: u8, resp: SdoResponse, now_us: u64) {
        bus.on_frame(
            &CanMessage::new(cob_id(SDO_RESP_BASE, node), &resp.to_bytes()),
            now_us,
        );
    }

    #[test]
    fn test_scaled_process_data() {
        let mut bus = bus();
        let dev = device(2);
        dev.attach(&mut bus).unwrap();
        assert_eq!(None, dev.get_position(&bus));

        let mut data = Vec::new();
        data.extend_from_slice(&(-2000i32).to_le_bytes());
        data.extend_from_slice(&500i32.to_le_bytes());
        bus.on_frame(&CanMessage::new(CanId::std(0x382), &data), 5);
        bus.on_frame(
            &CanMessage::new(CanId::std(0x482), &[0x0A, 0x00, 0xF6, 0xFF]),
            6,
        );

        assert_eq!(Some(-2.0), dev.get_position(&bus));
        assert_eq!(Some(0.5), dev.get_velocity(&bus));
        assert_eq!(Some(10.0), dev.get_analog(&bus));
        assert_eq!(Some(-10.0), dev.get_current(&bus));
        assert_eq!(Some(6), dev.last_update_us(&bus));

        // A second attach is a configuration error
        assert!(matches!(
            dev.attach(&mut bus),
            Err(DeviceError::Configuration { .. })
        ));
    }

    #[test]
    fn test_velocity_command() {
        let mut bus = bus();
        let dev = device(3);
        dev.attach(&mut bus).unwrap();
        dev.set_velocity(&mut bus, -1.5).unwrap();
        assert_eq!(Some(-1.5), dev.commanded_velocity(&bus));

        bus.tick(0);
        let sent = &bus.sender().sent;
        assert_eq!(CanId::std(0x203), sent[0].id());
        assert_eq!(&(-1500i32).to_le_bytes(), sent[0].data());
    }

    #[test]
    fn test_single_outstanding_query() {
        let mut bus = bus();
        let mut dev = device(4);

        assert_eq!(QueryResult::Pending, dev.get_is_enabled(&mut bus).unwrap());
        assert_eq!(QueryResult::Pending, dev.get_is_enabled(&mut bus).unwrap());
        bus.tick(0);
        // Only one read went out
        assert_eq!(
            vec![SdoRequest::initiate_upload(0x6041, 0)],
            take_requests(&mut bus, 4)
        );
        assert_eq!(QueryResult::Pending, dev.get_is_enabled(&mut bus).unwrap());

        respond(
            &mut bus,
            4,
            SdoResponse::upload(0x6041, 0, &0x0237u16.to_le_bytes()),
            10,
        );
        assert_eq!(
            QueryResult::Determined(true),
            dev.get_is_enabled(&mut bus).unwrap()
        );
        assert_eq!(Some(PowerState::OperationEnabled), dev.power_state());

        // The next call starts a fresh read
        assert_eq!(QueryResult::Pending, dev.get_is_enabled(&mut bus).unwrap());
        bus.tick(20);
        assert_eq!(1, take_requests(&mut bus, 4).len());
    }

    #[test]
    fn test_query_retries_after_timeout_and_abort() {
        let mut bus = bus();
        let mut dev = device(5);
        let timeout = bus.sdo_timeout_us();

        dev.get_is_disabled(&mut bus).unwrap();
        bus.tick(0);
        bus.tick(timeout + 1);
        assert_eq!(1, take_requests(&mut bus, 5).len());

        // Timed out: re-armed, still pending
        assert_eq!(QueryResult::Pending, dev.get_is_disabled(&mut bus).unwrap());
        bus.tick(timeout + 2);
        assert_eq!(1, take_requests(&mut bus, 5).len());

        respond(
            &mut bus,
            5,
            SdoResponse::abort(0x6041, 0, AbortCode::GeneralError),
            timeout + 3,
        );
        assert_eq!(QueryResult::Pending, dev.get_is_disabled(&mut bus).unwrap());
        bus.tick(timeout + 4);
        assert_eq!(1, take_requests(&mut bus, 5).len());

        respond(
            &mut bus,
            5,
            SdoResponse::upload(0x6041, 0, &0x0233u16.to_le_bytes()),
            timeout + 5,
        );
        assert_eq!(
            QueryResult::Determined(true),
            dev.get_is_disabled(&mut bus).unwrap()
        );
    }

    #[test]
    fn test_configure_mapping_sequence() {
        let config = BusConfig {
            sdo_window: 32,
            produce_sync: false,
            ..Default::default()
        };
        let mut bus = Bus::new(CaptureSender::default(), &config);
        let dev = device(6);
        dev.configure_mapping(&mut bus).unwrap();
        let requests = confirm_all(&mut bus, 6);
        let objects: Vec<(u16, u8)> = requests.iter().map(|r| r.object()).collect();
        assert_eq!(
            vec![
                (0x1A00, 0),
                (0x1A01, 0),
                (0x1A02, 0),
                (0x1A03, 0),
                (0x1802, 1),
                (0x1802, 2),
                (0x1A02, 0),
                (0x1A02, 1),
                (0x1A02, 2),
                (0x1A02, 0),
                (0x1803, 1),
                (0x1803, 2),
                (0x1A03, 0),
                (0x1A03, 1),
                (0x1A03, 2),
                (0x1A03, 0),
            ],
            objects
        );
        assert_eq!(
            SdoRequest::expedited_download(0x1802, 1, &0x386u32.to_le_bytes()),
            requests[4]
        );
        assert_eq!(
            SdoRequest::expedited_download(0x1A03, 1, &0x2205_0110u32.to_le_bytes()),
            requests[13]
        );
        assert_eq!(
            SdoRequest::expedited_download(0x1A03, 0, &[2]),
            requests[15]
        );
    }

    #[test]
    fn test_position_limits_sorted_and_truncated() {
        let mut bus = bus();
        let dev = device(7);
        dev.set_position_limits(&mut bus, [0.5, -0.25]).unwrap();
        let requests = confirm_all(&mut bus, 7);
        assert_eq!(
            vec![
                SdoRequest::expedited_download(0x607D, 1, &(-250i32).to_le_bytes()),
                SdoRequest::expedited_download(0x607D, 2, &500i32.to_le_bytes()),
            ],
            requests
        );
    }

    #[test]
    fn test_enable_and_disable_commands() {
        let mut bus = bus();
        let mut dev = device(8);
        dev.attach(&mut bus).unwrap();
        dev.enable(&mut bus).unwrap();
        let requests = confirm_all(&mut bus, 8);
        let controlwords: Vec<SdoRequest> = requests
            .into_iter()
            .filter(|r| r.object() == (0x6040, 0))
            .collect();
        assert_eq!(
            vec![
                SdoRequest::expedited_download(0x6040, 0, &0x80u16.to_le_bytes()),
                SdoRequest::expedited_download(0x6040, 0, &0x06u16.to_le_bytes()),
                SdoRequest::expedited_download(0x6040, 0, &0x07u16.to_le_bytes()),
                SdoRequest::expedited_download(0x6040, 0, &0x0Fu16.to_le_bytes()),
            ],
            controlwords
        );
    }
}
