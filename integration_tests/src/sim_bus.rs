//! An in-memory CAN bus populated with simulated CiA 402 motor controllers
use std::{
    cell::{RefCell, RefMut},
    collections::{BTreeMap, VecDeque},
    rc::Rc,
    time::Duration,
};

use hdpc_common::{
    cia402::{
        ControlCommand, OperationMode, PowerState, STATUS_HOMING_ATTAINED, STATUS_TARGET_REACHED,
    },
    constants::object_ids,
    messages::{
        cob_id, CanId, CanMessage, NMT_CMD_ID, RPDO1_BASE, SDO_REQ_BASE, SDO_RESP_BASE, SYNC_ID,
    },
    nmt::{Heartbeat, NmtCommand, NmtCommandSpecifier, NmtState},
    pdo::PdoMapping,
    sdo::{AbortCode, SdoRequest, SdoResponse},
    traits::{CanReceiver, CanSender},
    NodeId,
};

/// A simulated motor controller
///
/// The node answers expedited SDO reads and writes, runs a simplified CiA 402 power state machine
/// driven by controlword writes, and sends its configured TPDOs on SYNC while Operational.
#[derive(Debug)]
pub struct SimNode {
    node_id: NodeId,
    nmt_state: NmtState,
    power_state: PowerState,
    mode: i8,
    homed: bool,
    target_velocity: i32,
    position: i32,
    current: i16,
    analog: i16,
    /// Every other object written over SDO
    objects: BTreeMap<(u16, u8), u32>,
    muted: bool,
    rx_count: usize,
}

impl SimNode {
    pub fn new(node_id: u8) -> Self {
        Self {
            node_id: NodeId::new(node_id).expect("invalid node id"),
            nmt_state: NmtState::PreOperational,
            power_state: PowerState::SwitchOnDisabled,
            mode: 0,
            homed: false,
            target_velocity: 0,
            position: 0,
            current: 0,
            analog: 0,
            objects: BTreeMap::new(),
            muted: false,
            rx_count: 0,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn nmt_state(&self) -> NmtState {
        self.nmt_state
    }

    pub fn power_state(&self) -> PowerState {
        self.power_state
    }

    pub fn is_homed(&self) -> bool {
        self.homed
    }

    /// The velocity most recently received in RPDO1, in counts/s
    pub fn target_velocity(&self) -> i32 {
        self.target_velocity
    }

    /// The velocity the drive is actually turning at
    pub fn velocity_actual(&self) -> i32 {
        if self.power_state == PowerState::OperationEnabled
            && self.mode == OperationMode::ProfileVelocity as i8
        {
            self.target_velocity
        } else {
            0
        }
    }

    pub fn set_position(&mut self, ticks: i32) {
        self.position = ticks;
    }

    pub fn set_current(&mut self, current: i16) {
        self.current = current;
    }

    pub fn set_analog(&mut self, analog: i16) {
        self.analog = analog;
    }

    /// Force the drive into Fault
    pub fn trip(&mut self) {
        self.power_state = PowerState::Fault;
    }

    /// A muted node ignores all traffic and sends nothing
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    /// Raw object value, as last written by the master
    pub fn object(&self, index: u16, sub: u8) -> Option<u32> {
        self.objects.get(&(index, sub)).copied()
    }

    /// Number of frames this node has processed
    pub fn rx_count(&self) -> usize {
        self.rx_count
    }

    pub fn heartbeat(&self) -> CanMessage {
        Heartbeat {
            node: self.node_id,
            toggle: false,
            state: self.nmt_state,
        }
        .to_can_message()
    }

    fn statusword(&self) -> u16 {
        let mut sw = self.power_state.statusword();
        if self.homed {
            sw |= STATUS_TARGET_REACHED | STATUS_HOMING_ATTAINED;
        }
        sw
    }

    /// Handle one frame seen on the bus, and return the frames sent in response
    pub fn handle(&mut self, msg: &CanMessage) -> Vec<CanMessage> {
        if self.muted {
            return Vec::new();
        }
        let id = msg.id();
        let node = self.node_id.raw();
        let own = |base| cob_id(base, node);
        if id == NMT_CMD_ID {
            self.rx_count += 1;
            self.handle_nmt(msg)
        } else if id == SYNC_ID {
            self.rx_count += 1;
            self.handle_sync()
        } else if id == own(SDO_REQ_BASE) {
            self.rx_count += 1;
            self.handle_sdo(msg).into_iter().collect()
        } else if id == own(RPDO1_BASE) {
            self.rx_count += 1;
            if let Ok(bytes) = <[u8; 4]>::try_from(msg.data()) {
                self.target_velocity = i32::from_le_bytes(bytes);
            }
            Vec::new()
        } else {
            Vec::new()
        }
    }

    fn handle_nmt(&mut self, msg: &CanMessage) -> Vec<CanMessage> {
        let Ok(cmd) = NmtCommand::try_from(msg) else {
            return Vec::new();
        };
        if cmd.node != 0 && cmd.node != self.node_id.raw() {
            return Vec::new();
        }
        let new_state = match cmd.cs {
            NmtCommandSpecifier::Start => NmtState::Operational,
            NmtCommandSpecifier::Stop => NmtState::Stopped,
            NmtCommandSpecifier::EnterPreOp
            | NmtCommandSpecifier::ResetApp
            | NmtCommandSpecifier::ResetComm => NmtState::PreOperational,
        };
        if new_state != self.nmt_state {
            self.nmt_state = new_state;
            vec![self.heartbeat()]
        } else {
            Vec::new()
        }
    }

    fn handle_sync(&mut self) -> Vec<CanMessage> {
        // 10ms worth of motion per SYNC
        self.position = self.position.wrapping_add(self.velocity_actual() / 100);
        if self.nmt_state != NmtState::Operational {
            return Vec::new();
        }
        let mut out = Vec::new();
        for n in 0..4 {
            let count = self.object(object_ids::TPDO_MAP_BASE + n, 0).unwrap_or(0);
            let Some(cob) = self.object(object_ids::TPDO_COMM_BASE + n, 1) else {
                continue;
            };
            if count == 0 || cob & (1 << 31) != 0 {
                continue;
            }
            let mut data = Vec::new();
            for i in 1..=count as u8 {
                let raw = self.object(object_ids::TPDO_MAP_BASE + n, i).unwrap_or(0);
                let mapping = PdoMapping::from_object_value(raw);
                let value = self.read(mapping.index, mapping.sub).unwrap_or(0);
                let bytes = (mapping.size / 8) as usize;
                data.extend_from_slice(&value.to_le_bytes()[..bytes.min(4)]);
            }
            out.push(CanMessage::new(CanId::std((cob & 0x7FF) as u16), &data));
        }
        out
    }

    fn handle_sdo(&mut self, msg: &CanMessage) -> Option<CanMessage> {
        let request = SdoRequest::try_from(msg.data()).ok()?;
        let response = match request {
            SdoRequest::InitiateUpload { index, sub } => match self.read(index, sub) {
                Some(value) => {
                    let len = object_size(index, sub);
                    SdoResponse::upload(index, sub, &value.to_le_bytes()[..len])
                }
                None => SdoResponse::abort(index, sub, AbortCode::NoSuchObject),
            },
            SdoRequest::ExpeditedDownload { index, sub, data } => {
                if index == object_ids::STATUSWORD {
                    SdoResponse::abort(index, sub, AbortCode::ReadOnly)
                } else {
                    self.write(index, sub, data.to_u32());
                    SdoResponse::download_confirmed(index, sub)
                }
            }
            SdoRequest::Abort { .. } => return None,
        };
        Some(CanMessage::new(
            cob_id(SDO_RESP_BASE, self.node_id.raw()),
            &response.to_bytes(),
        ))
    }

    fn read(&self, index: u16, sub: u8) -> Option<u32> {
        match (index, sub) {
            (object_ids::STATUSWORD, 0) => Some(self.statusword() as u32),
            (object_ids::MODES_OF_OPERATION, 0) => Some(self.mode as u8 as u32),
            (object_ids::POSITION_ACTUAL, 0) => Some(self.position as u32),
            (object_ids::VELOCITY_ACTUAL, 0) => Some(self.velocity_actual() as u32),
            (object_ids::CURRENT_ACTUAL, 0) => Some(self.current as u16 as u32),
            (object_ids::ANALOG_INPUT, 1) => Some(self.analog as u16 as u32),
            _ => self.object(index, sub),
        }
    }

    fn write(&mut self, index: u16, sub: u8, value: u32) {
        match (index, sub) {
            (object_ids::CONTROLWORD, 0) => self.apply_controlword(value as u16),
            (object_ids::MODES_OF_OPERATION, 0) => self.mode = value as u8 as i8,
            _ => (),
        }
        self.objects.insert((index, sub), value);
    }

    fn apply_controlword(&mut self, word: u16) {
        use PowerState::*;
        if word & ControlCommand::FaultReset.word() != 0 {
            if self.power_state.is_fault() {
                self.power_state = SwitchOnDisabled;
            }
            return;
        }
        let enable_bits = word & 0x0F;
        self.power_state = match (enable_bits, self.power_state) {
            (0x06 | 0x0E, SwitchOnDisabled | SwitchedOn | OperationEnabled) => ReadyToSwitchOn,
            (0x07, ReadyToSwitchOn | OperationEnabled) => SwitchedOn,
            (0x0F, SwitchedOn) => OperationEnabled,
            (_, state) => state,
        };
        if self.power_state == OperationEnabled
            && self.mode == OperationMode::Homing as i8
            && word & 0x10 != 0
        {
            self.homed = true;
        }
    }
}

/// The size in bytes of the objects the simulated node serves
fn object_size(index: u16, sub: u8) -> usize {
    match (index, sub) {
        (object_ids::STATUSWORD, 0)
        | (object_ids::CONTROLWORD, 0)
        | (object_ids::CURRENT_ACTUAL, 0)
        | (object_ids::ANALOG_INPUT, 1) => 2,
        (object_ids::MODES_OF_OPERATION, 0) | (object_ids::HOMING_METHOD, 0) => 1,
        (idx, 0) if (object_ids::TPDO_MAP_BASE..object_ids::TPDO_MAP_BASE + 4).contains(&idx) => 1,
        _ => 4,
    }
}

#[derive(Debug, Default)]
struct Shared {
    nodes: Vec<SimNode>,
    to_master: VecDeque<CanMessage>,
    history: Vec<CanMessage>,
    sender_blocked: bool,
}

/// The simulated bus
///
/// Frames sent through a [`SimBusSender`] are delivered synchronously to every node, and node
/// responses are queued for the [`SimBusReceiver`].
#[derive(Clone, Debug, Default)]
pub struct SimBus {
    shared: Rc<RefCell<Shared>>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, node: SimNode) {
        self.shared.borrow_mut().nodes.push(node);
    }

    /// Access a node by node ID
    pub fn node(&self, node_id: u8) -> RefMut<'_, SimNode> {
        RefMut::map(self.shared.borrow_mut(), |s| {
            s.nodes
                .iter_mut()
                .find(|n| n.node_id.raw() == node_id)
                .expect("no such node on the bus")
        })
    }

    pub fn new_sender(&self) -> SimBusSender {
        SimBusSender {
            shared: self.shared.clone(),
        }
    }

    pub fn new_receiver(&self) -> SimBusReceiver {
        SimBusReceiver {
            shared: self.shared.clone(),
        }
    }

    /// Put a frame on the bus as if a node had sent it
    pub fn inject(&self, msg: CanMessage) {
        let mut shared = self.shared.borrow_mut();
        shared.history.push(msg);
        shared.to_master.push_back(msg);
    }

    /// Have every node which is not muted send a heartbeat
    pub fn emit_heartbeats(&self) {
        let mut shared = self.shared.borrow_mut();
        let beats: Vec<CanMessage> = shared
            .nodes
            .iter()
            .filter(|n| !n.muted)
            .map(|n| n.heartbeat())
            .collect();
        for msg in beats {
            shared.history.push(msg);
            shared.to_master.push_back(msg);
        }
    }

    /// Make every send fail until unblocked
    pub fn set_sender_blocked(&self, blocked: bool) {
        self.shared.borrow_mut().sender_blocked = blocked;
    }

    /// Every frame seen on the bus, in order
    pub fn history(&self) -> Vec<CanMessage> {
        self.shared.borrow().history.clone()
    }

    pub fn clear_history(&self) {
        self.shared.borrow_mut().history.clear();
    }

    /// SDO requests sent to a node, decoded
    pub fn sdo_requests(&self, node_id: u8) -> Vec<SdoRequest> {
        let id = cob_id(SDO_REQ_BASE, node_id);
        self.shared
            .borrow()
            .history
            .iter()
            .filter(|m| m.id() == id)
            .filter_map(|m| SdoRequest::try_from(m.data()).ok())
            .collect()
    }
}

/// The master's transmit handle on the simulated bus
#[derive(Debug)]
pub struct SimBusSender {
    shared: Rc<RefCell<Shared>>,
}

impl CanSender for SimBusSender {
    fn send(&mut self, msg: CanMessage) -> Result<(), CanMessage> {
        let mut shared = self.shared.borrow_mut();
        if shared.sender_blocked {
            return Err(msg);
        }
        shared.history.push(msg);
        let Shared {
            nodes,
            to_master,
            history,
            ..
        } = &mut *shared;
        for node in nodes.iter_mut() {
            for reply in node.handle(&msg) {
                history.push(reply);
                to_master.push_back(reply);
            }
        }
        Ok(())
    }
}

/// The master's receive handle on the simulated bus
#[derive(Debug)]
pub struct SimBusReceiver {
    shared: Rc<RefCell<Shared>>,
}

impl CanReceiver for SimBusReceiver {
    type Error = ();

    fn try_recv(&mut self) -> Option<CanMessage> {
        self.shared.borrow_mut().to_master.pop_front()
    }

    fn recv(&mut self, _timeout: Duration) -> Result<CanMessage, Self::Error> {
        self.try_recv().ok_or(())
    }
}
