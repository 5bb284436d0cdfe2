#![allow(dead_code)]
use hdpc_common::{
    device_config::FleetConfig, messages::SDO_REQ_BASE, messages::SDO_RESP_BASE, nmt::Heartbeat,
    sdo::SdoRequest, sdo::SdoResponse, traits::CanReceiver, CanMessage,
};
use hdpc_master::{Bus, Device};
use hdpc_supervisor::{Event, EventResult, StateId, Supervisor};

use crate::sim_bus::{SimBus, SimBusReceiver, SimBusSender, SimNode};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Build a fleet config with one device per entry of `kinds` ("driving" or "steering"), on node
/// IDs 1, 2, ...
pub fn fleet_config(kinds: &[&str], sdo_window: usize) -> FleetConfig {
    let mut toml = format!(
        "[bus]\nsdo_window = {sdo_window}\nsdo_timeout_ms = 100\nsync_period_ms = 10\n"
    );
    for (i, kind) in kinds.iter().enumerate() {
        toml.push_str(&format!(
            r#"
[[devices]]
name = "{kind}-{i}"
node_id = {node}
kind = "{kind}"
gear_ratio = 2.0
rad_to_ticks = 1000.0
rad_s_to_counts_s = 1000.0
position_limits = [1.5, -1.5]
test_velocity = 0.5
"#,
            node = i + 1
        ));
    }
    FleetConfig::load_from_str(&toml).expect("invalid test config")
}

/// Drain received frames into the bus, then run one bus tick
pub fn pump(bus: &mut Bus<SimBusSender>, rx: &mut SimBusReceiver, now_us: u64) {
    while let Some(msg) = rx.try_recv() {
        bus.on_frame(&msg, now_us);
    }
    bus.tick(now_us);
}

/// A simulated fleet: one [`SimNode`] per configured device, a bus, and a supervisor
pub struct TestFleet {
    pub sim: SimBus,
    pub bus: Bus<SimBusSender>,
    pub rx: SimBusReceiver,
    pub supervisor: Supervisor<Device>,
    pub now_us: u64,
    period_us: u64,
}

impl TestFleet {
    pub fn new(config: &FleetConfig) -> Self {
        let sim = SimBus::new();
        for device in &config.devices {
            sim.add_node(SimNode::new(device.node_id().raw()));
        }
        let mut bus = Bus::new(sim.new_sender(), &config.bus);
        let rx = sim.new_receiver();
        let devices = config.devices.iter().cloned().map(Device::new).collect();
        let supervisor = Supervisor::new(devices, &mut bus).expect("supervisor setup failed");
        Self {
            sim,
            bus,
            rx,
            supervisor,
            now_us: 0,
            period_us: config.bus.sync_period_ms * 1000,
        }
    }

    /// One control period: receive, Execute, then tick the bus
    pub fn step(&mut self) {
        while let Some(msg) = self.rx.try_recv() {
            self.bus.on_frame(&msg, self.now_us);
        }
        self.supervisor.process_event(Event::Execute, &mut self.bus);
        self.bus.tick(self.now_us);
        self.now_us += self.period_us;
    }

    pub fn run(&mut self, steps: usize) {
        for _ in 0..steps {
            self.step();
        }
    }

    /// Step until the supervisor is in `state`, and return the number of steps taken
    pub fn run_until(&mut self, state: StateId, max_steps: usize) -> usize {
        for n in 0..=max_steps {
            if self.supervisor.state() == state {
                return n;
            }
            self.step();
        }
        panic!(
            "Did not reach {state} within {max_steps} steps, stuck in {}",
            self.supervisor.state()
        );
    }

    pub fn event(&mut self, event: Event) -> EventResult {
        self.supervisor.process_event(event, &mut self.bus)
    }

    pub fn state(&self) -> StateId {
        self.supervisor.state()
    }

    pub fn device(&self, i: usize) -> &Device {
        &self.supervisor.devices()[i]
    }
}

/// Prints the bus history when dropped
pub struct BusLogger {
    sim: SimBus,
}

impl BusLogger {
    pub fn new(sim: &SimBus) -> Self {
        Self { sim: sim.clone() }
    }

    pub fn print(&self) {
        println!("Bus message history");
        println!("-------------------");
        for msg in self.sim.history() {
            println!("{}", describe(&msg));
        }
    }
}

impl Drop for BusLogger {
    fn drop(&mut self) {
        self.print();
    }
}

fn describe(msg: &CanMessage) -> String {
    match msg.id().function_and_node() {
        Some((SDO_REQ_BASE, node)) if node != 0 => match SdoRequest::try_from(msg.data()) {
            Ok(req) => format!("{} SDO -> {node}: {req:?}", msg.id()),
            Err(_) => format!("{msg:?}"),
        },
        Some((SDO_RESP_BASE, node)) if node != 0 => match SdoResponse::try_from(msg.data()) {
            Ok(resp) => format!("{} SDO <- {node}: {resp:?}", msg.id()),
            Err(_) => format!("{msg:?}"),
        },
        _ => match Heartbeat::try_from(msg) {
            Ok(hb) => format!("{} Heartbeat {} {}", msg.id(), hb.node, hb.state),
            Err(_) => format!("{msg:?}"),
        },
    }
}
