pub mod sim_bus;
pub mod utils;

pub mod prelude {
    pub use super::sim_bus::{SimBus, SimBusReceiver, SimBusSender, SimNode};
    pub use super::utils::{fleet_config, init_logging, BusLogger, TestFleet};
    pub use hdpc_common::{
        cia402::PowerState, device_config::FleetConfig, nmt::NmtState, sdo::AbortCode, CanId,
        CanMessage, NodeId,
    };
    pub use hdpc_master::{Bus, Device, QueryResult, SdoTransaction, TransactionState};
    pub use hdpc_supervisor::{DriveMode, Event, EventResult, StateId, StateInfo, Supervisor};
}
