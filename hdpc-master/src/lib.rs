//! CANopen master for a fleet of CiA 402 motor controllers
//!
//! The master is driven by a single periodic tick. Nothing in this crate blocks: SDO accesses are
//! submitted as [`SdoTransaction`]s and their completion is observed on later ticks, while
//! process data arrives through PDOs decoded by the [`PdoRegistry`].
//!
//! - [`SdoManager`] queues transactions, transmits them within an in-flight window, matches
//!   responses and detects timeouts.
//! - [`PdoRegistry`] decodes inbound PDOs and encodes outbound ones.
//! - [`Bus`] owns both, routes received frames, and produces SYNC.
//! - [`Device`] is the per-node view: scaled process data, CiA 402 commands and status queries.
#![warn(missing_docs, missing_copy_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod bus;
mod device;
mod pdo_registry;
mod sdo_manager;

pub use bus::Bus;
pub use device::{Device, DeviceError, QueryResult};
pub use pdo_registry::{PdoError, PdoLayout, PdoRegistry, ReceivePdo, TransmitPdo};
pub use sdo_manager::{
    RawAbortCode, SdoDirection, SdoManager, SdoManagerError, SdoTransaction, TransactionState,
};

pub use hdpc_common as common;
