//! Common functionality shared among the hdpc crates.
//!
//! This crate holds the protocol level building blocks used by the fleet master: CAN message
//! types, node IDs, the NMT and expedited SDO codecs, PDO mapping definitions, CiA 402 drive
//! profile helpers, and the fleet configuration file format.
#![warn(missing_docs, missing_copy_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod cia402;
pub mod constants;
pub mod device_config;
pub mod messages;
pub mod nmt;
pub mod node_id;
pub mod pdo;
pub mod sdo;
pub mod traits;

#[cfg(all(feature = "socketcan", target_os = "linux"))]
mod socketcan;

#[cfg(all(feature = "socketcan", target_os = "linux"))]
#[cfg_attr(docsrs, doc(cfg(feature = "socketcan")))]
pub use socketcan::{open_socketcan, SocketCanReceiver, SocketCanSender};

pub use messages::{CanError, CanId, CanMessage};
pub use node_id::NodeId;
