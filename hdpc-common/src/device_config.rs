//! Fleet configuration file
//!
//! The fleet master is configured by a TOML file describing bus timing and each motor controller
//! on the bus.
//!
//! # Example
//!
//! ```toml
//! [bus]
//! sdo_window = 1
//! sdo_timeout_ms = 100
//! sync_period_ms = 10
//!
//! [[devices]]
//! name = "front-left-drive"
//! node_id = 1
//! kind = "driving"
//! gear_ratio = 50.0
//! rad_to_ticks = 651.8986
//! rad_s_to_counts_s = 32594.93
//! test_velocity = 0.5
//! ```
use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use snafu::{ResultExt, Snafu};

use crate::node_id::NodeId;

/// Error returned when loading a fleet configuration
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    /// The file could not be read
    #[snafu(display("IO error reading {path}: {source}"))]
    Io {
        /// The path being read
        path: String,
        /// The underlying error
        source: std::io::Error,
    },
    /// The file is not valid TOML, or does not match the expected schema
    #[snafu(display("Parse error: {source}"))]
    Parse {
        /// The underlying error
        source: toml::de::Error,
    },
    /// A node ID outside 1..=127
    #[snafu(display("Device {name} has invalid node ID {value}"))]
    InvalidNodeId {
        /// Device name
        name: String,
        /// The offending value
        value: u8,
    },
    /// Two devices share a node ID
    #[snafu(display("Node ID {node_id} is used by more than one device"))]
    DuplicateNodeId {
        /// The shared node ID
        node_id: u8,
    },
    /// A parameter has an unusable value
    #[snafu(display("Invalid parameter {name}: {reason}"))]
    InvalidParameter {
        /// Parameter name
        name: String,
        /// What is wrong with it
        reason: String,
    },
}

/// Which motor a device drives
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// A wheel driving motor
    Driving,
    /// A wheel steering motor
    Steering,
}

impl core::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DeviceKind::Driving => write!(f, "driving"),
            DeviceKind::Steering => write!(f, "steering"),
        }
    }
}

fn default_sdo_window() -> usize {
    1
}

fn default_sdo_timeout_ms() -> u64 {
    100
}

fn default_sync_period_ms() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

/// Bus timing and SDO engine configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    /// Maximum number of SDO transactions in flight at once
    #[serde(default = "default_sdo_window")]
    pub sdo_window: usize,
    /// Hard bound on pending (queued plus in flight) SDO transactions, or None for unbounded
    #[serde(default)]
    pub sdo_queue_capacity: Option<usize>,
    /// Default SDO transaction timeout, in milliseconds
    #[serde(default = "default_sdo_timeout_ms")]
    pub sdo_timeout_ms: u64,
    /// The tick period, in milliseconds
    #[serde(default = "default_sync_period_ms")]
    pub sync_period_ms: u64,
    /// Whether the master sends a SYNC frame each tick
    #[serde(default = "default_true")]
    pub produce_sync: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            sdo_window: default_sdo_window(),
            sdo_queue_capacity: None,
            sdo_timeout_ms: default_sdo_timeout_ms(),
            sync_period_ms: default_sync_period_ms(),
            produce_sync: true,
        }
    }
}

impl BusConfig {
    /// The SDO timeout in microseconds
    pub fn sdo_timeout_us(&self) -> u64 {
        self.sdo_timeout_ms * 1000
    }
}

/// Static parameters of one motor controller
///
/// Only built by [`FleetConfig::load_from_str`], which validates every entry, or by
/// [`DeviceConfig::new`], so the node ID is always in range.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceConfig {
    /// A name used in log messages
    pub name: String,
    node_id: NodeId,
    /// Which motor this controller drives
    pub kind: DeviceKind,
    /// Gear ratio between the motor and the output shaft
    pub gear_ratio: f64,
    /// Encoder ticks per motor radian
    pub rad_to_ticks: f64,
    /// Velocity counts/s per rad/s at the gear output
    pub rad_s_to_counts_s: f64,
    /// Optional software position limits, in radians at the gear output
    pub position_limits: Option<[f64; 2]>,
    /// Velocity commanded by the motor test states, in rad/s
    pub test_velocity: f64,
}

impl DeviceConfig {
    /// Create a device config directly, e.g. for tests
    pub fn new(name: &str, node_id: NodeId, kind: DeviceKind) -> Self {
        Self {
            name: name.to_string(),
            node_id,
            kind,
            gear_ratio: 1.0,
            rad_to_ticks: 1.0,
            rad_s_to_counts_s: 1.0,
            position_limits: None,
            test_velocity: 0.0,
        }
    }

    /// The device node ID
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }
}

/// A `[[devices]]` entry as written in the file, before validation
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DeviceEntry {
    name: String,
    node_id: u8,
    kind: DeviceKind,
    gear_ratio: f64,
    rad_to_ticks: f64,
    rad_s_to_counts_s: f64,
    #[serde(default)]
    position_limits: Option<[f64; 2]>,
    #[serde(default)]
    test_velocity: f64,
}

impl TryFrom<DeviceEntry> for DeviceConfig {
    type Error = ConfigError;

    fn try_from(entry: DeviceEntry) -> Result<Self, ConfigError> {
        let Ok(node_id) = NodeId::new(entry.node_id) else {
            return InvalidNodeIdSnafu {
                name: entry.name,
                value: entry.node_id,
            }
            .fail();
        };
        for (param, value) in [
            ("gear_ratio", entry.gear_ratio),
            ("rad_to_ticks", entry.rad_to_ticks),
            ("rad_s_to_counts_s", entry.rad_s_to_counts_s),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return InvalidParameterSnafu {
                    name: format!("{}.{}", entry.name, param),
                    reason: format!("must be a positive number, got {value}"),
                }
                .fail();
            }
        }
        Ok(Self {
            name: entry.name,
            node_id,
            kind: entry.kind,
            gear_ratio: entry.gear_ratio,
            rad_to_ticks: entry.rad_to_ticks,
            rad_s_to_counts_s: entry.rad_s_to_counts_s,
            position_limits: entry.position_limits,
            test_velocity: entry.test_velocity,
        })
    }
}

/// The file layout, before validation
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FleetFile {
    #[serde(default)]
    bus: BusConfig,
    #[serde(default)]
    devices: Vec<DeviceEntry>,
}

/// The complete fleet configuration
#[derive(Clone, Debug, PartialEq)]
pub struct FleetConfig {
    /// Bus configuration
    pub bus: BusConfig,
    /// The motor controllers, in supervisor order
    pub devices: Vec<DeviceConfig>,
}

impl FleetConfig {
    /// Parse and validate a fleet configuration from a string
    pub fn load_from_str(s: &str) -> Result<Self, ConfigError> {
        let file: FleetFile = toml::from_str(s).context(ParseSnafu)?;
        validate_bus(&file.bus)?;
        let mut seen = HashSet::new();
        let mut devices = Vec::with_capacity(file.devices.len());
        for entry in file.devices {
            let device = DeviceConfig::try_from(entry)?;
            if !seen.insert(device.node_id) {
                return DuplicateNodeIdSnafu {
                    node_id: device.node_id.raw(),
                }
                .fail();
            }
            devices.push(device);
        }
        Ok(Self {
            bus: file.bus,
            devices,
        })
    }

    /// Read, parse and validate a fleet configuration file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).context(IoSnafu {
            path: path.display().to_string(),
        })?;
        Self::load_from_str(&contents)
    }
}

fn validate_bus(bus: &BusConfig) -> Result<(), ConfigError> {
    if bus.sdo_window == 0 {
        return InvalidParameterSnafu {
            name: "bus.sdo_window",
            reason: "must be at least 1",
        }
        .fail();
    }
    if bus.sync_period_ms == 0 {
        return InvalidParameterSnafu {
            name: "bus.sync_period_ms",
            reason: "must be at least 1",
        }
        .fail();
    }
    Ok(())
}
