//! powertrain - tree-structured driveline solver (clutch, gearbox, diffs, wheels)

pub mod types;
pub mod curve;
pub mod error;
pub mod node;
pub mod clutch;
pub mod differential;
pub mod shift;
pub mod transmission;
pub mod wheel;
pub mod wheel_group;
pub mod power;
pub mod config;
pub mod autoconfig;
pub mod graph;
pub mod telemetry;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use types::*;
pub use error::{PowertrainError, ValidationWarning};
pub use node::{Node, NodeKind, NodeState, OutputSlot};
pub use clutch::{Clutch, ClutchConfig, ClutchMode};
pub use differential::{Differential, DifferentialConfig};
pub use shift::{ShiftRejection, ShiftState, TransmissionEvent};
pub use transmission::{Transmission, TransmissionConfig, TransmissionType, ReverseShiftPolicy};
pub use wheel::{WheelNode, WheelSim};
pub use wheel_group::{ChassisForce, WheelGroup, WheelGroupConfig};
pub use power::{FlatTorqueConfig, FlatTorqueSource, PowerModifiers, PowerSource};
pub use config::{NodeConfig, NodeKindConfig, PowertrainConfig, PowertrainSettings};
pub use autoconfig::{DriveLayout, WheelMount, auto_layout, sedan_mounts};
pub use graph::{Powertrain, PowertrainEvent, TickReport, ValidationLimits};
pub use telemetry::PowertrainSnapshot;
