use crate::powertrain::shift::ShiftRejection;
use crate::powertrain::types::{NameHash, NodeId};

/// Failures while building, wiring or loading a powertrain. The per-tick
/// solve never produces these.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PowertrainError {
    #[error("duplicate node name: {0}")]
    DuplicateName(String),
    #[error("node {node} references unknown node {target}")]
    UnresolvedReference { node: String, target: NameHash },
    #[error("wheel node {node} has no wheel simulation named {wheel}")]
    MissingWheelSim { node: String, wheel: String },
    #[error("node {target} already has input {existing}, cannot also be fed by {from}")]
    MultipleInputs { target: String, existing: String, from: String },
    #[error("cycle detected in driveline graph at node {0}")]
    Cycle(String),
    #[error("node not found: {0}")]
    UnknownNode(NodeId),
    #[error("wheel group {group} references unknown node {member}")]
    UnknownGroupMember { group: String, member: NameHash },
    #[error("wheel group {group} member {member} is not a wheel node")]
    NotAWheel { group: String, member: String },
    #[error("node {0} has no second output")]
    InvalidSlot(String),
    #[error("node {0} is not a transmission")]
    NotATransmission(String),
    #[error("shift rejected: {0}")]
    Shift(#[from] ShiftRejection),
}

/// Non-fatal configuration problems, reported once at validation time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationWarning {
    #[error("node {0} has no output and will pass torque straight back")]
    MissingOutput(String),
    #[error("node {0} tried to use itself as output; edge cleared")]
    SelfReferencingOutput(String),
    #[error("node {node} inertia {inertia} is below the floor and was raised")]
    InertiaBelowFloor { node: String, inertia: f32 },
    #[error("transmission {node}: {reason}")]
    MalformedGears { node: String, reason: String },
    #[error("transmission {node}: {reason}")]
    ShiftPointsOutOfRange { node: String, reason: String },
    #[error("differential {0} has no input and only adds inertia")]
    DanglingDifferential(String),
    #[error("differential {0} has a single output and acts as a pass-through")]
    DifferentialMissingOutput(String),
    #[error("node {0} is not reachable from the root")]
    Unreachable(String),
    #[error("powertrain has no root node")]
    NoRoot,
    #[error("clutch {0} engagement curve is not monotonic")]
    NonMonotonicCurve(String),
}
