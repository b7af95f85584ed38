//! Read-only snapshot of the driveline for debugging views and the server's
//! broadcast. Serialized as JSON; nothing here is read back.

use serde::Serialize;

use crate::powertrain::graph::Powertrain;
use crate::powertrain::node::{Node, NodeKind, NodeState};
use crate::powertrain::shift::ShiftState;
use crate::powertrain::types::rad_to_rpm;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowertrainSnapshot {
    pub gear: i32,
    pub shift: Option<ShiftState>,
    pub enabled: bool,
    pub nodes: Vec<NodeSnapshot>,
    pub wheels: Vec<WheelTelemetry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub kind: &'static str,
    pub damage: f32,
    pub state: NodeState,
    pub detail: NodeDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeDetail {
    Clutch { input: f32, engagement: f32, slipping: bool },
    Differential { corrective_torque: f32, output_b_torque: f32 },
    Transmission { gear: i32, ratio: f32, shift: ShiftState },
    Wheel { wheel: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WheelTelemetry {
    pub name: String,
    pub rpm: f32,
    pub brake_torque: f32,
    pub counter_torque: f32,
    pub steer_angle: f32,
    pub camber: f32,
    pub grounded: bool,
    pub longitudinal_slip: f32,
    pub lateral_slip: f32,
}

impl NodeDetail {
    fn of(node: &Node) -> Self {
        match &node.kind {
            NodeKind::Clutch(c) => NodeDetail::Clutch {
                input: c.clutch_input(),
                engagement: c.engagement(),
                slipping: c.is_slipping(),
            },
            NodeKind::Differential(d) => NodeDetail::Differential {
                corrective_torque: d.corrective_torque(),
                output_b_torque: d.output_b_torque(),
            },
            NodeKind::Transmission(t) => NodeDetail::Transmission {
                gear: t.gear(),
                ratio: t.ratio(),
                shift: t.shift_state(),
            },
            NodeKind::Wheel(w) => NodeDetail::Wheel { wheel: w.wheel_name().to_string() },
        }
    }
}

impl PowertrainSnapshot {
    pub fn capture(powertrain: &Powertrain) -> Self {
        let nodes = powertrain.nodes();

        let shift = powertrain
            .primary_transmission()
            .and_then(|id| nodes[id.index()].as_transmission())
            .map(|t| t.shift_state())
            .filter(|s| *s != ShiftState::Idle);

        let wheels = nodes
            .iter()
            .filter_map(|n| n.as_wheel().map(|w| (n, w)))
            .map(|(n, w)| {
                let sim = w.sim();
                WheelTelemetry {
                    name: n.name().to_string(),
                    rpm: rad_to_rpm(sim.angular_velocity()),
                    brake_torque: sim.brake_torque(),
                    counter_torque: sim.counter_torque(),
                    steer_angle: sim.steer_angle(),
                    camber: sim.camber(),
                    grounded: sim.is_grounded(),
                    longitudinal_slip: sim.longitudinal_slip(),
                    lateral_slip: sim.lateral_slip(),
                }
            })
            .collect();

        Self {
            gear: powertrain.gear(),
            shift,
            enabled: powertrain.is_enabled(),
            nodes: nodes
                .iter()
                .map(|n| NodeSnapshot {
                    name: n.name().to_string(),
                    kind: n.kind.label(),
                    damage: n.damage(),
                    state: n.state,
                    detail: NodeDetail::of(n),
                })
                .collect(),
            wheels,
        }
    }
}
