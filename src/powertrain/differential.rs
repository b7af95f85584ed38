// ==============================================================================
// differential.rs — TORQUE SPLIT BETWEEN TWO OUTPUTS
// ------------------------------------------------------------------------------
// One input, two outputs (A / B): left-right on an axle, or front-rear in a
// center diff. Slip between the outputs is resisted by a corrective torque
//
//   Tc = clamp(stiffness * (Wa - Wb), ±slip_torque)
//   Ta = (T - Tc) * (1 - bias_ab)
//   Tb = (T + Tc) * bias_ab
//
// with separate stiffness for drive (T > 0) and coast. Zero stiffness is an
// open diff, a large slip torque with high stiffness behaves as locked.
//
// Steering mode replaces all of that with a plain T(1±s)/2 split driven by the
// steer axis (tracked vehicles, skid steer).
// ==============================================================================

use serde::{Deserialize, Serialize};

use crate::powertrain::node::{self, Node};
use crate::powertrain::types::{NodeId, TickContext};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DifferentialConfig {
    pub bias_ab: f32,                   // 0..1, share of torque sent to B
    pub power_stiffness: f32,           // ×1000 N·m per rad/s, on drive
    pub coast_stiffness: f32,           // ×1000 N·m per rad/s, on coast
    pub slip_torque: f32,               // N·m, clamp on the corrective torque
    pub differential_steering: bool,
}

impl Default for DifferentialConfig {
    fn default() -> Self {
        Self::open()
    }
}

impl DifferentialConfig {
    pub fn open() -> Self {
        Self {
            bias_ab: 0.5,
            power_stiffness: 0.0,
            coast_stiffness: 0.0,
            slip_torque: 0.0,
            differential_steering: false,
        }
    }

    pub fn locked() -> Self {
        Self { power_stiffness: 1.0, coast_stiffness: 1.0, slip_torque: 5000.0, ..Self::open() }
    }

    /// Clutch-pack LSD, locks harder on drive than on coast.
    pub fn limited_slip() -> Self {
        Self { power_stiffness: 0.5, coast_stiffness: 0.2, slip_torque: 400.0, ..Self::open() }
    }

    pub fn viscous() -> Self {
        Self { power_stiffness: 0.1, coast_stiffness: 0.1, slip_torque: 250.0, ..Self::open() }
    }

    pub fn with_bias(mut self, bias_ab: f32) -> Self {
        self.bias_ab = bias_ab;
        self
    }

    fn sanitized(self) -> Self {
        Self {
            bias_ab: finite_or(self.bias_ab, 0.5).clamp(0.0, 1.0),
            power_stiffness: finite_or(self.power_stiffness, 0.0).max(0.0),
            coast_stiffness: finite_or(self.coast_stiffness, 0.0).max(0.0),
            slip_torque: finite_or(self.slip_torque, 0.0).max(0.0),
            differential_steering: self.differential_steering,
        }
    }
}

fn finite_or(x: f32, fallback: f32) -> f32 {
    if x.is_finite() { x } else { fallback }
}

#[derive(Debug, Clone)]
pub struct Differential {
    pub config: DifferentialConfig,
    pub(crate) output_b: Option<NodeId>,
    corrective_torque: f32,
    output_b_torque: f32,
}

impl Differential {
    pub fn new(config: DifferentialConfig) -> Self {
        Self { config, output_b: None, corrective_torque: 0.0, output_b_torque: 0.0 }
    }

    pub fn output_b(&self) -> Option<NodeId> { self.output_b }
    pub fn corrective_torque(&self) -> f32 { self.corrective_torque }
    /// Torque sent to B last tick; A is in the node state.
    pub fn output_b_torque(&self) -> f32 { self.output_b_torque }

    /// Returns (Ta, Tb, Tc).
    pub fn split(&self, torque: f32, wa: f32, wb: f32, steer: f32) -> (f32, f32, f32) {
        let cfg = self.config.sanitized();

        if cfg.differential_steering {
            let s = steer.clamp(-1.0, 1.0);
            return (torque * (1.0 + s) * 0.5, torque * (1.0 - s) * 0.5, 0.0);
        }

        let stiffness = if torque > 0.0 { cfg.power_stiffness } else { cfg.coast_stiffness } * 1000.0;
        let corrective = (stiffness * (wa - wb)).clamp(-cfg.slip_torque, cfg.slip_torque);

        let ta = (torque - corrective) * (1.0 - cfg.bias_ab);
        let tb = (torque + corrective) * cfg.bias_ab;
        (ta, tb, corrective)
    }
}

fn outputs(nodes: &[Node], id: NodeId) -> Option<(NodeId, NodeId)> {
    let node = &nodes[id.index()];
    Some((node.output()?, node.output_b()?))
}

pub(crate) fn query_angular_velocity(nodes: &mut [Node], id: NodeId, angular_velocity: f32, dt: f32) -> f32 {
    let Some((a, b)) = outputs(nodes, id) else { return angular_velocity };

    let wa = node::query_angular_velocity(nodes, a, angular_velocity, dt);
    let wb = node::query_angular_velocity(nodes, b, angular_velocity, dt);
    let average = (wa + wb) * 0.5;

    nodes[id.index()].state.output_angular_velocity = average;
    average
}

pub(crate) fn query_inertia(nodes: &mut [Node], id: NodeId) -> f32 {
    let own = nodes[id.index()].inertia();
    let Some((a, b)) = outputs(nodes, id) else { return own };

    own + node::query_inertia(nodes, a) + node::query_inertia(nodes, b)
}

pub(crate) fn forward_step(nodes: &mut [Node], id: NodeId, torque: f32, inertia_sum: f32, ctx: &TickContext) -> f32 {
    let Some((a, b)) = outputs(nodes, id) else { return torque };
    let (own, torque_factor, input_w) = {
        let node = &nodes[id.index()];
        (node.inertia(), node.torque_factor(), node.state.input_angular_velocity)
    };

    let wa = node::query_angular_velocity(nodes, a, input_w, ctx.dt);
    let wb = node::query_angular_velocity(nodes, b, input_w, ctx.dt);

    let node = &mut nodes[id.index()];
    let Some(diff) = node.as_differential_mut() else { return torque };
    let (ta, tb, corrective) = diff.split(torque * torque_factor, wa, wb, ctx.input.steer);
    diff.corrective_torque = corrective;
    diff.output_b_torque = tb;

    let branch_inertia = (inertia_sum + own) * 0.5;
    node.state.output_torque = ta;
    node.state.output_inertia = branch_inertia;

    let ra = node::forward_step(nodes, a, ta, branch_inertia, ctx);
    let rb = node::forward_step(nodes, b, tb, branch_inertia, ctx);
    ra + rb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::powertrain::node::NodeKind;
    use crate::powertrain::test_utils::{MockWheel, ctx_with};
    use crate::powertrain::types::ControlInput;
    use crate::powertrain::wheel::WheelNode;
    use approx::assert_relative_eq;

    fn diff_with_wheels(config: DifferentialConfig, a: MockWheel, b: MockWheel) -> Vec<Node> {
        let mut diff = Differential::new(config);
        diff.output_b = Some(NodeId(2));
        let mut nodes = vec![
            Node::new("diff", 0.1, NodeKind::Differential(diff)),
            Node::new("wheel_a", 0.0, NodeKind::Wheel(WheelNode::new(Box::new(a)))),
            Node::new("wheel_b", 0.0, NodeKind::Wheel(WheelNode::new(Box::new(b)))),
        ];
        nodes[0].output = Some(NodeId(1));
        nodes[1].input = Some(NodeId(0));
        nodes[2].input = Some(NodeId(0));
        nodes
    }

    #[test]
    fn open_diff_splits_evenly_even_with_slip() {
        let mut nodes = diff_with_wheels(
            DifferentialConfig::open(),
            MockWheel::free(0.3, 20.0).spinning(50.0),
            MockWheel::free(0.3, 20.0),
        );
        forward_step(&mut nodes, NodeId(0), 200.0, 0.5, &ctx_with(ControlInput::default()));
        assert_relative_eq!(nodes[1].state.input_torque, 100.0);
        assert_relative_eq!(nodes[2].state.input_torque, 100.0);
        assert_relative_eq!(nodes[1].state.input_inertia, 0.3, epsilon = 1e-6);
    }

    #[test]
    fn limited_slip_moves_torque_to_slower_side() {
        let d = Differential::new(DifferentialConfig::limited_slip());
        let (ta, tb, tc) = d.split(300.0, 12.0, 10.0, 0.0);
        assert!(tc > 0.0);
        assert!(tb > ta);
        assert_relative_eq!(tc, 400.0); // clamped
    }

    #[test]
    fn coast_uses_coast_stiffness() {
        let d = Differential::new(DifferentialConfig::limited_slip());
        let (_, _, tc) = d.split(-100.0, 10.1, 10.0, 0.0);
        assert_relative_eq!(tc, 0.2 * 1000.0 * 0.1, epsilon = 1e-2);
    }

    #[test]
    fn steering_mode_splits_by_steer() {
        let d = Differential::new(DifferentialConfig { differential_steering: true, ..Default::default() });
        let (ta, tb, _) = d.split(100.0, 0.0, 0.0, 0.5);
        assert_relative_eq!(ta, 75.0);
        assert_relative_eq!(tb, 25.0);
    }

    #[test]
    fn reaction_is_sum_of_branches() {
        let mut nodes = diff_with_wheels(
            DifferentialConfig::open(),
            MockWheel::locked(0.3, 20.0),
            MockWheel::locked(0.3, 20.0),
        );
        let r = forward_step(&mut nodes, NodeId(0), 80.0, 0.5, &ctx_with(ControlInput::default()));
        assert_relative_eq!(r, 80.0, epsilon = 1e-4);
    }

    #[test]
    fn query_averages_outputs() {
        let mut nodes = diff_with_wheels(
            DifferentialConfig::open(),
            MockWheel::free(0.3, 20.0).spinning(10.0),
            MockWheel::free(0.3, 20.0).spinning(20.0),
        );
        assert_relative_eq!(query_angular_velocity(&mut nodes, NodeId(0), 0.0, 0.01), 15.0);
    }

    #[test]
    fn inertia_sums_branches() {
        let mut nodes = diff_with_wheels(
            DifferentialConfig::open(),
            MockWheel::free(1.0, 2.0),
            MockWheel::free(1.0, 2.0),
        );
        assert_relative_eq!(query_inertia(&mut nodes, NodeId(0)), 2.1, epsilon = 1e-5);
    }

    #[test]
    fn out_of_range_bias_is_clamped() {
        let d = Differential::new(DifferentialConfig::open().with_bias(3.0));
        let (ta, tb, _) = d.split(100.0, 0.0, 0.0, 0.0);
        assert_relative_eq!(ta, 0.0);
        assert_relative_eq!(tb, 100.0);
    }
}
