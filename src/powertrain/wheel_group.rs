// ==============================================================================
// wheel_group.rs — AXLE COORDINATION (BRAKES, STEERING, ARB, SOLID AXLE)
// ------------------------------------------------------------------------------
// A wheel group is not part of the torque graph. Once per tick, before the
// solve, it:
// - distributes brake / handbrake torque with per-axle coefficients
// - steers its wheels by steer * max_steer * coefficient
// - couples the outer pair through an anti-roll bar:
//     F = k * (cl - cr), +F along suspension up at the left contact,
//     -F at the right contact (no net vertical force)
// - for a solid axle, tilts both wheels by atan2(cl - cr, track) (negated on
//   the right)
//
// The ARB forces are returned, not applied: the caller owns the chassis body.
// ==============================================================================

use rapier3d::prelude::{Point, Real, Vector};
use serde::{Deserialize, Serialize};

use crate::powertrain::error::PowertrainError;
use crate::powertrain::node::Node;
use crate::powertrain::types::{ControlInput, NameHash, NodeId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WheelGroupConfig {
    pub name: String,
    pub members: Vec<NameHash>,
    pub brake_coefficient: f32,
    pub handbrake_coefficient: f32,
    pub steer_coefficient: f32,
    pub anti_roll_stiffness: f32, // N/m
    pub solid_axle: bool,
}

impl Default for WheelGroupConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            members: Vec::new(),
            brake_coefficient: 1.0,
            handbrake_coefficient: 0.0,
            steer_coefficient: 0.0,
            anti_roll_stiffness: 0.0,
            solid_axle: false,
        }
    }
}

/// A force to apply to the chassis at a world point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChassisForce {
    pub force: Vector<Real>,
    pub point: Point<Real>,
}

#[derive(Debug, Clone)]
pub struct WheelGroup {
    pub config: WheelGroupConfig,
    wheels: Vec<NodeId>,
    track_width: f32,
    camber: f32,
}

impl WheelGroup {
    pub fn new(config: WheelGroupConfig) -> Self {
        Self { config, wheels: Vec::new(), track_width: 0.0, camber: 0.0 }
    }

    /// Wheels ordered left to right (ascending local x).
    pub fn wheels(&self) -> &[NodeId] { &self.wheels }
    pub fn track_width(&self) -> f32 { self.track_width }
    pub fn camber(&self) -> f32 { self.camber }

    /// Resolves member hashes against the arena and derives geometry.
    pub(crate) fn resolve(&mut self, nodes: &[Node]) -> Result<(), PowertrainError> {
        let mut wheels = Vec::with_capacity(self.config.members.len());
        for member in &self.config.members {
            let Some(index) = nodes.iter().position(|n| n.hash() == *member) else {
                return Err(PowertrainError::UnknownGroupMember {
                    group: self.config.name.clone(),
                    member: *member,
                });
            };
            if nodes[index].as_wheel().is_none() {
                return Err(PowertrainError::NotAWheel {
                    group: self.config.name.clone(),
                    member: nodes[index].name().to_string(),
                });
            }
            wheels.push(NodeId(index as u32));
        }
        self.wheels = wheels;
        self.refresh_geometry(nodes);
        Ok(())
    }

    pub(crate) fn refresh_geometry(&mut self, nodes: &[Node]) {
        let x_of = |id: &NodeId| {
            nodes[id.index()].as_wheel().map(|w| w.sim().local_position().x).unwrap_or(0.0)
        };
        self.wheels.sort_by(|a, b| x_of(a).total_cmp(&x_of(b)));

        self.track_width = match (self.wheels.first(), self.wheels.last()) {
            (Some(l), Some(r)) if self.wheels.len() >= 2 => (x_of(l) - x_of(r)).abs(),
            _ => 0.0,
        };
    }

    fn outer_pair(&self) -> Option<(NodeId, NodeId)> {
        if self.wheels.len() < 2 {
            return None;
        }
        Some((*self.wheels.first()?, *self.wheels.last()?))
    }

    pub fn apply_brakes(&self, nodes: &mut [Node], input: &ControlInput, max_brake_torque: f32) {
        let brake = input.brake * max_brake_torque;
        let handbrake = input.handbrake * max_brake_torque;
        for id in &self.wheels {
            let Some(wheel) = nodes[id.index()].as_wheel_mut() else { continue };
            if brake > 0.0 {
                wheel.add_brake_torque(brake, self.config.brake_coefficient, max_brake_torque);
            }
            if handbrake > 0.0 {
                wheel.add_brake_torque(handbrake, self.config.handbrake_coefficient, max_brake_torque);
            }
        }
    }

    pub fn apply_steering(&self, nodes: &mut [Node], steer: f32, max_steer_angle: f32) {
        let angle = steer * max_steer_angle * self.config.steer_coefficient;
        for id in &self.wheels {
            if let Some(wheel) = nodes[id.index()].as_wheel_mut() {
                wheel.sim_mut().set_steer_angle(angle);
            }
        }
    }

    /// Per-tick axle coupling. Returns the anti-roll forces for the chassis.
    pub fn update(&mut self, nodes: &mut [Node]) -> Vec<ChassisForce> {
        let mut forces = Vec::new();
        let Some((left, right)) = self.outer_pair() else { return forces };

        let probe = |id: NodeId| {
            nodes[id.index()].as_wheel().map(|w| {
                let sim = w.sim();
                (sim.is_grounded(), sim.suspension_compression(), sim.contact_point(), sim.suspension_up())
            })
        };
        let (Some((grounded_l, cl, hit_l, up_l)), Some((grounded_r, cr, hit_r, up_r))) = (probe(left), probe(right)) else {
            return forces;
        };

        // --- anti-roll bar ---
        let stiffness = self.config.anti_roll_stiffness;
        if stiffness > 0.0 && grounded_l && grounded_r {
            let force = stiffness * (cl - cr);
            if force.abs() > 1e-6 {
                forces.push(ChassisForce { force: up_l * force, point: hit_l });
                forces.push(ChassisForce { force: up_r * -force, point: hit_r });
            }
        }

        // --- solid axle camber ---
        if self.config.solid_axle && self.track_width > 1e-4 {
            self.camber = (cl - cr).atan2(self.track_width).to_degrees();
            if let Some(w) = nodes[left.index()].as_wheel_mut() {
                w.sim_mut().set_camber(self.camber);
            }
            if let Some(w) = nodes[right.index()].as_wheel_mut() {
                w.sim_mut().set_camber(-self.camber);
            }
        }

        forces
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::powertrain::node::NodeKind;
    use crate::powertrain::test_utils::MockWheel;
    use crate::powertrain::wheel::WheelNode;
    use approx::assert_relative_eq;

    fn axle(left: MockWheel, right: MockWheel, config: WheelGroupConfig) -> (Vec<Node>, WheelGroup) {
        // Authored right first to check the left-to-right sort.
        let nodes = vec![
            Node::new("right", 0.0, NodeKind::Wheel(WheelNode::new(Box::new(right)))),
            Node::new("left", 0.0, NodeKind::Wheel(WheelNode::new(Box::new(left)))),
        ];
        let mut group = WheelGroup::new(WheelGroupConfig {
            name: "front".into(),
            members: vec![NameHash::of("right"), NameHash::of("left")],
            ..config
        });
        group.resolve(&nodes).unwrap();
        (nodes, group)
    }

    fn pair(cl: f32, cr: f32) -> (MockWheel, MockWheel) {
        (
            MockWheel::free(0.3, 20.0).at(-0.8, 0.0, 1.2).grounded(cl, Point::new(-0.8, 0.0, 1.2)),
            MockWheel::free(0.3, 20.0).at(0.8, 0.0, 1.2).grounded(cr, Point::new(0.8, 0.0, 1.2)),
        )
    }

    #[test]
    fn wheels_sorted_left_to_right_with_track() {
        let (l, r) = pair(0.0, 0.0);
        let (_, group) = axle(l, r, WheelGroupConfig::default());
        assert_eq!(group.wheels(), &[NodeId(1), NodeId(0)]);
        assert_relative_eq!(group.track_width(), 1.6, epsilon = 1e-6);
    }

    #[test]
    fn anti_roll_forces_are_equal_and_opposite() {
        let (l, r) = pair(0.10, 0.04);
        let (mut nodes, mut group) = axle(l, r, WheelGroupConfig { anti_roll_stiffness: 18000.0, ..Default::default() });
        let forces = group.update(&mut nodes);
        assert_eq!(forces.len(), 2);
        assert_relative_eq!(forces[0].force.y, 18000.0 * 0.06, epsilon = 1e-2);
        assert_relative_eq!(forces[1].force.y, -18000.0 * 0.06, epsilon = 1e-2);
        assert_relative_eq!((forces[0].force + forces[1].force).norm(), 0.0, epsilon = 1e-3);
        assert_relative_eq!(forces[0].point.x, -0.8);
    }

    #[test]
    fn anti_roll_needs_both_wheels_grounded() {
        let (l, mut r) = pair(0.10, 0.04);
        r.grounded = false;
        let (mut nodes, mut group) = axle(l, r, WheelGroupConfig { anti_roll_stiffness: 18000.0, ..Default::default() });
        assert!(group.update(&mut nodes).is_empty());
    }

    #[test]
    fn solid_axle_cambers_symmetrically() {
        let (l, r) = pair(0.10, 0.02);
        let (mut nodes, mut group) = axle(l, r, WheelGroupConfig { solid_axle: true, ..Default::default() });
        group.update(&mut nodes);
        let expected = (0.08f32).atan2(1.6).to_degrees();
        assert_relative_eq!(group.camber(), expected, epsilon = 1e-5);
        let left = nodes[1].as_wheel().unwrap().sim();
        let right = nodes[0].as_wheel().unwrap().sim();
        assert_relative_eq!(left.camber(), expected, epsilon = 1e-5);
        assert_relative_eq!(right.camber(), -expected, epsilon = 1e-5);
    }

    #[test]
    fn brakes_use_coefficients() {
        let (l, r) = pair(0.0, 0.0);
        let config = WheelGroupConfig { brake_coefficient: 0.7, handbrake_coefficient: 1.0, ..Default::default() };
        let (mut nodes, group) = axle(l, r, config);
        let input = ControlInput { brake: 0.5, handbrake: 0.25, ..Default::default() };
        group.apply_brakes(&mut nodes, &input, 2000.0);
        let brake = nodes[0].as_wheel().unwrap().sim().brake_torque();
        assert_relative_eq!(brake, 1000.0 * 0.7 + 500.0);
    }

    #[test]
    fn unknown_member_is_an_error() {
        let nodes = vec![Node::new("left", 0.0, NodeKind::Wheel(WheelNode::new(Box::new(MockWheel::free(0.3, 20.0)))))];
        let mut group = WheelGroup::new(WheelGroupConfig {
            name: "rear".into(),
            members: vec![NameHash::of("nope")],
            ..Default::default()
        });
        assert!(matches!(group.resolve(&nodes), Err(PowertrainError::UnknownGroupMember { .. })));
    }
}
