// ==============================================================================
// wheel.rs — LEAF NODE OVER AN EXTERNAL WHEEL / TIRE SIMULATION
// ------------------------------------------------------------------------------
// The wheel node owns no spin state of its own. Whatever simulates the tire
// (raycast suspension + friction in the server, a mock in tests) implements
// `WheelSim` and is the ground truth for wheel speed.
//
// forward_step:
// - motor torque  <- torque from the driveline
// - inertia       <- (0.5 m r² + reflected inertia) * dt normalization
// - autonomous stepping off, then exactly one explicit step(dt)
// - returns the sim's counter torque (ground reaction + rolling + brake)
// ==============================================================================

use rapier3d::prelude::{Point, Real, Vector};

use crate::powertrain::node::Node;
use crate::powertrain::types::{MIN_INERTIA, NodeId, REFERENCE_DT, TickContext};

/// Contract of an external wheel/tire simulation driven by a wheel node.
/// Torques in N·m, angles in degrees, lengths in m, positions in chassis space
/// except `contact_point` (world).
pub trait WheelSim: Send {
    fn set_motor_torque(&mut self, torque: f32);
    fn brake_torque(&self) -> f32;
    fn set_brake_torque(&mut self, torque: f32);
    fn set_inertia(&mut self, inertia: f32);
    fn set_auto_simulate(&mut self, enabled: bool);
    fn step(&mut self, dt: f32);

    fn angular_velocity(&self) -> f32;
    fn counter_torque(&self) -> f32;
    fn radius(&self) -> f32;
    fn mass(&self) -> f32;

    // --- contact / suspension ---
    fn is_grounded(&self) -> bool;
    fn suspension_compression(&self) -> f32;
    fn contact_point(&self) -> Point<Real>;
    fn suspension_up(&self) -> Vector<Real>;
    fn local_position(&self) -> Point<Real>;

    fn camber(&self) -> f32;
    fn set_camber(&mut self, degrees: f32);
    fn steer_angle(&self) -> f32;
    fn set_steer_angle(&mut self, degrees: f32);

    fn longitudinal_slip(&self) -> f32 { 0.0 }
    fn lateral_slip(&self) -> f32 { 0.0 }

    fn is_asleep(&self) -> bool { false }
    fn wake(&mut self) {}
}

pub struct WheelNode {
    wheel: String,
    sim: Box<dyn WheelSim>,
}

impl WheelNode {
    pub fn new(sim: Box<dyn WheelSim>) -> Self {
        Self { wheel: String::new(), sim }
    }

    /// `wheel` is the name the simulation is looked up by when loading.
    pub fn named(wheel: impl Into<String>, sim: Box<dyn WheelSim>) -> Self {
        Self { wheel: wheel.into(), sim }
    }

    pub fn wheel_name(&self) -> &str { &self.wheel }
    pub fn sim(&self) -> &dyn WheelSim { self.sim.as_ref() }
    pub fn sim_mut(&mut self) -> &mut dyn WheelSim { self.sim.as_mut() }

    /// Solid-disc inertia of the wheel, 0.5 m r².
    pub fn wheel_inertia(&self) -> f32 {
        let r = self.sim.radius();
        let inertia = 0.5 * self.sim.mass() * r * r;
        if inertia.is_finite() { inertia.max(MIN_INERTIA) } else { MIN_INERTIA }
    }

    /// Accumulates onto the brake torque already on the wheel this tick.
    pub fn add_brake_torque(&mut self, torque: f32, coefficient: f32, max_brake_torque: f32) {
        let added = torque * coefficient;
        if !added.is_finite() {
            return;
        }
        let total = (self.sim.brake_torque() + added).clamp(0.0, max_brake_torque.max(0.0));
        self.sim.set_brake_torque(total);
    }

    pub fn clear_brakes(&mut self) {
        self.sim.set_brake_torque(0.0);
    }
}

impl std::fmt::Debug for WheelNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WheelNode")
            .field("wheel", &self.wheel)
            .field("angular_velocity", &self.sim.angular_velocity())
            .finish()
    }
}

/// Keeps the integrated wheel response comparable across physics rates.
#[inline]
pub fn inertia_normalization(dt: f32) -> f32 {
    (dt / REFERENCE_DT).clamp(0.5, 2.0)
}

pub(crate) fn query_angular_velocity(nodes: &mut [Node], id: NodeId) -> f32 {
    let node = &mut nodes[id.index()];
    let Some(wheel) = node.as_wheel() else { return node.state.input_angular_velocity };
    let w = wheel.sim.angular_velocity();
    node.state.output_angular_velocity = w;
    w
}

pub(crate) fn query_inertia(nodes: &mut [Node], id: NodeId) -> f32 {
    let node = &nodes[id.index()];
    node.as_wheel().map(WheelNode::wheel_inertia).unwrap_or(node.inertia())
}

pub(crate) fn forward_step(nodes: &mut [Node], id: NodeId, torque: f32, inertia_sum: f32, ctx: &TickContext) -> f32 {
    let node = &mut nodes[id.index()];
    let Some(wheel) = node.as_wheel_mut() else { return torque };

    let inertia = (wheel.wheel_inertia() + inertia_sum) * inertia_normalization(ctx.dt);
    let sim = wheel.sim_mut();
    sim.set_motor_torque(torque);
    sim.set_inertia(inertia);
    sim.set_auto_simulate(false);
    sim.step(ctx.dt);

    let counter = sim.counter_torque();
    let w = sim.angular_velocity();

    node.state.output_torque = torque;
    node.state.output_inertia = inertia;
    node.state.output_angular_velocity = w;
    counter
}
