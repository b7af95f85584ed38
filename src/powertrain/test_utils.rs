//! Scriptable collaborators for unit and integration tests.
//! Enabled for this crate's tests and, through the `test-utils` feature, for
//! anything under `tests/`.

use rapier3d::prelude::{Point, Real, Vector};

use crate::powertrain::clutch::{Clutch, ClutchConfig, ClutchMode};
use crate::powertrain::config::{NodeConfig, NodeKindConfig, PowertrainConfig, PowertrainSettings};
use crate::powertrain::differential::{Differential, DifferentialConfig};
use crate::powertrain::graph::Powertrain;
use crate::powertrain::node::{Node, NodeKind, OutputSlot};
use crate::powertrain::power::PowerSource;
use crate::powertrain::transmission::{Transmission, TransmissionConfig, TransmissionType};
use crate::powertrain::types::{ChassisState, ControlInput, NameHash, NodeId, SourceState, TickContext};
use crate::powertrain::wheel::{WheelNode, WheelSim};
use crate::powertrain::wheel_group::WheelGroupConfig;

// ============================================
// MockWheel
// ============================================

/// A rigid disc. `locked` wheels never turn and push back every N·m they get
/// (a wheel against a wall); free wheels spin up as T / I with no ground.
#[derive(Debug, Clone, PartialEq)]
pub struct MockWheel {
    pub radius: f32,
    pub mass: f32,
    pub locked: bool,
    pub angular_velocity: f32,
    pub motor_torque: f32,
    pub brake_torque: f32,
    pub counter_torque: f32,
    pub inertia: f32,
    pub auto_simulate: bool,
    pub steps: u32,

    pub grounded: bool,
    pub compression: f32,
    pub contact: Point<Real>,
    pub up: Vector<Real>,
    pub position: Point<Real>,

    pub camber: f32,
    pub steer_angle: f32,
    pub asleep: bool,
}

impl MockWheel {
    pub fn free(radius: f32, mass: f32) -> Self {
        Self {
            radius,
            mass,
            locked: false,
            angular_velocity: 0.0,
            motor_torque: 0.0,
            brake_torque: 0.0,
            counter_torque: 0.0,
            inertia: 0.5 * mass * radius * radius,
            auto_simulate: true,
            steps: 0,
            grounded: false,
            compression: 0.0,
            contact: Point::origin(),
            up: Vector::new(0.0, 1.0, 0.0),
            position: Point::origin(),
            camber: 0.0,
            steer_angle: 0.0,
            asleep: false,
        }
    }

    pub fn locked(radius: f32, mass: f32) -> Self {
        Self { locked: true, ..Self::free(radius, mass) }
    }

    pub fn spinning(mut self, angular_velocity: f32) -> Self {
        self.angular_velocity = angular_velocity;
        self
    }

    pub fn at(mut self, x: f32, y: f32, z: f32) -> Self {
        self.position = Point::new(x, y, z);
        self
    }

    pub fn grounded(mut self, compression: f32, contact: Point<Real>) -> Self {
        self.grounded = true;
        self.compression = compression;
        self.contact = contact;
        self
    }

    pub fn asleep(mut self) -> Self {
        self.asleep = true;
        self
    }
}

impl WheelSim for MockWheel {
    fn set_motor_torque(&mut self, torque: f32) { self.motor_torque = torque; }
    fn brake_torque(&self) -> f32 { self.brake_torque }
    fn set_brake_torque(&mut self, torque: f32) { self.brake_torque = torque; }
    fn set_inertia(&mut self, inertia: f32) { self.inertia = inertia; }
    fn set_auto_simulate(&mut self, enabled: bool) { self.auto_simulate = enabled; }

    fn step(&mut self, dt: f32) {
        self.steps += 1;
        if self.locked {
            self.counter_torque = self.motor_torque;
            self.angular_velocity = 0.0;
            return;
        }
        self.counter_torque = self.brake_torque * self.angular_velocity.signum();
        let net = self.motor_torque - self.counter_torque;
        self.angular_velocity += net / self.inertia.max(1e-6) * dt;
    }

    fn angular_velocity(&self) -> f32 { self.angular_velocity }
    fn counter_torque(&self) -> f32 { self.counter_torque }
    fn radius(&self) -> f32 { self.radius }
    fn mass(&self) -> f32 { self.mass }

    fn is_grounded(&self) -> bool { self.grounded }
    fn suspension_compression(&self) -> f32 { self.compression }
    fn contact_point(&self) -> Point<Real> { self.contact }
    fn suspension_up(&self) -> Vector<Real> { self.up }
    fn local_position(&self) -> Point<Real> { self.position }

    fn camber(&self) -> f32 { self.camber }
    fn set_camber(&mut self, degrees: f32) { self.camber = degrees; }
    fn steer_angle(&self) -> f32 { self.steer_angle }
    fn set_steer_angle(&mut self, degrees: f32) { self.steer_angle = degrees; }

    fn is_asleep(&self) -> bool { self.asleep }
    fn wake(&mut self) { self.asleep = false; }
}

// ============================================
// ConstantSource
// ============================================

/// Pushes the same torque every tick regardless of throttle.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantSource {
    pub torque: f32,
    pub inertia: f32,
    pub angular_velocity: f32,
    pub last_reaction: f32,
}

impl ConstantSource {
    pub fn new(torque: f32) -> Self {
        Self { torque, inertia: 0.2, angular_velocity: 0.0, last_reaction: 0.0 }
    }
}

impl PowerSource for ConstantSource {
    fn state(&self) -> SourceState {
        SourceState { angular_velocity: self.angular_velocity, inertia: self.inertia, ..Default::default() }
    }

    fn drive_torque(&mut self, _throttle: f32, _dt: f32) -> f32 {
        self.torque
    }

    fn integrate(&mut self, drive: f32, reaction: f32, dt: f32) {
        self.last_reaction = reaction;
        self.angular_velocity += (drive - reaction) / self.inertia * dt;
    }

    fn set_angular_velocity(&mut self, angular_velocity: f32) {
        self.angular_velocity = angular_velocity;
    }
}

// ============================================
// Builders
// ============================================

/// 100 Hz tick, car at rest, default source.
pub fn ctx_with(input: ControlInput) -> TickContext {
    TickContext::new(0.01, input, ChassisState::default(), SourceState::default())
}

/// clutch -> transmission -> open diff -> wheel_rl / wheel_rr, one rear group.
/// Wheel nodes bind the simulations named "rl" and "rr".
pub fn two_wheel_config() -> PowertrainConfig {
    let nodes = vec![
        NodeConfig::new("clutch", 0.1, NodeKindConfig::Clutch(ClutchConfig::default())).with_output("transmission"),
        NodeConfig::new("transmission", 0.05, NodeKindConfig::Transmission(TransmissionConfig::default()))
            .with_output("diff"),
        NodeConfig::new("diff", 0.05, NodeKindConfig::Differential(DifferentialConfig::open()))
            .with_output("wheel_rl")
            .with_output_b("wheel_rr"),
        NodeConfig::new("wheel_rl", 0.0, NodeKindConfig::Wheel { wheel: "rl".into() }),
        NodeConfig::new("wheel_rr", 0.0, NodeKindConfig::Wheel { wheel: "rr".into() }),
    ];
    PowertrainConfig {
        settings: PowertrainSettings::default(),
        root: Some(NameHash::of("clutch")),
        nodes,
        wheel_groups: vec![WheelGroupConfig {
            name: "rear".into(),
            members: vec![NameHash::of("wheel_rl"), NameHash::of("wheel_rr")],
            handbrake_coefficient: 1.0,
            ..Default::default()
        }],
    }
}

/// Ids of the nodes in a [`fixed_ratio_driveline`].
#[derive(Debug, Clone, Copy)]
pub struct FixedDriveline {
    pub clutch: NodeId,
    pub transmission: NodeId,
    pub differential: NodeId,
    pub wheel_a: NodeId,
    pub wheel_b: NodeId,
}

/// Held clutch (manual, fully engaged) -> single forward gear of `ratio` in
/// first -> open differential -> two wheels. No wheel groups.
pub fn fixed_ratio_driveline(
    slip_torque: f32,
    ratio: f32,
    wheel_a: MockWheel,
    wheel_b: MockWheel,
) -> Result<(Powertrain, FixedDriveline), crate::powertrain::error::PowertrainError> {
    let mut clutch = Clutch::new(ClutchConfig { mode: ClutchMode::Manual, slip_torque, ..Default::default() });
    clutch.set_clutch_input(1.0);

    let mut transmission = Transmission::new(TransmissionConfig {
        transmission_type: TransmissionType::Manual,
        gears: vec![0.0, ratio],
        final_ratio: 1.0,
        ..Default::default()
    });
    transmission.shift_into(1, true, None, 0.0)?;
    transmission.drain_events();

    let mut pt = Powertrain::default();
    let ids = FixedDriveline {
        clutch: pt.add_node(Node::new("clutch", 0.1, NodeKind::Clutch(clutch)))?,
        transmission: pt.add_node(Node::new("transmission", 0.05, NodeKind::Transmission(transmission)))?,
        differential: pt.add_node(Node::new(
            "diff",
            0.05,
            NodeKind::Differential(Differential::new(DifferentialConfig::open())),
        ))?,
        wheel_a: pt.add_node(Node::new("wheel_a", 0.0, NodeKind::Wheel(WheelNode::named("a", Box::new(wheel_a)))))?,
        wheel_b: pt.add_node(Node::new("wheel_b", 0.0, NodeKind::Wheel(WheelNode::named("b", Box::new(wheel_b)))))?,
    };
    pt.connect(ids.clutch, OutputSlot::A, ids.transmission)?;
    pt.connect(ids.transmission, OutputSlot::A, ids.differential)?;
    pt.connect(ids.differential, OutputSlot::A, ids.wheel_a)?;
    pt.connect(ids.differential, OutputSlot::B, ids.wheel_b)?;
    pt.set_root(ids.clutch)?;
    pt.initialize()?;
    Ok((pt, ids))
}
