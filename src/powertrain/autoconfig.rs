// ==============================================================================
// autoconfig.rs — DEFAULT DRIVELINE FROM WHEEL POSITIONS
// ------------------------------------------------------------------------------
// Given where the wheels are mounted (chassis space, forward = -Z, right = +X)
// and which axles are driven, builds a complete PowertrainConfig:
//
//   clutch (root) -> transmission -> balanced tree of open differentials
//
// - wheels whose Z is within AXLE_TOLERANCE form one axle, front axle first
// - every axle becomes a wheel group: the front axle steers, the rear-most one
//   carries the handbrake, rear brakes are biased down
// - each differential's bias is the share of driven wheels on its B side, so
//   every driven wheel gets the same torque from an even split
// ==============================================================================

use rapier3d::prelude::{Point, Real};

use crate::powertrain::clutch::ClutchConfig;
use crate::powertrain::config::{NodeConfig, NodeKindConfig, PowertrainConfig, PowertrainSettings};
use crate::powertrain::differential::DifferentialConfig;
use crate::powertrain::transmission::TransmissionConfig;
use crate::powertrain::types::NameHash;
use crate::powertrain::wheel_group::WheelGroupConfig;

pub const AXLE_TOLERANCE: f32 = 0.2; // m

// Calibration (GT86-like), not derived.
const FRONT_ARB_STIFFNESS: f32 = 18000.0; // N/m
const REAR_ARB_STIFFNESS: f32 = 12000.0;  // N/m
const REAR_BRAKE_BIAS: f32 = 0.7;

const CLUTCH_INERTIA: f32 = 0.1;
const TRANSMISSION_INERTIA: f32 = 0.05;
const DIFFERENTIAL_INERTIA: f32 = 0.05;

pub const CLUTCH_NAME: &str = "clutch";
pub const TRANSMISSION_NAME: &str = "transmission";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveLayout {
    FrontWheelDrive,
    RearWheelDrive,
    AllWheelDrive,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WheelMount {
    pub name: String,
    pub position: Point<Real>,
}

impl WheelMount {
    pub fn new(name: impl Into<String>, x: f32, y: f32, z: f32) -> Self {
        Self { name: name.into(), position: Point::new(x, y, z) }
    }
}

pub fn wheel_node_name(wheel: &str) -> String {
    format!("wheel_{wheel}")
}

/// Groups mounts into axles, front first, each ordered left to right.
pub fn group_axles(mounts: &[WheelMount]) -> Vec<Vec<&WheelMount>> {
    let mut sorted: Vec<&WheelMount> = mounts.iter().collect();
    sorted.sort_by(|a, b| a.position.z.total_cmp(&b.position.z));

    let mut axles: Vec<Vec<&WheelMount>> = Vec::new();
    for mount in sorted {
        match axles.last_mut() {
            Some(axle) if (mount.position.z - axle[0].position.z).abs() <= AXLE_TOLERANCE => axle.push(mount),
            _ => axles.push(vec![mount]),
        }
    }
    for axle in &mut axles {
        axle.sort_by(|a, b| a.position.x.total_cmp(&b.position.x));
    }
    axles
}

struct Subtree {
    root: String,
    wheels: usize,
}

struct TreeBuilder<'a> {
    nodes: &'a mut Vec<NodeConfig>,
    prefix: String,
    count: usize,
}

impl TreeBuilder<'_> {
    fn next_name(&mut self) -> String {
        let name = if self.count == 0 {
            format!("{}_diff", self.prefix)
        } else {
            format!("{}_diff_{}", self.prefix, self.count)
        };
        self.count += 1;
        name
    }

    /// Balanced binary split; returns the root of the built subtree.
    fn build(&mut self, items: Vec<Subtree>) -> Option<Subtree> {
        if items.len() <= 1 {
            return items.into_iter().next();
        }
        let name = self.next_name();
        let mut left = items;
        let right = left.split_off(left.len() / 2);
        let a = self.build(left)?;
        let b = self.build(right)?;

        let total = a.wheels + b.wheels;
        let bias = b.wheels as f32 / total.max(1) as f32;
        self.nodes.push(
            NodeConfig::new(
                name.clone(),
                DIFFERENTIAL_INERTIA,
                NodeKindConfig::Differential(DifferentialConfig::open().with_bias(bias)),
            )
            .with_output(&a.root)
            .with_output_b(&b.root),
        );
        Some(Subtree { root: name, wheels: total })
    }
}

pub fn auto_layout(mounts: &[WheelMount], layout: DriveLayout) -> PowertrainConfig {
    let axles = group_axles(mounts);
    let mut nodes = Vec::new();
    let mut wheel_groups = Vec::new();
    let last_axle = axles.len().saturating_sub(1);

    for (i, axle) in axles.iter().enumerate() {
        for mount in axle {
            nodes.push(NodeConfig::new(
                wheel_node_name(&mount.name),
                0.0,
                NodeKindConfig::Wheel { wheel: mount.name.clone() },
            ));
        }

        let front = i == 0;
        wheel_groups.push(WheelGroupConfig {
            name: format!("axle_{i}"),
            members: axle.iter().map(|m| NameHash::of(&wheel_node_name(&m.name))).collect(),
            brake_coefficient: if front { 1.0 } else { REAR_BRAKE_BIAS },
            handbrake_coefficient: if i == last_axle { 1.0 } else { 0.0 },
            steer_coefficient: if front { 1.0 } else { 0.0 },
            anti_roll_stiffness: if front { FRONT_ARB_STIFFNESS } else { REAR_ARB_STIFFNESS },
            solid_axle: false,
        });
    }

    let driven: Vec<usize> = match layout {
        _ if axles.len() <= 1 => (0..axles.len()).collect(),
        DriveLayout::FrontWheelDrive => vec![0],
        DriveLayout::RearWheelDrive => vec![last_axle],
        DriveLayout::AllWheelDrive => (0..axles.len()).collect(),
    };

    let mut axle_roots = Vec::new();
    for i in driven {
        let wheels = axles[i]
            .iter()
            .map(|m| Subtree { root: wheel_node_name(&m.name), wheels: 1 })
            .collect();
        let mut builder = TreeBuilder { nodes: &mut nodes, prefix: format!("axle_{i}"), count: 0 };
        if let Some(root) = builder.build(wheels) {
            axle_roots.push(root);
        }
    }
    let mut builder = TreeBuilder { nodes: &mut nodes, prefix: "center".to_string(), count: 0 };
    let drive_root = builder.build(axle_roots);

    let mut transmission = NodeConfig::new(
        TRANSMISSION_NAME,
        TRANSMISSION_INERTIA,
        NodeKindConfig::Transmission(TransmissionConfig::default()),
    );
    if let Some(root) = &drive_root {
        transmission = transmission.with_output(&root.root);
    }
    nodes.push(transmission);
    nodes.push(
        NodeConfig::new(CLUTCH_NAME, CLUTCH_INERTIA, NodeKindConfig::Clutch(ClutchConfig::default()))
            .with_output(TRANSMISSION_NAME),
    );

    PowertrainConfig {
        settings: PowertrainSettings::default(),
        root: Some(NameHash::of(CLUTCH_NAME)),
        nodes,
        wheel_groups,
    }
}

/// Four wheels of a mid-size car, forward = -Z.
pub fn sedan_mounts() -> Vec<WheelMount> {
    vec![
        WheelMount::new("fl", -0.78, 0.0, -1.3),
        WheelMount::new("fr", 0.78, 0.0, -1.3),
        WheelMount::new("rl", -0.78, 0.0, 1.25),
        WheelMount::new("rr", 0.78, 0.0, 1.25),
    ]
}
