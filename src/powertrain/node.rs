// ==============================================================================
// node.rs — DRIVELINE NODE + SOLVER DISPATCH
// ------------------------------------------------------------------------------
// Every component of the driveline is a `Node` living in the powertrain arena.
// The component set is closed (clutch, differential, transmission, wheel), so
// the per-kind behavior is a sum type and the three solver operations are one
// `match` each:
//
//   query_angular_velocity(id, w, dt) -> w'   velocity probe, no torque
//   query_inertia(id)                 -> I    reflected inertia downstream
//   forward_step(id, T, I, ctx)       -> Tr   authoritative torque push
//
// Recursion goes source -> wheels through `output` (and `output_b` for
// differentials). A node without its outputs is a stub: it reflects only its
// own inertia and hands every value straight back.
// ==============================================================================

use crate::powertrain::clutch::{self, Clutch};
use crate::powertrain::differential::{self, Differential};
use crate::powertrain::transmission::{self, Transmission};
use crate::powertrain::types::{MIN_INERTIA, NameHash, NodeId, TickContext};
use crate::powertrain::wheel::{self, WheelNode};

/// Which output edge of a node an edit refers to. Only differentials own `B`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSlot {
    A,
    B,
}

/// Tick-local scratch state. Overwritten every tick, never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct NodeState {
    pub input_torque: f32,
    pub output_torque: f32,
    pub input_angular_velocity: f32,
    pub output_angular_velocity: f32,
    pub input_inertia: f32,
    pub output_inertia: f32,
}

pub enum NodeKind {
    Clutch(Clutch),
    Differential(Differential),
    Transmission(Transmission),
    Wheel(WheelNode),
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Clutch(_) => "clutch",
            NodeKind::Differential(_) => "differential",
            NodeKind::Transmission(_) => "transmission",
            NodeKind::Wheel(_) => "wheel",
        }
    }
}

pub struct Node {
    name: String,
    hash: NameHash,
    inertia: f32,   // kg·m²
    damage: f32,    // 0..1
    pub(crate) input: Option<NodeId>,
    pub(crate) output: Option<NodeId>,
    pub state: NodeState,
    pub kind: NodeKind,
}

impl Node {
    pub fn new(name: impl Into<String>, inertia: f32, kind: NodeKind) -> Self {
        let name = name.into();
        Self {
            hash: NameHash::of(&name),
            name,
            inertia: floor_inertia(inertia),
            damage: 0.0,
            input: None,
            output: None,
            state: NodeState::default(),
            kind,
        }
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn hash(&self) -> NameHash { self.hash }
    pub fn inertia(&self) -> f32 { self.inertia }
    pub fn damage(&self) -> f32 { self.damage }
    pub fn input(&self) -> Option<NodeId> { self.input }
    pub fn output(&self) -> Option<NodeId> { self.output }

    pub fn set_inertia(&mut self, inertia: f32) {
        self.inertia = floor_inertia(inertia);
    }

    pub fn set_damage(&mut self, damage: f32) {
        self.damage = if damage.is_finite() { damage.clamp(0.0, 1.0) } else { 0.0 };
    }

    /// Share of torque a damaged component still transfers.
    #[inline]
    pub fn torque_factor(&self) -> f32 {
        1.0 - self.damage
    }

    pub fn output_b(&self) -> Option<NodeId> {
        match &self.kind {
            NodeKind::Differential(d) => d.output_b,
            _ => None,
        }
    }

    pub fn output_in(&self, slot: OutputSlot) -> Option<NodeId> {
        match slot {
            OutputSlot::A => self.output,
            OutputSlot::B => self.output_b(),
        }
    }

    /// All wired outputs, A first.
    pub fn outputs(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.output.into_iter().chain(self.output_b())
    }

    /// False for stubs: a node with no output, or a differential missing one.
    pub fn is_connected(&self) -> bool {
        match &self.kind {
            NodeKind::Wheel(_) => true,
            NodeKind::Differential(d) => self.output.is_some() && d.output_b.is_some(),
            _ => self.output.is_some(),
        }
    }

    pub fn as_clutch(&self) -> Option<&Clutch> {
        match &self.kind { NodeKind::Clutch(c) => Some(c), _ => None }
    }
    pub fn as_clutch_mut(&mut self) -> Option<&mut Clutch> {
        match &mut self.kind { NodeKind::Clutch(c) => Some(c), _ => None }
    }
    pub fn as_differential(&self) -> Option<&Differential> {
        match &self.kind { NodeKind::Differential(d) => Some(d), _ => None }
    }
    pub fn as_differential_mut(&mut self) -> Option<&mut Differential> {
        match &mut self.kind { NodeKind::Differential(d) => Some(d), _ => None }
    }
    pub fn as_transmission(&self) -> Option<&Transmission> {
        match &self.kind { NodeKind::Transmission(t) => Some(t), _ => None }
    }
    pub fn as_transmission_mut(&mut self) -> Option<&mut Transmission> {
        match &mut self.kind { NodeKind::Transmission(t) => Some(t), _ => None }
    }
    pub fn as_wheel(&self) -> Option<&WheelNode> {
        match &self.kind { NodeKind::Wheel(w) => Some(w), _ => None }
    }
    pub fn as_wheel_mut(&mut self) -> Option<&mut WheelNode> {
        match &mut self.kind { NodeKind::Wheel(w) => Some(w), _ => None }
    }
}

fn floor_inertia(inertia: f32) -> f32 {
    if inertia.is_finite() { inertia.max(MIN_INERTIA) } else { MIN_INERTIA }
}

// ==============================================================================
// Dispatch
// ==============================================================================

pub fn query_angular_velocity(nodes: &mut [Node], id: NodeId, angular_velocity: f32, dt: f32) -> f32 {
    let node = &mut nodes[id.index()];
    node.state.input_angular_velocity = angular_velocity;

    if !node.is_connected() {
        node.state.output_angular_velocity = angular_velocity;
        return angular_velocity;
    }

    match node.kind {
        NodeKind::Clutch(_) => clutch::query_angular_velocity(nodes, id, angular_velocity, dt),
        NodeKind::Differential(_) => differential::query_angular_velocity(nodes, id, angular_velocity, dt),
        NodeKind::Transmission(_) => transmission::query_angular_velocity(nodes, id, angular_velocity, dt),
        NodeKind::Wheel(_) => wheel::query_angular_velocity(nodes, id),
    }
}

pub fn query_inertia(nodes: &mut [Node], id: NodeId) -> f32 {
    let node = &nodes[id.index()];
    if !node.is_connected() {
        return node.inertia();
    }

    match node.kind {
        NodeKind::Clutch(_) => clutch::query_inertia(nodes, id),
        NodeKind::Differential(_) => differential::query_inertia(nodes, id),
        NodeKind::Transmission(_) => transmission::query_inertia(nodes, id),
        NodeKind::Wheel(_) => wheel::query_inertia(nodes, id),
    }
}

pub fn forward_step(nodes: &mut [Node], id: NodeId, torque: f32, inertia_sum: f32, ctx: &TickContext) -> f32 {
    let node = &mut nodes[id.index()];
    node.state.input_torque = torque;
    node.state.input_inertia = inertia_sum;

    if !node.is_connected() {
        node.state.output_torque = torque;
        node.state.output_inertia = inertia_sum + node.inertia();
        return torque;
    }

    match node.kind {
        NodeKind::Clutch(_) => clutch::forward_step(nodes, id, torque, inertia_sum, ctx),
        NodeKind::Differential(_) => differential::forward_step(nodes, id, torque, inertia_sum, ctx),
        NodeKind::Transmission(_) => transmission::forward_step(nodes, id, torque, inertia_sum, ctx),
        NodeKind::Wheel(_) => wheel::forward_step(nodes, id, torque, inertia_sum, ctx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::powertrain::clutch::ClutchConfig;
    use crate::powertrain::differential::DifferentialConfig;
    use approx::assert_relative_eq;

    fn ctx() -> TickContext {
        TickContext::new(0.01, Default::default(), Default::default(), Default::default())
    }

    #[test]
    fn inertia_is_floored() {
        let mut n = Node::new("c", 0.0, NodeKind::Clutch(Clutch::new(ClutchConfig::default())));
        assert_relative_eq!(n.inertia(), MIN_INERTIA);
        n.set_inertia(-5.0);
        assert_relative_eq!(n.inertia(), MIN_INERTIA);
        n.set_inertia(f32::NAN);
        assert_relative_eq!(n.inertia(), MIN_INERTIA);
    }

    #[test]
    fn damage_is_clamped() {
        let mut n = Node::new("c", 0.1, NodeKind::Clutch(Clutch::new(ClutchConfig::default())));
        n.set_damage(3.0);
        assert_relative_eq!(n.damage(), 1.0);
        n.set_damage(-1.0);
        assert_relative_eq!(n.damage(), 0.0);
    }

    #[test]
    fn disconnected_node_is_identity() {
        let mut nodes = vec![Node::new(
            "diff",
            0.3,
            NodeKind::Differential(Differential::new(DifferentialConfig::default())),
        )];
        let id = NodeId(0);
        assert_relative_eq!(query_angular_velocity(&mut nodes, id, 42.0, 0.01), 42.0);
        assert_relative_eq!(query_inertia(&mut nodes, id), 0.3);
        assert_relative_eq!(forward_step(&mut nodes, id, 120.0, 1.0, &ctx()), 120.0);
        assert_relative_eq!(nodes[0].state.output_torque, 120.0);
    }
}
