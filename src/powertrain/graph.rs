// ==============================================================================
// graph.rs — POWERTRAIN ORCHESTRATOR
// ------------------------------------------------------------------------------
// Owns the node arena, the wiring and the wheel groups, and runs one tick:
//
//   1) wake sleeping wheels on throttle
//   2) clear brakes, apply brake / handbrake / steer per wheel group
//   3) wheel groups: anti-roll forces, solid-axle camber
//   4) velocity query pass from the root at the source velocity
//   5) control pass: transmissions (shift sequence, automatic policy), then
//      clutches (engagement), both reading the query results
//   6) inertia query
//   7) source torque -> forward_step(root) -> source integration
//   8) sync the source to what the coupled driveline allows
//   9) clear discrete shift requests
//
// Wiring is edited only through connect / disconnect here, so both ends of an
// edge always change together and cycles are refused before they exist.
// ==============================================================================

use crate::powertrain::clutch::Clutch;
use crate::powertrain::config::{NodeConfig, NodeKindConfig, PowertrainConfig, PowertrainSettings};
use crate::powertrain::differential::Differential;
use crate::powertrain::error::{PowertrainError, ValidationWarning};
use crate::powertrain::node::{self, Node, NodeKind, OutputSlot};
use crate::powertrain::power::PowerSource;
use crate::powertrain::shift::TransmissionEvent;
use crate::powertrain::telemetry::PowertrainSnapshot;
use crate::powertrain::transmission::Transmission;
use crate::powertrain::types::{
    ChassisState, ControlInput, MIN_INERTIA, NameHash, NodeId, SourceState, TickContext, rad_to_rpm,
};
use crate::powertrain::wheel::{WheelNode, WheelSim};
use crate::powertrain::wheel_group::{ChassisForce, WheelGroup, WheelGroupConfig};

/// A transmission event tagged with the node that raised it.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct PowertrainEvent {
    pub node: NodeId,
    pub event: TransmissionEvent,
}

/// What one tick produced for the caller.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub chassis_forces: Vec<ChassisForce>,
    pub events: Vec<PowertrainEvent>,
    pub drive_torque: f32,      // N·m from the source
    pub reaction_torque: f32,   // N·m returned by the root
    pub root_inertia: f32,      // kg·m² reflected at the root
}

/// Engine limits the configuration is checked against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationLimits {
    pub idle_rpm: f32,
    pub rev_limiter_rpm: f32,
}

impl From<&SourceState> for ValidationLimits {
    fn from(state: &SourceState) -> Self {
        Self { idle_rpm: state.idle_rpm, rev_limiter_rpm: state.rev_limiter_rpm }
    }
}

pub struct Powertrain {
    pub settings: PowertrainSettings,
    nodes: Vec<Node>,
    root: Option<NodeId>,
    wheel_groups: Vec<WheelGroup>,
    edit_warnings: Vec<ValidationWarning>,
    enabled: bool,
}

impl std::fmt::Debug for Powertrain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Powertrain")
            .field("settings", &self.settings)
            .field("nodes", &self.nodes.len())
            .field("root", &self.root)
            .field("wheel_groups", &self.wheel_groups.len())
            .field("edit_warnings", &self.edit_warnings)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl Default for Powertrain {
    fn default() -> Self {
        Self::new(PowertrainSettings::default())
    }
}

impl Powertrain {
    pub fn new(settings: PowertrainSettings) -> Self {
        Self {
            settings,
            nodes: Vec::new(),
            root: None,
            wheel_groups: Vec::new(),
            edit_warnings: Vec::new(),
            enabled: true,
        }
    }

    // ==========================================================================
    // Access
    // ==========================================================================

    /// Flat, ordered node list for tooling. Arena order, not tree order.
    pub fn nodes(&self) -> &[Node] { &self.nodes }
    pub fn root(&self) -> Option<NodeId> { self.root }
    pub fn wheel_groups(&self) -> &[WheelGroup] { &self.wheel_groups }
    pub fn is_enabled(&self) -> bool { self.enabled }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index())
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.find_hash(NameHash::of(name))
    }

    pub fn find_hash(&self, hash: NameHash) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.hash() == hash).map(|i| NodeId(i as u32))
    }

    fn check(&self, id: NodeId) -> Result<(), PowertrainError> {
        if id.index() < self.nodes.len() { Ok(()) } else { Err(PowertrainError::UnknownNode(id)) }
    }

    // ==========================================================================
    // Editing
    // ==========================================================================

    pub fn add_node(&mut self, node: Node) -> Result<NodeId, PowertrainError> {
        if self.find_hash(node.hash()).is_some() {
            return Err(PowertrainError::DuplicateName(node.name().to_string()));
        }
        self.nodes.push(node);
        Ok(NodeId((self.nodes.len() - 1) as u32))
    }

    pub fn set_root(&mut self, id: NodeId) -> Result<(), PowertrainError> {
        self.check(id)?;
        self.root = Some(id);
        Ok(())
    }

    fn set_edge(&mut self, from: NodeId, slot: OutputSlot, target: Option<NodeId>) {
        let node = &mut self.nodes[from.index()];
        match slot {
            OutputSlot::A => node.output = target,
            OutputSlot::B => {
                if let Some(diff) = node.as_differential_mut() {
                    diff.output_b = target;
                }
            }
        }
    }

    /// Wires `from.slot -> to` and `to.input = from` in one step.
    pub fn connect(&mut self, from: NodeId, slot: OutputSlot, to: NodeId) -> Result<(), PowertrainError> {
        self.check(from)?;
        self.check(to)?;
        if slot == OutputSlot::B && self.nodes[from.index()].as_differential().is_none() {
            return Err(PowertrainError::InvalidSlot(self.nodes[from.index()].name().to_string()));
        }

        if from == to {
            self.disconnect(from, slot)?;
            self.edit_warnings
                .push(ValidationWarning::SelfReferencingOutput(self.nodes[from.index()].name().to_string()));
            return Ok(());
        }

        if self.nodes[from.index()].output_in(slot) == Some(to) {
            return Ok(());
        }

        if let Some(existing) = self.nodes[to.index()].input {
            return Err(PowertrainError::MultipleInputs {
                target: self.nodes[to.index()].name().to_string(),
                existing: self.nodes[existing.index()].name().to_string(),
                from: self.nodes[from.index()].name().to_string(),
            });
        }

        if self.reaches(to, from) {
            return Err(PowertrainError::Cycle(self.nodes[from.index()].name().to_string()));
        }

        self.disconnect(from, slot)?;
        self.set_edge(from, slot, Some(to));
        self.nodes[to.index()].input = Some(from);
        Ok(())
    }

    pub fn disconnect(&mut self, from: NodeId, slot: OutputSlot) -> Result<(), PowertrainError> {
        self.check(from)?;
        if let Some(old) = self.nodes[from.index()].output_in(slot) {
            if self.nodes[old.index()].input == Some(from) {
                self.nodes[old.index()].input = None;
            }
        }
        self.set_edge(from, slot, None);
        Ok(())
    }

    /// True if `target` is `start` or lies downstream of it.
    fn reaches(&self, start: NodeId, target: NodeId) -> bool {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if std::mem::replace(&mut visited[id.index()], true) {
                continue;
            }
            stack.extend(self.nodes[id.index()].outputs());
        }
        false
    }

    pub fn add_wheel_group(&mut self, config: WheelGroupConfig) -> Result<usize, PowertrainError> {
        let mut group = WheelGroup::new(config);
        group.resolve(&self.nodes)?;
        self.wheel_groups.push(group);
        Ok(self.wheel_groups.len() - 1)
    }

    // ==========================================================================
    // Loading
    // ==========================================================================

    /// Two-phase load: create every node, then resolve hashes to ids once.
    /// `wheels` supplies the simulation for each wheel node by wheel name.
    pub fn from_config(
        config: &PowertrainConfig,
        wheels: &mut dyn FnMut(&str) -> Option<Box<dyn WheelSim>>,
    ) -> Result<Self, PowertrainError> {
        let mut powertrain = Self::new(config.settings.clone());

        // --- phase 1: nodes ---
        for node_config in &config.nodes {
            let kind = match &node_config.kind {
                NodeKindConfig::Clutch(c) => NodeKind::Clutch(Clutch::new(c.clone())),
                NodeKindConfig::Differential(d) => NodeKind::Differential(Differential::new(*d)),
                NodeKindConfig::Transmission(t) => NodeKind::Transmission(Transmission::new(t.clone())),
                NodeKindConfig::Wheel { wheel } => {
                    let Some(sim) = wheels(wheel) else {
                        return Err(PowertrainError::MissingWheelSim {
                            node: node_config.name.clone(),
                            wheel: wheel.clone(),
                        });
                    };
                    NodeKind::Wheel(WheelNode::named(wheel.clone(), sim))
                }
            };

            let is_wheel = matches!(kind, NodeKind::Wheel(_));
            if !is_wheel && !(node_config.inertia >= MIN_INERTIA) {
                powertrain.edit_warnings.push(ValidationWarning::InertiaBelowFloor {
                    node: node_config.name.clone(),
                    inertia: node_config.inertia,
                });
            }
            powertrain.add_node(Node::new(node_config.name.clone(), node_config.inertia, kind))?;
        }

        // --- phase 2: edges ---
        for (index, node_config) in config.nodes.iter().enumerate() {
            let from = NodeId(index as u32);
            for (slot, target) in [(OutputSlot::A, node_config.output), (OutputSlot::B, node_config.output_b)] {
                let Some(target) = target else { continue };
                let to = powertrain.resolve(node_config, target)?;
                powertrain.connect(from, slot, to)?;
            }
        }

        if let Some(root) = config.root {
            let Some(id) = powertrain.find_hash(root) else {
                return Err(PowertrainError::UnresolvedReference { node: "<root>".to_string(), target: root });
            };
            powertrain.set_root(id)?;
        }

        for group in &config.wheel_groups {
            powertrain.add_wheel_group(group.clone())?;
        }

        powertrain.initialize()?;
        Ok(powertrain)
    }

    fn resolve(&self, from: &NodeConfig, target: NameHash) -> Result<NodeId, PowertrainError> {
        self.find_hash(target).ok_or_else(|| PowertrainError::UnresolvedReference {
            node: from.name.clone(),
            target,
        })
    }

    pub fn to_config(&self) -> PowertrainConfig {
        let nodes = self
            .nodes
            .iter()
            .map(|n| {
                let kind = match &n.kind {
                    NodeKind::Clutch(c) => NodeKindConfig::Clutch(c.config.clone()),
                    NodeKind::Differential(d) => NodeKindConfig::Differential(d.config),
                    NodeKind::Transmission(t) => NodeKindConfig::Transmission(t.config.clone()),
                    NodeKind::Wheel(w) => NodeKindConfig::Wheel { wheel: w.wheel_name().to_string() },
                };
                // wheel inertia lives in the wheel simulation
                let inertia = if n.as_wheel().is_some() { 0.0 } else { n.inertia() };
                NodeConfig {
                    name: n.name().to_string(),
                    inertia,
                    output: n.output().map(|id| self.nodes[id.index()].hash()),
                    output_b: n.output_b().map(|id| self.nodes[id.index()].hash()),
                    kind,
                }
            })
            .collect();

        PowertrainConfig {
            settings: self.settings.clone(),
            root: self.root.map(|id| self.nodes[id.index()].hash()),
            nodes,
            wheel_groups: self.wheel_groups.iter().map(|g| g.config.clone()).collect(),
        }
    }

    /// Checks the graph is acyclic and derives wheel-group geometry.
    pub fn initialize(&mut self) -> Result<(), PowertrainError> {
        if let Some(id) = self.find_cycle() {
            return Err(PowertrainError::Cycle(self.nodes[id.index()].name().to_string()));
        }
        for group in &mut self.wheel_groups {
            group.refresh_geometry(&self.nodes);
        }
        Ok(())
    }

    /// Iterative DFS with white/grey/black coloring over every node.
    fn find_cycle(&self) -> Option<NodeId> {
        const WHITE: u8 = 0;
        const GREY: u8 = 1;
        const BLACK: u8 = 2;

        let mut color = vec![WHITE; self.nodes.len()];
        for start in 0..self.nodes.len() {
            if color[start] != WHITE {
                continue;
            }
            color[start] = GREY;
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];

            while let Some(top) = stack.last_mut() {
                let (index, next) = *top;
                if next >= 2 {
                    color[index] = BLACK;
                    stack.pop();
                    continue;
                }
                top.1 += 1;

                let slot = if next == 0 { OutputSlot::A } else { OutputSlot::B };
                let Some(child) = self.nodes[index].output_in(slot) else { continue };
                match color[child.index()] {
                    WHITE => {
                        color[child.index()] = GREY;
                        stack.push((child.index(), 0));
                    }
                    GREY => return Some(child),
                    _ => {}
                }
            }
        }
        None
    }

    // ==========================================================================
    // Validation
    // ==========================================================================

    /// Every configuration warning, computed once. Never called per tick.
    pub fn validate(&self, limits: ValidationLimits) -> Vec<ValidationWarning> {
        let mut warnings = self.edit_warnings.clone();

        let reachable = match self.root {
            Some(root) => {
                let mut seen = vec![false; self.nodes.len()];
                for id in self.tree_order(root) {
                    seen[id.index()] = true;
                }
                Some(seen)
            }
            None => {
                warnings.push(ValidationWarning::NoRoot);
                None
            }
        };

        for (index, node) in self.nodes.iter().enumerate() {
            let name = node.name().to_string();
            match &node.kind {
                NodeKind::Wheel(_) => {}
                NodeKind::Differential(_) => {
                    match (node.output(), node.output_b()) {
                        (None, None) => warnings.push(ValidationWarning::MissingOutput(name.clone())),
                        (Some(_), Some(_)) => {}
                        _ => warnings.push(ValidationWarning::DifferentialMissingOutput(name.clone())),
                    }
                    if node.input().is_none() && self.root != Some(NodeId(index as u32)) {
                        warnings.push(ValidationWarning::DanglingDifferential(name.clone()));
                    }
                }
                NodeKind::Clutch(c) => {
                    if node.output().is_none() {
                        warnings.push(ValidationWarning::MissingOutput(name.clone()));
                    }
                    if !c.config.engagement_curve.is_monotonic() {
                        warnings.push(ValidationWarning::NonMonotonicCurve(name.clone()));
                    }
                }
                NodeKind::Transmission(t) => {
                    if node.output().is_none() {
                        warnings.push(ValidationWarning::MissingOutput(name.clone()));
                    }
                    for reason in t.gear_issues() {
                        warnings.push(ValidationWarning::MalformedGears { node: name.clone(), reason: reason.clone() });
                    }
                    for reason in t.shift_point_issues(limits.idle_rpm, limits.rev_limiter_rpm) {
                        warnings.push(ValidationWarning::ShiftPointsOutOfRange { node: name.clone(), reason });
                    }
                }
            }

            if let Some(seen) = &reachable {
                if !seen[index] {
                    warnings.push(ValidationWarning::Unreachable(name));
                }
            }
        }

        warnings
    }

    // ==========================================================================
    // Traversal helpers
    // ==========================================================================

    /// Pre-order ids reachable from `start`, A before B.
    fn tree_order(&self, start: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut visited[id.index()], true) {
                continue;
            }
            order.push(id);
            let node = &self.nodes[id.index()];
            stack.extend(node.output_b());
            stack.extend(node.output());
        }
        order
    }

    /// Clutch directly upstream of `id`, walking inputs.
    fn upstream_clutch(&self, id: NodeId) -> Option<NodeId> {
        let mut current = self.nodes[id.index()].input();
        let mut hops = 0;
        while let Some(parent) = current {
            if self.nodes[parent.index()].as_clutch().is_some() {
                return Some(parent);
            }
            hops += 1;
            if hops > self.nodes.len() {
                return None;
            }
            current = self.nodes[parent.index()].input();
        }
        None
    }

    fn first_transmission_below(&self, id: NodeId) -> Option<NodeId> {
        self.tree_order(id).into_iter().find(|n| self.nodes[n.index()].as_transmission().is_some())
    }

    /// First transmission under the root.
    pub fn primary_transmission(&self) -> Option<NodeId> {
        self.first_transmission_below(self.root?)
    }

    /// Gear of the primary transmission, neutral if there is none.
    pub fn gear(&self) -> i32 {
        self.primary_transmission()
            .and_then(|id| self.nodes[id.index()].as_transmission())
            .map(Transmission::gear)
            .unwrap_or(0)
    }

    // ==========================================================================
    // Runtime
    // ==========================================================================

    pub fn shift_into(&mut self, id: NodeId, gear: i32) -> Result<(), PowertrainError> {
        self.check(id)?;
        let clutch_input = self
            .upstream_clutch(id)
            .and_then(|c| self.nodes[c.index()].as_clutch())
            .map(Clutch::clutch_input);
        let node = &mut self.nodes[id.index()];
        let damage = node.damage();
        let name = node.name().to_string();
        let Some(transmission) = node.as_transmission_mut() else {
            return Err(PowertrainError::NotATransmission(name));
        };
        transmission.shift_into(gear, false, clutch_input, damage)?;
        Ok(())
    }

    /// Resets damage on every node. Wiring is untouched.
    pub fn repair(&mut self) {
        for node in &mut self.nodes {
            node.set_damage(0.0);
        }
    }

    /// Hard stop: neutral, no shift in flight, wheels back on their own.
    pub fn disable(&mut self) {
        self.enabled = false;
        for node in &mut self.nodes {
            match &mut node.kind {
                NodeKind::Transmission(t) => t.reset(),
                NodeKind::Wheel(w) => {
                    w.clear_brakes();
                    let sim = w.sim_mut();
                    sim.set_motor_torque(0.0);
                    sim.set_auto_simulate(true);
                }
                _ => {}
            }
            node.state = Default::default();
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Runs one solver tick. Discrete shift requests in `input` are consumed.
    pub fn step(
        &mut self,
        source: &mut dyn PowerSource,
        input: &mut ControlInput,
        chassis: ChassisState,
        dt: f32,
    ) -> TickReport {
        let mut report = TickReport::default();
        if !self.enabled {
            input.clear_discrete();
            return report;
        }

        let mut tick_input = input.clamped();
        let swapped = self.settings.swap_input_in_reverse && self.gear() < 0;
        if swapped {
            std::mem::swap(&mut tick_input.throttle, &mut tick_input.brake);
        }

        // 1) wake
        let wake = self.settings.wake_on_throttle && tick_input.throttle > self.settings.wake_throttle_threshold;

        // 2) brakes + steering
        for wheel in self.nodes.iter_mut().filter_map(Node::as_wheel_mut) {
            if wake && wheel.sim().is_asleep() {
                wheel.sim_mut().wake();
            }
            wheel.clear_brakes();
        }
        for group in &self.wheel_groups {
            group.apply_brakes(&mut self.nodes, &tick_input, self.settings.max_brake_torque);
            group.apply_steering(&mut self.nodes, tick_input.steer, self.settings.max_steer_angle);
        }

        // 3) axle coupling
        for group in &mut self.wheel_groups {
            report.chassis_forces.extend(group.update(&mut self.nodes));
        }

        let Some(root) = self.root else {
            input.clear_discrete();
            return report;
        };

        let mut source_state = source.state();
        source_state.throttle = tick_input.throttle;
        let dt = dt.max(1e-6);
        let mut ctx = TickContext::new(dt, tick_input, chassis, source_state);
        ctx.reverse_swapped = swapped;

        // 4) query pass
        node::query_angular_velocity(&mut self.nodes, root, source_state.angular_velocity, dt);

        // 5) control pass
        let order = self.tree_order(root);
        for &id in &order {
            if self.nodes[id.index()].as_transmission().is_none() {
                continue;
            }
            let clutch_input = self
                .upstream_clutch(id)
                .and_then(|c| self.nodes[c.index()].as_clutch())
                .map(Clutch::clutch_input);
            let node = &mut self.nodes[id.index()];
            let damage = node.damage();
            let output_w = node.state.output_angular_velocity;
            if let Some(t) = node.as_transmission_mut() {
                t.update_control(&ctx, output_w, clutch_input, damage);
                report.events.extend(t.drain_events().into_iter().map(|event| PowertrainEvent { node: id, event }));
            }
        }
        for &id in &order {
            if self.nodes[id.index()].as_clutch().is_none() {
                continue;
            }
            let progress = self
                .first_transmission_below(id)
                .and_then(|t| self.nodes[t.index()].as_transmission())
                .and_then(|t| t.shift_state().progress());
            let node = &mut self.nodes[id.index()];
            let coupled_rpm = rad_to_rpm(node.state.output_angular_velocity);
            if let Some(c) = node.as_clutch_mut() {
                c.update_control(&ctx, progress, coupled_rpm);
            }
        }

        // 6) inertia
        report.root_inertia = node::query_inertia(&mut self.nodes, root);

        // 7) torque
        let drive = source.drive_torque(tick_input.throttle, dt);
        let reaction = node::forward_step(&mut self.nodes, root, drive, source_state.inertia, &ctx);
        source.integrate(drive, reaction, dt);

        // 8) sync
        let coupled = node::query_angular_velocity(&mut self.nodes, root, source.state().angular_velocity, dt);
        source.set_angular_velocity(coupled);

        report.drive_torque = drive;
        report.reaction_torque = reaction;

        // 9) consumed
        input.clear_discrete();
        report
    }

    pub fn snapshot(&self) -> PowertrainSnapshot {
        PowertrainSnapshot::capture(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::powertrain::clutch::ClutchConfig;
    use crate::powertrain::differential::DifferentialConfig;
    use crate::powertrain::test_utils::{ConstantSource, MockWheel, two_wheel_config};
    use crate::powertrain::transmission::TransmissionConfig;

    fn clutch() -> Node {
        Node::new("clutch", 0.1, NodeKind::Clutch(Clutch::new(ClutchConfig::default())))
    }
    fn gearbox(name: &str) -> Node {
        Node::new(name, 0.05, NodeKind::Transmission(Transmission::new(TransmissionConfig::default())))
    }
    fn diff(name: &str) -> Node {
        Node::new(name, 0.05, NodeKind::Differential(Differential::new(DifferentialConfig::open())))
    }

    fn mock_wheels(name: &str) -> Option<Box<dyn WheelSim>> {
        let x = if name.ends_with('l') { -0.8 } else { 0.8 };
        Some(Box::new(MockWheel::free(1.0, 2.0).at(x, 0.0, 1.2)))
    }

    #[test]
    fn connect_updates_both_sides() {
        let mut pt = Powertrain::default();
        let c = pt.add_node(clutch()).unwrap();
        let t = pt.add_node(gearbox("gearbox")).unwrap();
        pt.connect(c, OutputSlot::A, t).unwrap();
        assert_eq!(pt.node(c).unwrap().output(), Some(t));
        assert_eq!(pt.node(t).unwrap().input(), Some(c));

        pt.disconnect(c, OutputSlot::A).unwrap();
        assert_eq!(pt.node(c).unwrap().output(), None);
        assert_eq!(pt.node(t).unwrap().input(), None);
    }

    #[test]
    fn rewiring_releases_old_target() {
        let mut pt = Powertrain::default();
        let c = pt.add_node(clutch()).unwrap();
        let a = pt.add_node(gearbox("a")).unwrap();
        let b = pt.add_node(gearbox("b")).unwrap();
        pt.connect(c, OutputSlot::A, a).unwrap();
        pt.connect(c, OutputSlot::A, b).unwrap();
        assert_eq!(pt.node(a).unwrap().input(), None);
        assert_eq!(pt.node(b).unwrap().input(), Some(c));
    }

    #[test]
    fn self_reference_is_cleared_with_warning() {
        let mut pt = Powertrain::default();
        let c = pt.add_node(clutch()).unwrap();
        let t = pt.add_node(gearbox("gearbox")).unwrap();
        pt.connect(t, OutputSlot::A, c).unwrap();
        pt.connect(t, OutputSlot::A, t).unwrap();
        assert_eq!(pt.node(t).unwrap().output(), None);
        assert_eq!(pt.node(c).unwrap().input(), None);
        let warnings = pt.validate(ValidationLimits::from(&SourceState::default()));
        assert!(warnings.contains(&ValidationWarning::SelfReferencingOutput("gearbox".into())));
    }

    #[test]
    fn second_input_is_refused() {
        let mut pt = Powertrain::default();
        let a = pt.add_node(gearbox("a")).unwrap();
        let b = pt.add_node(gearbox("b")).unwrap();
        let d = pt.add_node(diff("d")).unwrap();
        pt.connect(a, OutputSlot::A, d).unwrap();
        assert!(matches!(pt.connect(b, OutputSlot::A, d), Err(PowertrainError::MultipleInputs { .. })));
    }

    #[test]
    fn cycles_are_refused_at_connect() {
        let mut pt = Powertrain::default();
        let a = pt.add_node(gearbox("a")).unwrap();
        let b = pt.add_node(gearbox("b")).unwrap();
        let c = pt.add_node(gearbox("c")).unwrap();
        pt.connect(a, OutputSlot::A, b).unwrap();
        pt.connect(b, OutputSlot::A, c).unwrap();
        assert!(matches!(pt.connect(c, OutputSlot::A, a), Err(PowertrainError::Cycle(_))));
        assert_eq!(pt.node(c).unwrap().output(), None);
    }

    #[test]
    fn slot_b_needs_differential() {
        let mut pt = Powertrain::default();
        let a = pt.add_node(gearbox("a")).unwrap();
        let b = pt.add_node(gearbox("b")).unwrap();
        assert!(matches!(pt.connect(a, OutputSlot::B, b), Err(PowertrainError::InvalidSlot(_))));
    }

    #[test]
    fn duplicate_names_are_refused() {
        let mut pt = Powertrain::default();
        pt.add_node(gearbox("a")).unwrap();
        assert_eq!(pt.add_node(gearbox("a")), Err(PowertrainError::DuplicateName("a".into())));
    }

    #[test]
    fn find_cycle_detects_hand_built_loop() {
        let mut pt = Powertrain::default();
        let a = pt.add_node(gearbox("a")).unwrap();
        let b = pt.add_node(gearbox("b")).unwrap();
        // bypass connect to simulate a corrupted arena
        pt.nodes[a.index()].output = Some(b);
        pt.nodes[b.index()].output = Some(a);
        assert!(matches!(pt.initialize(), Err(PowertrainError::Cycle(_))));
    }

    #[test]
    fn config_round_trips() {
        let config = two_wheel_config();
        let pt = Powertrain::from_config(&config, &mut mock_wheels).unwrap();
        assert_eq!(pt.root(), pt.find("clutch"));
        assert_eq!(pt.wheel_groups()[0].wheels().len(), 2);
        assert_eq!(pt.to_config(), config);
    }

    #[test]
    fn unresolved_reference_is_an_error() {
        let mut config = two_wheel_config();
        config.nodes[0].output = Some(NameHash::of("nowhere"));
        let err = Powertrain::from_config(&config, &mut mock_wheels).err();
        assert!(matches!(err, Some(PowertrainError::UnresolvedReference { .. })));
    }

    #[test]
    fn missing_wheel_sim_is_an_error() {
        let err = Powertrain::from_config(&two_wheel_config(), &mut |_: &str| -> Option<Box<dyn WheelSim>> { None }).err();
        assert!(matches!(err, Some(PowertrainError::MissingWheelSim { .. })));
    }

    #[test]
    fn validate_reports_structural_problems() {
        let mut pt = Powertrain::default();
        let c = pt.add_node(clutch()).unwrap();
        let d = pt.add_node(diff("lonely")).unwrap();
        let t = pt.add_node(gearbox("gearbox")).unwrap();
        pt.connect(c, OutputSlot::A, t).unwrap();
        pt.set_root(c).unwrap();
        let _ = d;

        let warnings = pt.validate(ValidationLimits { idle_rpm: 800.0, rev_limiter_rpm: 5000.0 });
        assert!(warnings.contains(&ValidationWarning::MissingOutput("gearbox".into())));
        assert!(warnings.contains(&ValidationWarning::MissingOutput("lonely".into())));
        assert!(warnings.contains(&ValidationWarning::DanglingDifferential("lonely".into())));
        assert!(warnings.contains(&ValidationWarning::Unreachable("lonely".into())));
        assert!(warnings.iter().any(|w| matches!(w, ValidationWarning::ShiftPointsOutOfRange { .. })));
    }

    #[test]
    fn validate_without_root() {
        let pt = Powertrain::default();
        assert_eq!(pt.validate(ValidationLimits::from(&SourceState::default())), vec![ValidationWarning::NoRoot]);
    }

    #[test]
    fn low_inertia_in_config_warns() {
        let mut config = two_wheel_config();
        config.nodes[0].inertia = 0.0;
        let pt = Powertrain::from_config(&config, &mut mock_wheels).unwrap();
        let warnings = pt.validate(ValidationLimits::from(&SourceState::default()));
        assert!(warnings.iter().any(|w| matches!(w, ValidationWarning::InertiaBelowFloor { .. })));
    }

    #[test]
    fn step_consumes_shift_requests() {
        let mut pt = Powertrain::from_config(&two_wheel_config(), &mut mock_wheels).unwrap();
        let gearbox = pt.find("transmission").unwrap();
        let mut source = ConstantSource::new(0.0);
        let mut input = ControlInput { shift_up: true, ..Default::default() };
        let rolling = ChassisState { speed: 10.0, incline: 0.0 };

        let report = pt.step(&mut source, &mut input, rolling, 0.01);
        assert!(!input.shift_up);
        assert_eq!(pt.node(gearbox).unwrap().as_transmission().unwrap().gear(), 1);
        assert!(report.events.contains(&PowertrainEvent {
            node: gearbox,
            event: TransmissionEvent::Upshift { from: 0, to: 1 },
        }));
        assert!(report.events.iter().all(|e| e.node == gearbox));
    }

    #[test]
    fn shift_into_reports_rejections() {
        let mut pt = Powertrain::from_config(&two_wheel_config(), &mut mock_wheels).unwrap();
        let gearbox = pt.find("transmission").unwrap();
        let clutch = pt.find("clutch").unwrap();
        assert!(matches!(pt.shift_into(gearbox, 9), Err(PowertrainError::Shift(_))));
        assert!(matches!(pt.shift_into(clutch, 1), Err(PowertrainError::NotATransmission(_))));
    }

    #[test]
    fn disable_resets_to_neutral_and_stops_solving() {
        let mut pt = Powertrain::from_config(&two_wheel_config(), &mut mock_wheels).unwrap();
        let mut source = ConstantSource::new(100.0);
        pt.disable();
        assert_eq!(pt.gear(), 0);
        let report = pt.step(&mut source, &mut ControlInput::default(), ChassisState::default(), 0.01);
        assert_eq!(report.drive_torque, 0.0);
        pt.enable();
        let report = pt.step(&mut source, &mut ControlInput::default(), ChassisState::default(), 0.01);
        assert_eq!(report.drive_torque, 100.0);
    }

    #[test]
    fn repair_clears_damage() {
        let mut pt = Powertrain::from_config(&two_wheel_config(), &mut mock_wheels).unwrap();
        let gearbox = pt.find("transmission").unwrap();
        pt.node_mut(gearbox).unwrap().set_damage(1.0);
        assert!(pt.shift_into(gearbox, 2).is_err());
        pt.repair();
        assert_eq!(pt.node(gearbox).unwrap().damage(), 0.0);
    }

    fn wheels_asleep(pt: &Powertrain) -> Vec<bool> {
        pt.nodes().iter().filter_map(Node::as_wheel).map(|w| w.sim().is_asleep()).collect()
    }

    fn brake_torques(pt: &Powertrain) -> Vec<f32> {
        pt.nodes().iter().filter_map(Node::as_wheel).map(|w| w.sim().brake_torque()).collect()
    }

    #[test]
    fn throttle_wakes_sleeping_wheels() {
        let mut pt = Powertrain::from_config(&two_wheel_config(), &mut |_: &str| -> Option<Box<dyn WheelSim>> {
            Some(Box::new(MockWheel::free(1.0, 2.0).asleep()))
        })
        .unwrap();
        let mut source = ConstantSource::new(0.0);

        pt.step(&mut source, &mut ControlInput { throttle: 0.01, ..Default::default() }, ChassisState::default(), 0.01);
        assert_eq!(wheels_asleep(&pt), vec![true, true]);

        pt.step(&mut source, &mut ControlInput { throttle: 0.5, ..Default::default() }, ChassisState::default(), 0.01);
        assert_eq!(wheels_asleep(&pt), vec![false, false]);
    }

    #[test]
    fn throttle_brakes_in_reverse_when_inputs_swap() {
        let reversing = ChassisState { speed: -10.0, incline: 0.0 };
        let mut swapped = Powertrain::from_config(&two_wheel_config(), &mut mock_wheels).unwrap();
        let gearbox = swapped.find("transmission").unwrap();
        swapped.shift_into(gearbox, -1).unwrap();

        let mut config = two_wheel_config();
        config.settings.swap_input_in_reverse = false;
        let mut plain = Powertrain::from_config(&config, &mut mock_wheels).unwrap();
        plain.shift_into(gearbox, -1).unwrap();

        for pt in [&mut swapped, &mut plain] {
            let mut input = ControlInput { throttle: 1.0, ..Default::default() };
            pt.step(&mut ConstantSource::new(100.0), &mut input, reversing, 0.01);
            assert_eq!(pt.gear(), -1);
        }
        assert!(brake_torques(&swapped).iter().all(|b| *b > 0.0));
        assert!(brake_torques(&plain).iter().all(|b| *b == 0.0));
    }

    #[test]
    fn held_brake_keeps_unswapped_reverse_engaged() {
        let mut config = two_wheel_config();
        config.settings.swap_input_in_reverse = false;
        let mut pt = Powertrain::from_config(&config, &mut mock_wheels).unwrap();
        let mut source = ConstantSource::new(0.0);

        let mut gears = Vec::new();
        let mut events = 0;
        for _ in 0..6 {
            let mut input = ControlInput { brake: 1.0, ..Default::default() };
            let report = pt.step(&mut source, &mut input, ChassisState::default(), 0.01);
            gears.push(pt.gear());
            events += report.events.len();
        }
        assert_eq!(gears, vec![-1; 6]);
        assert_eq!(events, 2);
    }
}
