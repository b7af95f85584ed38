// ==============================================================================
// transmission.rs — GEARBOX: RATIOS, SHIFTING, AUTOMATIC POLICY, CVT
// ------------------------------------------------------------------------------
// Gears are one signed list: reverse ratios (negative), exactly one neutral (0),
// forward ratios (positive), ordered so the list index grows with the gear
// number. Gear number <-> index is a fixed offset (the reverse gear count).
//
// Solver side:
// - ratio r = gears[index] * final_ratio (CVT: continuous, sign from the gear)
// - torque goes down multiplied by r (and by 1 - damage), reaction comes back
//   divided by r
// - reflected inertia = own + downstream / r²
// - neutral (|r| < eps): zero torque goes down (downstream still steps),
//   the input torque comes back untouched
//
// Control side (once per tick, before the torque push):
// - advance the shift sequence, change gear at its midpoint
// - consume discrete shift requests
// - automatic / sequential / CVT: pick the gear from the no-slip RPM
// ==============================================================================

use serde::{Deserialize, Serialize};

use crate::powertrain::node::{self, Node};
use crate::powertrain::shift::{ShiftRejection, ShiftState, TransmissionEvent};
use crate::powertrain::types::{NodeId, TickContext, is_neutral_ratio, lerp, rad_to_rpm};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransmissionType {
    Manual,
    #[default]
    Automatic,
    AutomaticSequential,
    Cvt,
}

/// How an automatic box gets out of (and back into) neutral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReverseShiftPolicy {
    /// Throttle selects first, brake at standstill selects reverse.
    #[default]
    Auto,
    /// Only shift up / shift down leave neutral.
    RequireShiftInput,
    /// Like `Auto`, but after falling back to neutral the pedal has to be
    /// released and pressed again.
    RepeatInput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransmissionConfig {
    pub transmission_type: TransmissionType,
    pub gears: Vec<f32>,
    pub final_ratio: f32,

    // --- shifting ---
    pub shift_duration: f32,            // s
    pub post_shift_ban: f32,            // s
    pub manual_post_shift_ban: bool,
    pub require_clutch: bool,
    pub clutch_shift_threshold: f32,    // clutch input above which a shift is refused

    // --- automatic policy (calibration) ---
    pub upshift_rpm: f32,
    pub downshift_rpm: f32,
    pub variable_shift_point: bool,
    pub variable_shift_intensity: f32,
    pub incline_effect: f32,
    pub gear_skipping: bool,
    pub reverse_policy: ReverseShiftPolicy,
    pub cvt_smoothing: f32,             // 1/s
}

impl Default for TransmissionConfig {
    fn default() -> Self {
        Self {
            transmission_type: TransmissionType::Automatic,
            gears: vec![-3.44, 0.0, 3.63, 2.19, 1.54, 1.21, 1.0, 0.77],
            final_ratio: 4.1,
            shift_duration: 0.2,
            post_shift_ban: 0.5,
            manual_post_shift_ban: false,
            require_clutch: false,
            clutch_shift_threshold: 0.2,
            upshift_rpm: 5600.0,
            downshift_rpm: 2800.0,
            variable_shift_point: true,
            variable_shift_intensity: 0.6,
            incline_effect: 2.0,
            gear_skipping: true,
            reverse_policy: ReverseShiftPolicy::Auto,
            cvt_smoothing: 4.0,
        }
    }
}

// Thresholds for "standing still" and "pedal pressed" in the D/N/R logic.
const STANDSTILL_SPEED: f32 = 0.5;      // m/s
const PEDAL_ENGAGED: f32 = 0.1;
const PEDAL_RELEASED: f32 = 0.05;
const CVT_RANGE: f32 = 40.0;

/// Sorts a raw gear list into [reverse.., 0, forward..] and reports what had
/// to be fixed.
pub fn normalize_gears(raw: &[f32]) -> (Vec<f32>, Vec<String>) {
    let mut issues = Vec::new();

    let finite: Vec<f32> = raw.iter().copied().filter(|g| g.is_finite()).collect();
    if finite.len() != raw.len() {
        issues.push("non-finite gear ratios dropped".to_string());
    }

    let mut reverse: Vec<f32> = finite.iter().copied().filter(|g| *g < 0.0 && !is_neutral_ratio(*g)).collect();
    let mut forward: Vec<f32> = finite.iter().copied().filter(|g| *g > 0.0 && !is_neutral_ratio(*g)).collect();
    let zeros = finite.iter().filter(|g| is_neutral_ratio(**g)).count();

    match zeros {
        0 => issues.push("no neutral gear, one inserted".to_string()),
        1 => {}
        n => issues.push(format!("{n} neutral gears, merged into one")),
    }
    if forward.is_empty() {
        issues.push("no forward gears".to_string());
    }

    // Index grows with gear number: R2, R1, N, 1, 2, ...
    reverse.sort_by(|a, b| b.total_cmp(a));
    forward.sort_by(|a, b| b.total_cmp(a));

    let sorted_input: Vec<f32> = reverse.iter().chain([0.0].iter()).chain(forward.iter()).copied().collect();
    let as_authored: Vec<f32> = finite.iter().map(|g| if is_neutral_ratio(*g) { 0.0 } else { *g }).collect();
    if zeros == 1 && sorted_input != as_authored {
        issues.push("gears reordered".to_string());
    }

    (sorted_input, issues)
}

#[derive(Debug, Clone)]
pub struct Transmission {
    pub config: TransmissionConfig,
    gears: Vec<f32>,
    reverse_count: usize,
    gear_index: usize,
    shift_state: ShiftState,
    cvt_ratio: f32,                 // magnitude, 0 = re-init on next forward tick
    smoothed_throttle: f32,
    awaiting_pedal_release: bool,
    events: Vec<TransmissionEvent>,
    gear_issues: Vec<String>,
}

impl Transmission {
    pub fn new(config: TransmissionConfig) -> Self {
        let (gears, gear_issues) = normalize_gears(&config.gears);
        let reverse_count = gears.iter().position(|g| *g == 0.0).unwrap_or(0);
        Self {
            config,
            gears,
            reverse_count,
            gear_index: reverse_count,
            shift_state: ShiftState::Idle,
            cvt_ratio: 0.0,
            smoothed_throttle: 0.0,
            awaiting_pedal_release: false,
            events: Vec::new(),
            gear_issues,
        }
    }

    pub fn gears(&self) -> &[f32] { &self.gears }
    pub fn gear_issues(&self) -> &[String] { &self.gear_issues }
    pub fn shift_state(&self) -> ShiftState { self.shift_state }
    pub fn events(&self) -> &[TransmissionEvent] { &self.events }

    pub fn gear(&self) -> i32 {
        self.gear_index as i32 - self.reverse_count as i32
    }

    pub fn forward_gear_count(&self) -> i32 {
        (self.gears.len() - self.reverse_count - 1) as i32
    }

    pub fn reverse_gear_count(&self) -> i32 {
        self.reverse_count as i32
    }

    fn index_of(&self, gear: i32) -> Option<usize> {
        let index = gear.checked_add(self.reverse_count as i32)?;
        if index < 0 || index as usize >= self.gears.len() {
            return None;
        }
        Some(index as usize)
    }

    pub fn is_neutral(&self) -> bool {
        is_neutral_ratio(self.ratio())
    }

    /// Ratio of an arbitrary gear, final drive included.
    pub fn ratio_of(&self, gear: i32) -> f32 {
        self.index_of(gear).map(|i| self.gears[i] * self.config.final_ratio).unwrap_or(0.0)
    }

    /// Ratio currently applied by the solver.
    pub fn ratio(&self) -> f32 {
        let gear = self.gear();
        if self.config.transmission_type == TransmissionType::Cvt && gear != 0 {
            let magnitude = if self.cvt_ratio > 0.0 { self.cvt_ratio } else { self.cvt_max_ratio() };
            return magnitude * gear.signum() as f32;
        }
        self.ratio_of(gear)
    }

    fn cvt_min_ratio(&self) -> f32 {
        let top = self.gears.last().copied().filter(|g| *g > 0.0).unwrap_or(1.0);
        (top * self.config.final_ratio).abs()
    }

    fn cvt_max_ratio(&self) -> f32 {
        self.cvt_min_ratio() * CVT_RANGE
    }

    pub fn drain_events(&mut self) -> Vec<TransmissionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Hard reset used when the vehicle is disabled.
    pub fn reset(&mut self) {
        self.gear_index = self.reverse_count;
        self.shift_state = ShiftState::Idle;
        self.cvt_ratio = 0.0;
        self.smoothed_throttle = 0.0;
        self.awaiting_pedal_release = false;
        self.events.clear();
    }

    fn post_shift_ban(&self) -> f32 {
        let ban = self.config.post_shift_ban.max(0.0);
        match self.config.transmission_type {
            TransmissionType::Manual if !self.config.manual_post_shift_ban => 0.0,
            _ => ban,
        }
    }

    fn set_gear(&mut self, gear: i32) {
        let Some(index) = self.index_of(gear) else { return };
        let from = self.gear();
        self.gear_index = index;
        if gear == 0 {
            self.cvt_ratio = 0.0;
        }
        self.events.extend(TransmissionEvent::for_change(from, gear));
    }

    /// Requests a gear change. `clutch_input` is the actuation of the clutch
    /// feeding this box, if the request should be checked against it.
    pub fn shift_into(
        &mut self,
        target: i32,
        instant: bool,
        clutch_input: Option<f32>,
        damage: f32,
    ) -> Result<(), ShiftRejection> {
        let current = self.gear();
        if target == current {
            return Err(ShiftRejection::SameGear(target));
        }
        if self.index_of(target).is_none() {
            return Err(ShiftRejection::OutOfRange(target));
        }
        if damage >= 1.0 {
            return Err(ShiftRejection::Destroyed);
        }
        if self.config.require_clutch
            && clutch_input.is_some_and(|c| c > self.config.clutch_shift_threshold)
        {
            self.events.push(TransmissionEvent::TriedToShiftWithoutClutch);
            return Err(ShiftRejection::ClutchEngaged);
        }
        if self.shift_state.is_shifting() {
            return Err(ShiftRejection::AlreadyShifting);
        }

        let through_neutral = target == 0 || current == 0;
        if self.shift_state.ban_active() && !through_neutral {
            return Err(ShiftRejection::PostShiftBan);
        }

        if instant || through_neutral || self.config.shift_duration <= 0.0 {
            self.shift_state = ShiftState::Idle;
            self.set_gear(target);
        } else {
            self.shift_state = ShiftState::begin(current, target, self.config.shift_duration);
        }
        Ok(())
    }

    pub fn shift_up(&mut self, clutch_input: Option<f32>, damage: f32) -> Result<(), ShiftRejection> {
        self.shift_into(self.gear() + 1, false, clutch_input, damage)
    }

    pub fn shift_down(&mut self, clutch_input: Option<f32>, damage: f32) -> Result<(), ShiftRejection> {
        self.shift_into(self.gear() - 1, false, clutch_input, damage)
    }

    /// Per-tick control update. `output_angular_velocity` is the downstream
    /// (wheel side) velocity seen by the last query pass.
    pub fn update_control(
        &mut self,
        ctx: &TickContext,
        output_angular_velocity: f32,
        clutch_input: Option<f32>,
        damage: f32,
    ) {
        if let Some((_, to)) = self.shift_state.advance(ctx.dt, self.post_shift_ban()) {
            self.set_gear(to);
        }

        self.handle_driver_requests(ctx, clutch_input, damage);

        if self.config.transmission_type != TransmissionType::Manual {
            self.automatic_shift(ctx, output_angular_velocity, damage);
        }

        if self.config.transmission_type == TransmissionType::Cvt {
            self.update_cvt(ctx);
        }
    }

    fn handle_driver_requests(&mut self, ctx: &TickContext, clutch_input: Option<f32>, damage: f32) {
        let input = &ctx.input;
        // Rejections are dropped; the clutch case already queued its event.
        if let Some(target) = input.shift_into {
            let _ = self.shift_into(target, false, clutch_input, damage);
            return;
        }

        let automatic = self.config.transmission_type != TransmissionType::Manual;
        let gear = self.gear();

        // Automatic boxes only take paddles for D/N/R; the policy owns forward gears.
        if input.shift_up && (!automatic || gear <= 0) {
            let _ = self.shift_up(clutch_input, damage);
        } else if input.shift_down && (!automatic || gear <= 1) {
            let _ = self.shift_down(clutch_input, damage);
        }
    }

    // --------------------------------------------------------------------------
    // Automatic policy
    // --------------------------------------------------------------------------

    /// (upshift, downshift) RPM for this tick.
    pub fn shift_points(&mut self, ctx: &TickContext) -> (f32, f32) {
        let cfg = &self.config;
        let up = cfg.upshift_rpm;
        let down = cfg.downshift_rpm;

        self.smoothed_throttle = lerp(self.smoothed_throttle, ctx.source.throttle, ctx.dt * 2.0);
        if !cfg.variable_shift_point {
            return (up, down);
        }

        let variable = self.smoothed_throttle * cfg.variable_shift_intensity.max(0.0);
        let incline = (ctx.chassis.incline * cfg.incline_effect).max(0.0);
        let k = (variable + incline).min(1.0);

        let limiter = ctx.source.rev_limiter_rpm.max(up);
        (up + (limiter - up) * k, down + (up - down) * k * 0.5)
    }

    fn rpm_in(&self, gear: i32, output_angular_velocity: f32) -> f32 {
        rad_to_rpm(output_angular_velocity * self.ratio_of(gear)).abs()
    }

    fn automatic_shift(&mut self, ctx: &TickContext, output_w: f32, damage: f32) {
        let (target_up, target_down) = self.shift_points(ctx);
        if self.shift_state.is_shifting() {
            return;
        }

        let gear = self.gear();
        let throttle = ctx.input.throttle;
        let brake = ctx.input.brake;
        let standing = ctx.chassis.speed.abs() < STANDSTILL_SPEED;
        let policy = self.config.reverse_policy;

        if throttle < PEDAL_RELEASED && brake < PEDAL_RELEASED {
            self.awaiting_pedal_release = false;
        }

        if gear == 0 {
            if policy == ReverseShiftPolicy::RequireShiftInput || self.awaiting_pedal_release {
                return;
            }
            if throttle > PEDAL_ENGAGED {
                let _ = self.shift_into(1, true, None, damage);
            } else if brake > PEDAL_ENGAGED && standing {
                let _ = self.shift_into(-1, true, None, damage);
            }
            return;
        }

        // Fall back to neutral when parked. Unswapped reverse is held by the brake.
        let holding = if gear < 0 && !ctx.reverse_swapped { brake } else { throttle };
        if standing && holding < PEDAL_RELEASED && policy != ReverseShiftPolicy::RequireShiftInput {
            if self.shift_into(0, true, None, damage).is_ok() && policy == ReverseShiftPolicy::RepeatInput {
                self.awaiting_pedal_release = throttle.max(brake) >= PEDAL_RELEASED;
            }
            return;
        }

        if self.shift_state.ban_active() || self.config.transmission_type == TransmissionType::Cvt {
            return;
        }

        let rpm = self.rpm_in(gear, output_w);
        let direction = gear.signum();
        let last = if direction > 0 { self.forward_gear_count() } else { -self.reverse_gear_count() };

        let target = if rpm > target_up && gear != last {
            Some(self.pick_upshift(gear, last, output_w, target_up, target_down))
        } else if rpm < target_down && gear != direction {
            Some(self.pick_downshift(gear, output_w, target_up, target_down))
        } else {
            None
        };

        if let Some(target) = target {
            let _ = self.shift_into(target, false, None, damage);
        }
    }

    fn skip_padding(&self, target_up: f32, target_down: f32) -> f32 {
        self.config.shift_duration.clamp(0.0, 1.0) * (target_up - target_down).abs() * 0.25
    }

    fn skipping(&self) -> bool {
        self.config.gear_skipping && self.config.transmission_type == TransmissionType::Automatic
    }

    /// Furthest gear toward `last` whose RPM stays above the downshift point.
    fn pick_upshift(&self, gear: i32, last: i32, output_w: f32, target_up: f32, target_down: f32) -> i32 {
        let step = gear.signum();
        let mut pick = gear + step;
        if !self.skipping() {
            return pick;
        }
        let floor = target_down + self.skip_padding(target_up, target_down);
        let mut candidate = pick + step;
        while candidate * step <= last * step {
            if self.rpm_in(candidate, output_w) <= floor {
                break;
            }
            pick = candidate;
            candidate += step;
        }
        pick
    }

    /// Furthest gear toward first whose RPM stays below the upshift point.
    fn pick_downshift(&self, gear: i32, output_w: f32, target_up: f32, target_down: f32) -> i32 {
        let step = -gear.signum();
        let first = gear.signum();
        let mut pick = gear + step;
        if !self.skipping() {
            return pick;
        }
        let ceiling = target_up - self.skip_padding(target_up, target_down);
        let mut candidate = pick + step;
        while candidate * first >= 1 {
            if self.rpm_in(candidate, output_w) >= ceiling {
                break;
            }
            pick = candidate;
            candidate += step;
        }
        pick
    }

    fn update_cvt(&mut self, ctx: &TickContext) {
        if self.gear() == 0 {
            self.cvt_ratio = 0.0;
            return;
        }
        let (min, max) = (self.cvt_min_ratio(), self.cvt_max_ratio());
        if self.cvt_ratio <= 0.0 {
            self.cvt_ratio = max;
        }
        let t = (ctx.source.rpm_percent() * 0.5 + (1.0 - ctx.source.throttle) * 0.5).clamp(0.0, 1.0);
        let target = lerp(max, min, t);
        self.cvt_ratio = lerp(self.cvt_ratio, target, ctx.dt * self.config.cvt_smoothing.max(0.0));
    }

    /// Shift RPMs that cannot work with this source.
    pub fn shift_point_issues(&self, idle_rpm: f32, rev_limiter_rpm: f32) -> Vec<String> {
        let cfg = &self.config;
        let mut issues = Vec::new();
        if cfg.transmission_type == TransmissionType::Manual {
            return issues;
        }
        if cfg.upshift_rpm <= cfg.downshift_rpm {
            issues.push(format!("upshift rpm {} is not above downshift rpm {}", cfg.upshift_rpm, cfg.downshift_rpm));
        }
        if cfg.upshift_rpm > rev_limiter_rpm {
            issues.push(format!("upshift rpm {} is above the rev limiter {}", cfg.upshift_rpm, rev_limiter_rpm));
        }
        if cfg.downshift_rpm < idle_rpm {
            issues.push(format!("downshift rpm {} is below idle {}", cfg.downshift_rpm, idle_rpm));
        }
        issues
    }
}

// ==============================================================================
// Solver operations
// ==============================================================================

fn ratio_and_output(nodes: &[Node], id: NodeId) -> Option<(f32, NodeId)> {
    let node = &nodes[id.index()];
    Some((node.as_transmission()?.ratio(), node.output()?))
}

pub(crate) fn query_angular_velocity(nodes: &mut [Node], id: NodeId, angular_velocity: f32, dt: f32) -> f32 {
    let Some((ratio, output)) = ratio_and_output(nodes, id) else { return angular_velocity };

    if is_neutral_ratio(ratio) {
        let downstream = node::query_angular_velocity(nodes, output, 0.0, dt);
        nodes[id.index()].state.output_angular_velocity = downstream;
        return angular_velocity;
    }

    let downstream = node::query_angular_velocity(nodes, output, angular_velocity / ratio, dt);
    nodes[id.index()].state.output_angular_velocity = downstream;
    downstream * ratio
}

pub(crate) fn query_inertia(nodes: &mut [Node], id: NodeId) -> f32 {
    let own = nodes[id.index()].inertia();
    let Some((ratio, output)) = ratio_and_output(nodes, id) else { return own };
    if is_neutral_ratio(ratio) {
        return own;
    }
    own + node::query_inertia(nodes, output) / (ratio * ratio)
}

pub(crate) fn forward_step(nodes: &mut [Node], id: NodeId, torque: f32, inertia_sum: f32, ctx: &TickContext) -> f32 {
    let Some((ratio, output)) = ratio_and_output(nodes, id) else { return torque };
    let node = &mut nodes[id.index()];
    let own = node.inertia();

    if is_neutral_ratio(ratio) {
        node.state.output_torque = 0.0;
        node.state.output_inertia = own;
        node::forward_step(nodes, output, 0.0, own, ctx);
        return torque;
    }

    let output_torque = torque * ratio * node.torque_factor();
    let output_inertia = (inertia_sum + own) * ratio * ratio;
    node.state.output_torque = output_torque;
    node.state.output_inertia = output_inertia;

    let returned = node::forward_step(nodes, output, output_torque, output_inertia, ctx);
    returned / ratio
}
