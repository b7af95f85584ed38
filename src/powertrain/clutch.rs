// ==============================================================================
// clutch.rs — FRICTION COUPLING BETWEEN SOURCE AND DRIVELINE
// ------------------------------------------------------------------------------
// Couples two inertial bodies (source side / driveline side) by an engagement
// fraction E = curve(clutch_input):
//
// - inertia: half of the clutch sits on each plate; the driveline side is
//   reflected through E
// - torque: what crosses the plates is capped at slip_torque * E
// - velocity: the source sees E * (driveline velocity) + (1 - E) * (its own),
//   which is what lets a slipping clutch show an engine RPM that differs from
//   the wheel-referred RPM
// - creep: below creep_speed_limit a small torque is always passed, like a
//   torque converter dragging the output
//
// Control modes:
// - Automatic: engagement from an RPM band (raised with throttle), cosine
//   profile during a gear change, locked at cruising speed, opened when the
//   coupled driveline would drag the source below idle
// - UserInput: mirrors the clutch pedal (pedal down = open)
// - Manual: left alone; something else drives `clutch_input`
// ==============================================================================

use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

use crate::powertrain::curve::EngagementCurve;
use crate::powertrain::node::{self, Node};
use crate::powertrain::types::{NodeId, TickContext, safe_divisor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClutchMode {
    #[default]
    Automatic,
    UserInput,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClutchConfig {
    pub mode: ClutchMode,
    pub engagement_curve: EngagementCurve,
    pub slip_torque: f32,                   // N·m
    pub creep_torque: f32,                  // N·m
    pub creep_speed_limit: f32,             // m/s

    // --- automatic mode (tuned, not derived) ---
    pub engagement_rpm: f32,                // rpm where the clutch starts to bite
    pub engagement_range: f32,              // rpm from open to closed
    pub throttle_engagement_offset: f32,    // rpm added to the bite point at full throttle
    pub lock_speed: f32,                    // m/s above which the clutch locks
    pub lock_rpm_margin: f32,               // rpm above idle required to lock
    pub stall_rpm_margin: f32,              // rpm above idle still treated as stalling
}

impl Default for ClutchConfig {
    fn default() -> Self {
        Self {
            mode: ClutchMode::Automatic,
            engagement_curve: EngagementCurve::default(),
            slip_torque: 500.0,
            creep_torque: 0.0,
            creep_speed_limit: 1.5,
            engagement_rpm: 1200.0,
            engagement_range: 600.0,
            throttle_engagement_offset: 800.0,
            lock_speed: 3.0,
            lock_rpm_margin: 400.0,
            stall_rpm_margin: 50.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Clutch {
    pub config: ClutchConfig,
    clutch_input: f32,      // 0 = open
    engagement: f32,        // curve(clutch_input)
    slip_overflow: f32,     // N·m pushed back last tick without crossing the plates
    slipping: bool,
}

impl Clutch {
    pub fn new(config: ClutchConfig) -> Self {
        let engagement = config.engagement_curve.evaluate(0.0);
        Self {
            config,
            clutch_input: 0.0,
            engagement,
            slip_overflow: 0.0,
            slipping: false,
        }
    }

    pub fn clutch_input(&self) -> f32 { self.clutch_input }
    pub fn engagement(&self) -> f32 { self.engagement }
    pub fn slip_overflow(&self) -> f32 { self.slip_overflow }
    pub fn is_slipping(&self) -> bool { self.slipping }

    /// Drives the actuation directly. This is how `Manual` mode is operated.
    pub fn set_clutch_input(&mut self, input: f32) {
        self.clutch_input = if input.is_finite() { input.clamp(0.0, 1.0) } else { 0.0 };
        self.engagement = self.config.engagement_curve.evaluate(self.clutch_input);
    }

    /// Per-tick control update. Runs after the velocity query pass so
    /// `coupled_rpm` reflects what the driveline currently wants to spin at.
    pub fn update_control(&mut self, ctx: &TickContext, shift_progress: Option<f32>, coupled_rpm: f32) {
        match self.config.mode {
            ClutchMode::Manual => {}
            ClutchMode::UserInput => self.set_clutch_input(1.0 - ctx.input.clutch),
            ClutchMode::Automatic => {
                let input = self.automatic_input(ctx, shift_progress, coupled_rpm);
                self.set_clutch_input(input);
            }
        }
    }

    fn automatic_input(&self, ctx: &TickContext, shift_progress: Option<f32>, coupled_rpm: f32) -> f32 {
        let source = &ctx.source;
        if !source.running {
            return 0.0;
        }

        // Open at the gear change (midpoint), closed at both ends.
        if let Some(progress) = shift_progress {
            return 0.5 + 0.5 * (2.0 * PI * progress.clamp(0.0, 1.0)).cos();
        }

        let cfg = &self.config;
        let rpm = source.rpm();
        let bite_rpm = cfg.engagement_rpm + source.throttle * cfg.throttle_engagement_offset;
        let mut input = ((rpm - bite_rpm) / safe_divisor(cfg.engagement_range)).clamp(0.0, 1.0);

        // Stall protection
        if coupled_rpm < source.idle_rpm && rpm < source.idle_rpm + cfg.stall_rpm_margin {
            input = 0.0;
        }

        // No nuisance disengagement while cruising
        if ctx.chassis.speed.abs() > cfg.lock_speed && rpm > source.idle_rpm + cfg.lock_rpm_margin {
            input = 1.0;
        }

        input
    }

    fn apply_creep(&self, torque: f32, ctx: &TickContext) -> f32 {
        let creep = self.config.creep_torque.max(0.0);
        if creep <= 0.0 || !ctx.source.running {
            return torque;
        }
        if ctx.chassis.speed.abs() < self.config.creep_speed_limit && torque.abs() < creep {
            return creep;
        }
        torque
    }
}

// ==============================================================================
// Solver operations
// ==============================================================================

pub(crate) fn query_angular_velocity(nodes: &mut [Node], id: NodeId, angular_velocity: f32, dt: f32) -> f32 {
    let node = &nodes[id.index()];
    let (Some(output), Some(clutch)) = (node.output(), node.as_clutch()) else {
        return angular_velocity;
    };
    let engagement = clutch.engagement;

    let downstream = node::query_angular_velocity(nodes, output, angular_velocity * engagement, dt);
    nodes[id.index()].state.output_angular_velocity = downstream;

    downstream * engagement + angular_velocity * (1.0 - engagement)
}

pub(crate) fn query_inertia(nodes: &mut [Node], id: NodeId) -> f32 {
    let node = &nodes[id.index()];
    let half = node.inertia() * 0.5;
    let (Some(output), Some(clutch)) = (node.output(), node.as_clutch()) else {
        return node.inertia();
    };
    let engagement = clutch.engagement;

    half + (half + node::query_inertia(nodes, output)) * engagement
}

pub(crate) fn forward_step(nodes: &mut [Node], id: NodeId, torque: f32, inertia_sum: f32, ctx: &TickContext) -> f32 {
    let node = &mut nodes[id.index()];
    let half = node.inertia() * 0.5;
    let torque_factor = node.torque_factor();
    let Some(output) = node.output() else { return torque };
    let Some(clutch) = node.as_clutch_mut() else { return torque };

    // 1) engagement from the curve
    let engagement = clutch.config.engagement_curve.evaluate(clutch.clutch_input);
    clutch.engagement = engagement;

    // 2) reflected inertia, half on each plate
    let output_inertia = (inertia_sum + half) * engagement + half;

    // 3) what can cross the plates
    let slip_torque = clutch.config.slip_torque.max(0.0) * torque_factor;
    let capacity = slip_torque * engagement;
    let clamped = torque.clamp(-capacity, capacity);
    let untransmitted = torque - clamped;
    clutch.slipping = untransmitted.abs() > 1e-4;

    // 4) creep
    let output_torque = clutch.apply_creep(clamped, ctx);

    node.state.output_torque = output_torque;
    node.state.output_inertia = output_inertia;

    // 5) recurse, then bring the reaction back across the plates
    let returned = node::forward_step(nodes, output, output_torque, output_inertia, ctx);
    let transmitted = (returned * engagement).clamp(-slip_torque, slip_torque);

    // Torque that never crossed still loads the input side, within capacity.
    let headroom = (slip_torque - transmitted.abs()).max(0.0);
    let overflow = (untransmitted * engagement).clamp(-headroom, headroom);

    if let Some(clutch) = nodes[id.index()].as_clutch_mut() {
        clutch.slip_overflow = overflow;
    }

    transmitted + overflow
}
