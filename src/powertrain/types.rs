//! Core shared types for the driveline solver (engine-agnostic).
// powertrain/types.rs
use std::f32::consts::PI;
use std::fmt;

use serde::{Deserialize, Serialize};

// ----- solver constants (calibration, not physical law) -----
pub const MIN_INERTIA: f32 = 1e-4;            // kg·m², floor for every node
pub const NEUTRAL_RATIO_EPSILON: f32 = 1e-4;  // |ratio| below this is neutral
pub const REFERENCE_DT: f32 = 1.0 / 100.0;    // s, tick the wheel inertia is tuned for

const RAD_TO_RPM: f32 = 60.0 / (2.0 * PI);

#[inline] pub fn rad_to_rpm(w: f32) -> f32 { w * RAD_TO_RPM }
#[inline] pub fn rpm_to_rad(rpm: f32) -> f32 { rpm / RAD_TO_RPM }
#[inline] pub fn lerp(a: f32, b: f32, t: f32) -> f32 { a + (b - a) * t.clamp(0.0, 1.0) }

/// Floors a denominator to ±1 so RPM/power conversions never blow up.
#[inline]
pub fn safe_divisor(x: f32) -> f32 {
    if x.abs() >= 1.0 {
        x
    } else if x < 0.0 {
        -1.0
    } else {
        1.0
    }
}

#[inline]
pub fn is_neutral_ratio(ratio: f32) -> bool {
    ratio.abs() < NEUTRAL_RATIO_EPSILON
}

// ============================================
// Node identification
// ============================================

/// Index of a node inside one powertrain's arena.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// Stable 32-bit FNV-1a hash of a node name; the persisted form of an edge.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NameHash(pub u32);

impl NameHash {
    const FNV_OFFSET: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;

    pub const fn of(name: &str) -> Self {
        let bytes = name.as_bytes();
        let mut hash = Self::FNV_OFFSET;
        let mut i = 0;
        while i < bytes.len() {
            hash ^= bytes[i] as u32;
            hash = hash.wrapping_mul(Self::FNV_PRIME);
            i += 1;
        }
        NameHash(hash)
    }
}

impl fmt::Display for NameHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:08x}", self.0)
    }
}

// ============================================
// ----- per-tick inputs ----------------------
// ============================================

/// Driver controls for one tick. The discrete shift flags are consumed by the
/// powertrain and cleared after the tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlInput {
    pub throttle: f32,          // 0..1
    pub brake: f32,             // 0..1
    pub clutch: f32,            // 0..1 pedal (1 = fully pressed = disengaged)
    pub handbrake: f32,         // 0..1
    pub steer: f32,             // -1..1

    pub shift_up: bool,
    pub shift_down: bool,
    pub shift_into: Option<i32>,
}

impl ControlInput {
    pub fn clamped(mut self) -> Self {
        self.throttle = self.throttle.clamp(0.0, 1.0);
        self.brake = self.brake.clamp(0.0, 1.0);
        self.clutch = self.clutch.clamp(0.0, 1.0);
        self.handbrake = self.handbrake.clamp(0.0, 1.0);
        self.steer = self.steer.clamp(-1.0, 1.0);
        self
    }

    pub fn clear_discrete(&mut self) {
        self.shift_up = false;
        self.shift_down = false;
        self.shift_into = None;
    }

    pub fn has_shift_request(&self) -> bool {
        self.shift_up || self.shift_down || self.shift_into.is_some()
    }

    /// Takes the axes of `newer`, keeps shift requests not yet consumed.
    pub fn merge(&mut self, newer: ControlInput) {
        let pending = (self.shift_up, self.shift_down, self.shift_into);
        *self = newer;
        self.shift_up |= pending.0;
        self.shift_down |= pending.1;
        self.shift_into = self.shift_into.or(pending.2);
    }
}

/// What the solver needs to know about the chassis it is bolted to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChassisState {
    pub speed: f32,     // m/s, signed along chassis forward
    pub incline: f32,   // dot(forward, world up), -1..1
}

/// Snapshot of the power source taken at the start of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SourceState {
    pub angular_velocity: f32,  // rad/s
    pub idle_rpm: f32,
    pub rev_limiter_rpm: f32,
    pub throttle: f32,          // 0..1, after input swapping
    pub inertia: f32,           // kg·m²
    pub running: bool,
    pub rev_limiter_active: bool,
}

impl Default for SourceState {
    fn default() -> Self {
        Self {
            angular_velocity: 0.0,
            idle_rpm: 800.0,
            rev_limiter_rpm: 6500.0,
            throttle: 0.0,
            inertia: 0.2,
            running: true,
            rev_limiter_active: false,
        }
    }
}

impl SourceState {
    pub fn rpm(&self) -> f32 {
        rad_to_rpm(self.angular_velocity)
    }

    pub fn rpm_percent(&self) -> f32 {
        (self.rpm() / safe_divisor(self.rev_limiter_rpm)).clamp(0.0, 1.0)
    }
}

/// Everything a node may read during one tick. Built once by the orchestrator.
#[derive(Debug, Clone, Copy)]
pub struct TickContext {
    pub dt: f32,
    pub input: ControlInput,
    pub chassis: ChassisState,
    pub source: SourceState,
    pub reverse_swapped: bool,  // throttle and brake already swapped for reverse
}

impl TickContext {
    pub fn new(dt: f32, input: ControlInput, chassis: ChassisState, source: SourceState) -> Self {
        Self { dt: dt.max(1e-6), input: input.clamped(), chassis, source, reverse_swapped: false }
    }
}
