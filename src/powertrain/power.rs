// ==============================================================================
// power.rs — POWER SOURCE BOUNDARY
// ------------------------------------------------------------------------------
// The driveline does not model an engine. Whatever turns the root node
// implements `PowerSource`:
//
//   state()                       snapshot read at the start of the tick
//   drive_torque(throttle, dt)    torque to push into the root
//   integrate(drive, reaction)    advance own spin with the root's reaction
//   set_angular_velocity(w)       sync to what the coupled driveline allows
//
// External modules (traction control, speed limiter, boost, ...) scale the
// source through `PowerModifiers`: every modifier is a factor, the product is
// clamped to >= 0.
//
// `FlatTorqueSource` is the reference source used by the server and tests:
// constant torque * throttle, idle hold, rev limiter cut, friction.
// ==============================================================================

use serde::{Deserialize, Serialize};

use crate::powertrain::types::{SourceState, rad_to_rpm, rpm_to_rad};

pub trait PowerSource: Send {
    fn state(&self) -> SourceState;
    fn drive_torque(&mut self, throttle: f32, dt: f32) -> f32;
    fn integrate(&mut self, drive: f32, reaction: f32, dt: f32);
    fn set_angular_velocity(&mut self, angular_velocity: f32);
}

// ============================================
// Modifiers
// ============================================

pub type Modifier = Box<dyn Fn(&SourceState) -> f32 + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModifierId(u32);

#[derive(Default)]
pub struct PowerModifiers {
    next_id: u32,
    entries: Vec<(ModifierId, Modifier)>,
}

impl PowerModifiers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, modifier: impl Fn(&SourceState) -> f32 + Send + Sync + 'static) -> ModifierId {
        let id = ModifierId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.entries.push((id, Box::new(modifier)));
        id
    }

    /// Returns false if the id was already gone.
    pub fn remove(&mut self, id: ModifierId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn evaluate(&self, state: &SourceState) -> f32 {
        let product = self.entries.iter().fold(1.0f32, |acc, (_, m)| acc * m(state));
        if product.is_finite() { product.max(0.0) } else { 0.0 }
    }
}

impl std::fmt::Debug for PowerModifiers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerModifiers").field("count", &self.entries.len()).finish()
    }
}

// ============================================
// Reference source
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlatTorqueConfig {
    pub max_torque: f32,        // N·m at full throttle
    pub idle_rpm: f32,
    pub rev_limiter_rpm: f32,
    pub inertia: f32,           // kg·m²
    pub friction_torque: f32,   // N·m at the rev limiter
    pub idle_rpm_band: f32,     // rpm below idle over which the idle hold ramps to full
}

impl Default for FlatTorqueConfig {
    fn default() -> Self {
        Self {
            max_torque: 250.0,
            idle_rpm: 800.0,
            rev_limiter_rpm: 6500.0,
            inertia: 0.2,
            friction_torque: 30.0,
            idle_rpm_band: 200.0,
        }
    }
}

#[derive(Debug)]
pub struct FlatTorqueSource {
    pub config: FlatTorqueConfig,
    pub modifiers: PowerModifiers,
    angular_velocity: f32,
    throttle: f32,
    running: bool,
    rev_limiter_active: bool,
}

impl FlatTorqueSource {
    pub fn new(config: FlatTorqueConfig) -> Self {
        let angular_velocity = rpm_to_rad(config.idle_rpm);
        Self {
            config,
            modifiers: PowerModifiers::new(),
            angular_velocity,
            throttle: 0.0,
            running: true,
            rev_limiter_active: false,
        }
    }

    pub fn rpm(&self) -> f32 {
        rad_to_rpm(self.angular_velocity)
    }

    pub fn start(&mut self) {
        self.running = true;
        self.angular_velocity = self.angular_velocity.max(rpm_to_rad(self.config.idle_rpm));
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.throttle = 0.0;
    }
}

impl PowerSource for FlatTorqueSource {
    fn state(&self) -> SourceState {
        SourceState {
            angular_velocity: self.angular_velocity,
            idle_rpm: self.config.idle_rpm,
            rev_limiter_rpm: self.config.rev_limiter_rpm,
            throttle: self.throttle,
            inertia: self.config.inertia,
            running: self.running,
            rev_limiter_active: self.rev_limiter_active,
        }
    }

    fn drive_torque(&mut self, throttle: f32, _dt: f32) -> f32 {
        if !self.running {
            return 0.0;
        }
        self.throttle = if throttle.is_finite() { throttle.clamp(0.0, 1.0) } else { 0.0 };

        let rpm = self.rpm();
        let limiter = self.config.rev_limiter_rpm;
        if rpm >= limiter {
            self.rev_limiter_active = true;
        } else if rpm < limiter * 0.97 {
            self.rev_limiter_active = false;
        }
        if self.rev_limiter_active {
            return 0.0;
        }

        // Idle hold: open the throttle just enough to stay at idle.
        let idle_deficit = (self.config.idle_rpm - rpm) / self.config.idle_rpm_band.max(1.0);
        let effective = self.throttle.max(idle_deficit.clamp(0.0, 1.0));

        self.config.max_torque * effective * self.modifiers.evaluate(&self.state())
    }

    fn integrate(&mut self, drive: f32, reaction: f32, dt: f32) {
        let rpm_percent = (self.rpm() / self.config.rev_limiter_rpm.max(1.0)).clamp(0.0, 1.0);
        let friction = self.config.friction_torque * (0.2 + 0.8 * rpm_percent) * self.angular_velocity.signum();

        let net = drive - reaction - friction;
        if net.is_finite() {
            self.angular_velocity += net / self.config.inertia.max(1e-3) * dt;
        }
        self.angular_velocity = self.angular_velocity.max(0.0);
    }

    fn set_angular_velocity(&mut self, angular_velocity: f32) {
        if angular_velocity.is_finite() {
            self.angular_velocity = angular_velocity.max(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn modifiers_multiply_and_clamp() {
        let mut m = PowerModifiers::new();
        assert_relative_eq!(m.evaluate(&SourceState::default()), 1.0);

        let half = m.add(|_| 0.5);
        m.add(|s| if s.rpm() > 5000.0 { 0.0 } else { 1.5 });
        assert_relative_eq!(m.evaluate(&SourceState::default()), 0.75);

        m.add(|_| -2.0);
        assert_relative_eq!(m.evaluate(&SourceState::default()), 0.0);

        assert!(m.remove(half));
        assert!(!m.remove(half));
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn full_throttle_gives_max_torque() {
        let mut e = FlatTorqueSource::new(FlatTorqueConfig::default());
        e.set_angular_velocity(rpm_to_rad(3000.0));
        assert_relative_eq!(e.drive_torque(1.0, 0.01), 250.0);
    }

    #[test]
    fn modifiers_scale_drive() {
        let mut e = FlatTorqueSource::new(FlatTorqueConfig::default());
        e.set_angular_velocity(rpm_to_rad(3000.0));
        e.modifiers.add(|_| 0.4);
        assert_relative_eq!(e.drive_torque(1.0, 0.01), 100.0, epsilon = 1e-4);
    }

    #[test]
    fn rev_limiter_cuts_with_hysteresis() {
        let mut e = FlatTorqueSource::new(FlatTorqueConfig::default());
        e.set_angular_velocity(rpm_to_rad(6600.0));
        assert_relative_eq!(e.drive_torque(1.0, 0.01), 0.0);
        assert!(e.state().rev_limiter_active);
        e.set_angular_velocity(rpm_to_rad(6450.0));
        assert_relative_eq!(e.drive_torque(1.0, 0.01), 0.0);
        e.set_angular_velocity(rpm_to_rad(6000.0));
        assert!(e.drive_torque(1.0, 0.01) > 0.0);
    }

    #[test]
    fn idle_hold_opens_throttle_below_idle() {
        let mut e = FlatTorqueSource::new(FlatTorqueConfig::default());
        e.set_angular_velocity(rpm_to_rad(700.0));
        assert_relative_eq!(e.drive_torque(0.0, 0.01), 125.0, epsilon = 0.5);
    }

    #[test]
    fn free_source_revs_up() {
        let mut e = FlatTorqueSource::new(FlatTorqueConfig::default());
        let before = e.rpm();
        let drive = e.drive_torque(1.0, 0.01);
        e.integrate(drive, 0.0, 0.01);
        assert!(e.rpm() > before);
    }

    #[test]
    fn stopped_source_produces_nothing() {
        let mut e = FlatTorqueSource::new(FlatTorqueConfig::default());
        e.stop();
        assert_relative_eq!(e.drive_torque(1.0, 0.01), 0.0);
        assert!(!e.state().running);
    }
}
