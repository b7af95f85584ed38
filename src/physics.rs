// ==============================================================================
// physics.rs — RAPIER WORLD + RAYCAST WHEELS DRIVEN BY THE POWERTRAIN
// ------------------------------------------------------------------------------
// Per tick, per vehicle:
//
//   1) raycast suspension: spring + damper impulse at each contact, contact
//      velocity split along the steered wheel heading / side
//   2) powertrain step: source torque through clutch, gearbox, diffs into the
//      wheels; ARB forces come back as chassis forces
//   3) tire impulses: longitudinal force from each wheel's own step, lateral
//      grip inside what is left of the friction circle
//   4) rapier step
//
// The wheel state a `RaycastWheel` exposes to the powertrain is shared with
// this module through `SharedWheel`: the suspension pass writes contact data,
// the powertrain writes torques and steering, `WheelContact::integrate`
// produces the tire force applied here.
//
// Chassis space: forward = -Z, right = +X, up = +Y.
// ==============================================================================

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use rapier3d::prelude::*;

use driveline::powertrain::autoconfig::sedan_mounts;
use driveline::powertrain::{
    ChassisState, ControlInput, FlatTorqueConfig, FlatTorqueSource, PowerSource, Powertrain, PowertrainConfig,
    PowertrainError, TransmissionEvent, ValidationLimits, WheelSim,
};

const GROUP_GROUND: Group  = Group::from_bits_truncate(0b0001);
const GROUP_CHASSIS: Group = Group::from_bits_truncate(0b0010);

const GRAVITY: f32 = 9.81;                  // m/s²
const TIRE_MU: f32 = 1.0;                   // flat friction coefficient, demo only
const MAX_NORMAL_FORCE: f32 = 25_000.0;     // N

// GT86-ish body
const CHASSIS_MASS: f32 = 1350.0;           // kg
const CHASSIS_HALF_EXTENTS: [f32; 3] = [0.9, 0.35, 2.1];
const CHASSIS_COM_OFFSET: [f32; 3] = [0.0, -0.15, 0.0];
const LINEAR_DAMPING: f32 = 0.08;
const ANGULAR_DAMPING: f32 = 0.6;
const SPAWN_HEIGHT: f32 = 1.3;

// Wheels + suspension
const WHEEL_RADIUS: f32 = 0.33;             // m
const WHEEL_MASS: f32 = 20.0;               // kg
const MOUNT_HEIGHT: f32 = -0.3;             // m below chassis origin
const REST_LENGTH: f32 = 0.35;              // m
const MAX_TRAVEL: f32 = 0.3;                // m
const STATIC_SAG: f32 = 0.05;               // m
const DAMPING_RATIO: f32 = 0.9;

// ============================================
// Shared wheel state
// ============================================

#[derive(Debug, Clone)]
pub struct WheelContact {
    // --- geometry ---
    pub mount: Point<Real>,         // chassis space
    pub radius: f32,
    pub mass: f32,

    // --- suspension pass ---
    pub grounded: bool,
    pub compression: f32,
    pub contact_point: Point<Real>,
    pub up: Vector<Real>,
    pub heading: Vector<Real>,      // world, steered
    pub side: Vector<Real>,         // world, right of heading
    pub normal_force: f32,          // N
    pub forward_speed: f32,         // m/s along heading
    pub lateral_speed: f32,         // m/s along side

    // --- powertrain ---
    pub steer_angle: f32,           // deg, positive = right
    pub camber: f32,                // deg
    pub motor_torque: f32,          // N·m
    pub brake_torque: f32,          // N·m
    pub inertia: f32,               // kg·m²
    pub auto_simulate: bool,

    // --- integration ---
    pub angular_velocity: f32,      // rad/s, positive rolls forward
    pub counter_torque: f32,        // N·m
    pub longitudinal_force: f32,    // N along heading
    pub slip_ratio: f32,
    pub slip_angle: f32,            // deg
    pub asleep: bool,
}

pub type SharedWheel = Arc<Mutex<WheelContact>>;

fn lock(wheel: &SharedWheel) -> MutexGuard<'_, WheelContact> {
    wheel.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl WheelContact {
    pub fn new(mount: Point<Real>, radius: f32, mass: f32) -> Self {
        Self {
            mount,
            radius,
            mass,
            grounded: false,
            compression: 0.0,
            contact_point: mount,
            up: vector![0.0, 1.0, 0.0],
            heading: vector![0.0, 0.0, -1.0],
            side: vector![1.0, 0.0, 0.0],
            normal_force: 0.0,
            forward_speed: 0.0,
            lateral_speed: 0.0,
            steer_angle: 0.0,
            camber: 0.0,
            motor_torque: 0.0,
            brake_torque: 0.0,
            inertia: 0.5 * mass * radius * radius,
            auto_simulate: true,
            angular_velocity: 0.0,
            counter_torque: 0.0,
            longitudinal_force: 0.0,
            slip_ratio: 0.0,
            slip_angle: 0.0,
            asleep: false,
        }
    }

    /// One explicit wheel step. The ground force is whatever would make the
    /// contact roll without slip this step, capped by friction; brakes only
    /// ever slow the wheel down.
    pub fn integrate(&mut self, dt: f32) {
        let dt = dt.max(1e-6);
        let r = self.radius.max(0.05);
        let inertia = self.inertia.max(1e-3);

        let force = if self.grounded {
            let slip_speed = self.angular_velocity * r - self.forward_speed;
            let no_slip = self.motor_torque / r + slip_speed * inertia / (r * r * dt);
            let limit = TIRE_MU * self.normal_force;
            no_slip.clamp(-limit, limit)
        } else {
            0.0
        };

        let w = self.angular_velocity + (self.motor_torque - force * r) / inertia * dt;
        let brake_dw = self.brake_torque.max(0.0) / inertia * dt;
        let braked = if w.abs() <= brake_dw { 0.0 } else { w - brake_dw * w.signum() };
        let brake_torque = (w - braked) * inertia / dt;

        self.angular_velocity = if braked.is_finite() { braked } else { 0.0 };
        self.longitudinal_force = force;
        self.counter_torque = force * r + brake_torque;
        self.slip_ratio = (self.angular_velocity * r - self.forward_speed) / self.forward_speed.abs().max(1.0);
    }
}

/// `WheelSim` over a raycast wheel owned by the physics world.
pub struct RaycastWheel {
    shared: SharedWheel,
}

impl RaycastWheel {
    pub fn new(shared: SharedWheel) -> Self {
        Self { shared }
    }
}

impl WheelSim for RaycastWheel {
    fn set_motor_torque(&mut self, torque: f32) { lock(&self.shared).motor_torque = torque; }
    fn brake_torque(&self) -> f32 { lock(&self.shared).brake_torque }
    fn set_brake_torque(&mut self, torque: f32) { lock(&self.shared).brake_torque = torque; }
    fn set_inertia(&mut self, inertia: f32) { lock(&self.shared).inertia = inertia; }
    fn set_auto_simulate(&mut self, enabled: bool) { lock(&self.shared).auto_simulate = enabled; }
    fn step(&mut self, dt: f32) { lock(&self.shared).integrate(dt); }

    fn angular_velocity(&self) -> f32 { lock(&self.shared).angular_velocity }
    fn counter_torque(&self) -> f32 { lock(&self.shared).counter_torque }
    fn radius(&self) -> f32 { lock(&self.shared).radius }
    fn mass(&self) -> f32 { lock(&self.shared).mass }

    fn is_grounded(&self) -> bool { lock(&self.shared).grounded }
    fn suspension_compression(&self) -> f32 { lock(&self.shared).compression }
    fn contact_point(&self) -> Point<Real> { lock(&self.shared).contact_point }
    fn suspension_up(&self) -> Vector<Real> { lock(&self.shared).up }
    fn local_position(&self) -> Point<Real> { lock(&self.shared).mount }

    fn camber(&self) -> f32 { lock(&self.shared).camber }
    fn set_camber(&mut self, degrees: f32) { lock(&self.shared).camber = degrees; }
    fn steer_angle(&self) -> f32 { lock(&self.shared).steer_angle }
    fn set_steer_angle(&mut self, degrees: f32) { lock(&self.shared).steer_angle = degrees; }

    fn longitudinal_slip(&self) -> f32 { lock(&self.shared).slip_ratio }
    fn lateral_slip(&self) -> f32 { lock(&self.shared).slip_angle }

    fn is_asleep(&self) -> bool { lock(&self.shared).asleep }
    fn wake(&mut self) { lock(&self.shared).asleep = false; }
}

// ============================================
// Vehicle
// ============================================

pub struct WheelRig {
    pub name: String,
    pub shared: SharedWheel,
    pub stiffness: f32,     // N/m
    pub damping: f32,       // N·s/m
}

pub struct Vehicle {
    pub id: String,
    pub body: RigidBodyHandle,
    pub powertrain: Powertrain,
    pub source: FlatTorqueSource,
    pub input: ControlInput,
    pub wheels: Vec<WheelRig>,
    pub speed: f32,         // m/s along chassis forward
}

fn suspension_from_sag(vehicle_mass: f32, wheels: usize, sag_m: f32, zeta: f32) -> (f32, f32) {
    let m = vehicle_mass / wheels.max(1) as f32;
    let k = m * GRAVITY / sag_m.max(1e-3); // N/m
    let c = 2.0 * zeta * (k * m).sqrt();   // c = 2ζ√(km)
    (k, c)
}

pub struct PhysicsWorld {
    pub gravity: Vector<Real>,
    pub pipeline: PhysicsPipeline,
    pub island_manager: IslandManager,
    pub broad_phase: DefaultBroadPhase,
    pub narrow_phase: NarrowPhase,
    pub bodies: RigidBodySet,
    pub colliders: ColliderSet,
    pub joints: ImpulseJointSet,
    pub multibody_joints: MultibodyJointSet,
    pub ccd: CCDSolver,
    pub query_pipeline: QueryPipeline,
    pub vehicles: HashMap<String, Vehicle>, // player id → vehicle
}

impl PhysicsWorld {
    pub fn new() -> Self {
        let mut bodies = RigidBodySet::new();
        let mut colliders = ColliderSet::new();

        // === Static ground, top surface at y = 0 ===
        let ground_handle = bodies.insert(RigidBodyBuilder::fixed().translation(vector![0.0, -1.0, 0.0]).build());
        let ground_collider = ColliderBuilder::cuboid(500.0, 1.0, 500.0)
            .collision_groups(InteractionGroups::new(GROUP_GROUND, GROUP_CHASSIS))
            .friction(1.2)
            .restitution(0.0)
            .build();
        colliders.insert_with_parent(ground_collider, ground_handle, &mut bodies);

        println!("🌎 Ground inserted. Bodies = {}, Colliders = {}", bodies.len(), colliders.len());

        Self {
            gravity: vector![0.0, -GRAVITY, 0.0],
            pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies,
            colliders,
            joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            vehicles: HashMap::new(),
        }
    }

    /// Builds the wheels, binds them to `config` by wheel name, then inserts
    /// the chassis. Nothing is inserted if the powertrain fails to load.
    pub fn spawn_vehicle(&mut self, id: &str, position: [f32; 3], config: &PowertrainConfig) -> Result<(), PowertrainError> {
        let mounts = sedan_mounts();
        let (stiffness, damping) = suspension_from_sag(CHASSIS_MASS, mounts.len(), STATIC_SAG, DAMPING_RATIO);

        let wheels: Vec<WheelRig> = mounts
            .iter()
            .map(|m| {
                let mount = point![m.position.x, m.position.y + MOUNT_HEIGHT, m.position.z];
                WheelRig {
                    name: m.name.clone(),
                    shared: Arc::new(Mutex::new(WheelContact::new(mount, WHEEL_RADIUS, WHEEL_MASS))),
                    stiffness,
                    damping,
                }
            })
            .collect();

        let powertrain = Powertrain::from_config(config, &mut |name: &str| -> Option<Box<dyn WheelSim>> {
            let rig = wheels.iter().find(|w| w.name == name)?;
            Some(Box::new(RaycastWheel::new(Arc::clone(&rig.shared))))
        })?;

        let source = FlatTorqueSource::new(FlatTorqueConfig::default());
        for warning in powertrain.validate(ValidationLimits::from(&source.state())) {
            println!("⚠️ Vehicle {}: {}", id, warning);
        }

        // --- chassis body ---
        let [hx, hy, hz] = CHASSIS_HALF_EXTENTS;
        let [cx, cy, cz] = CHASSIS_COM_OFFSET;
        let density = CHASSIS_MASS / (8.0 * hx * hy * hz); // ρ = m / V

        let rb = RigidBodyBuilder::dynamic()
            .translation(vector![position[0], SPAWN_HEIGHT, position[2]])
            .linear_damping(LINEAR_DAMPING)
            .angular_damping(ANGULAR_DAMPING)
            .ccd_enabled(true)
            .build();
        let collider = ColliderBuilder::cuboid(hx, hy, hz)
            .translation(vector![cx, cy, cz])
            .collision_groups(InteractionGroups::new(GROUP_CHASSIS, GROUP_GROUND))
            .density(density)
            .friction(0.0)
            .restitution(0.0)
            .build();

        let body = self.bodies.insert(rb);
        self.colliders.insert_with_parent(collider, body, &mut self.bodies);

        self.vehicles.insert(
            id.to_string(),
            Vehicle {
                id: id.to_string(),
                body,
                powertrain,
                source,
                input: ControlInput::default(),
                wheels,
                speed: 0.0,
            },
        );

        println!("🚗 Spawned vehicle for player {} at {:?} (body = {:?})", id, position, body);
        Ok(())
    }

    pub fn remove_vehicle(&mut self, id: &str) {
        let Some(vehicle) = self.vehicles.remove(id) else { return };
        self.bodies.remove(
            vehicle.body,
            &mut self.island_manager,
            &mut self.colliders,
            &mut self.joints,
            &mut self.multibody_joints,
            true,
        );
    }

    pub fn vehicle_mut(&mut self, id: &str) -> Option<&mut Vehicle> {
        self.vehicles.get_mut(id)
    }

    /// World position and rotation quaternion (i, j, k, w) of a chassis.
    pub fn pose(&self, vehicle: &Vehicle) -> Option<([f32; 3], [f32; 4])> {
        let iso = self.bodies.get(vehicle.body)?.position();
        let t = iso.translation.vector;
        let q = iso.rotation;
        Some(([t.x, t.y, t.z], [q.i, q.j, q.k, q.w]))
    }

    pub fn step(&mut self, dt: Real) {
        self.query_pipeline.update(&self.colliders);
        let mut impulses: Vec<(RigidBodyHandle, Vector<Real>, Point<Real>)> = Vec::new();

        for vehicle in self.vehicles.values_mut() {
            let Some(body) = self.bodies.get(vehicle.body) else { continue };

            let pos = *body.position();
            let linvel = *body.linvel();
            let angvel = *body.angvel();
            let com = *body.center_of_mass();
            let mass = body.mass();
            let forward = pos.rotation * vector![0.0, 0.0, -1.0];
            let up = pos.rotation * vector![0.0, 1.0, 0.0];
            let filter = QueryFilter::default().exclude_rigid_body(vehicle.body);
            vehicle.speed = linvel.dot(&forward);

            // ------------------------------------------------------------------
            // 1) Raycast suspension
            // ------------------------------------------------------------------
            for rig in &vehicle.wheels {
                let mut w = lock(&rig.shared);
                let origin = pos * w.mount;
                let ray = Ray::new(origin, -up);
                let max_toi = REST_LENGTH + MAX_TRAVEL + w.radius;

                let steer = w.steer_angle.to_radians();
                w.up = up;
                w.heading = pos.rotation * vector![steer.sin(), 0.0, -steer.cos()];
                w.side = pos.rotation * vector![steer.cos(), 0.0, steer.sin()];

                let hit = self.query_pipeline.cast_ray(&self.bodies, &self.colliders, &ray, max_toi, true, filter);
                let Some((_, toi)) = hit else {
                    w.grounded = false;
                    w.compression = 0.0;
                    w.normal_force = 0.0;
                    w.contact_point = origin - up * max_toi;
                    continue;
                };

                let hit_point = origin - up * toi;
                let length = (toi - w.radius).max(0.0);
                let compression = (REST_LENGTH - length).clamp(0.0, MAX_TRAVEL);

                let point_vel = linvel + angvel.cross(&(hit_point.coords - com.coords));
                let v_n = point_vel.dot(&up);
                let normal = (rig.stiffness * compression - rig.damping * v_n).clamp(0.0, MAX_NORMAL_FORCE);

                w.grounded = compression > 0.0;
                w.compression = compression;
                w.contact_point = hit_point;
                w.normal_force = if w.grounded { normal } else { 0.0 };
                w.forward_speed = point_vel.dot(&w.heading);
                w.lateral_speed = point_vel.dot(&w.side);

                if w.normal_force > 0.0 {
                    impulses.push((vehicle.body, up * (w.normal_force * dt), hit_point));
                }
            }

            // ------------------------------------------------------------------
            // 2) Powertrain
            // ------------------------------------------------------------------
            let chassis = ChassisState { speed: vehicle.speed, incline: forward.y };
            let report = vehicle.powertrain.step(&mut vehicle.source, &mut vehicle.input, chassis, dt);

            for f in &report.chassis_forces {
                impulses.push((vehicle.body, f.force * dt, f.point));
            }
            for e in &report.events {
                match e.event {
                    TransmissionEvent::Shift { from, to } => println!("⚙️ {} shifted {} → {}", vehicle.id, from, to),
                    TransmissionEvent::TriedToShiftWithoutClutch => {
                        println!("⚠️ {} tried to shift without the clutch", vehicle.id)
                    }
                    _ => {}
                }
            }

            // ------------------------------------------------------------------
            // 3) Tire impulses
            // ------------------------------------------------------------------
            let mass_share = mass / vehicle.wheels.len().max(1) as f32;
            for rig in &vehicle.wheels {
                let mut w = lock(&rig.shared);
                if w.auto_simulate {
                    w.motor_torque = 0.0;
                    w.integrate(dt);
                }
                if !w.grounded {
                    continue;
                }

                let grip = TIRE_MU * w.normal_force;
                let lateral_limit = (grip * grip - w.longitudinal_force * w.longitudinal_force).max(0.0).sqrt();
                let lateral = (-w.lateral_speed * mass_share / dt).clamp(-lateral_limit, lateral_limit);
                w.slip_angle = w.lateral_speed.atan2(w.forward_speed.abs().max(0.5)).to_degrees();

                let force = w.heading * w.longitudinal_force + w.side * lateral;
                impulses.push((vehicle.body, force * dt, w.contact_point));
            }
        }

        for (handle, impulse, point) in impulses {
            if let Some(body) = self.bodies.get_mut(handle) {
                body.apply_impulse_at_point(impulse, point, true);
            }
        }

        self.pipeline.step(
            &self.gravity,
            &IntegrationParameters { dt, ..IntegrationParameters::default() },
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.joints,
            &mut self.multibody_joints,
            &mut self.ccd,
            Some(&mut self.query_pipeline),
            &(),
            &(),
        );

        // Safety: keep bodies from exploding to insane coordinates
        for (_, body) in self.bodies.iter_mut() {
            let pos = *body.translation();
            let bad = !pos.x.is_finite() || !pos.y.is_finite() || !pos.z.is_finite() || pos.abs().max() > 1_000.0;
            if bad {
                body.set_translation(vector![0.0, SPAWN_HEIGHT, 0.0], true);
                body.set_linvel(vector![0.0, 0.0, 0.0], true);
                body.set_angvel(vector![0.0, 0.0, 0.0], true);
                println!("⚠️ Reset exploding body back to spawn height");
            }
        }
    }
}
