//! driveline - torque/velocity/inertia solver for vehicle drivelines, plus the
//! pieces a host needs around it: config persistence, auto layout, telemetry.

pub mod powertrain;
