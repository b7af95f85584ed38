//! End-to-end runs of the public driveline API with scripted wheels.

use approx::assert_relative_eq;

use driveline::powertrain::test_utils::{ConstantSource, MockWheel, fixed_ratio_driveline, two_wheel_config};
use driveline::powertrain::{
    ChassisState, ControlInput, DriveLayout, NameHash, PowerSource, Powertrain, PowertrainConfig, PowertrainError,
    TransmissionEvent, WheelSim, auto_layout, sedan_mounts,
};

const DT: f32 = 0.01;

fn mock_wheels(name: &str) -> Option<Box<dyn WheelSim>> {
    let x = if name.ends_with('l') { -0.8 } else { 0.8 };
    let z = if name.starts_with('f') { -1.3 } else { 1.2 };
    Some(Box::new(MockWheel::free(0.33, 20.0).at(x, 0.0, z)))
}

fn cruising() -> ChassisState {
    ChassisState { speed: 10.0, ..Default::default() }
}

// ============================================
// Torque path
// ============================================

#[test]
fn first_gear_splits_source_torque_across_the_axle() {
    let (mut pt, ids) =
        fixed_ratio_driveline(500.0, 12.0, MockWheel::free(1.0, 2.0), MockWheel::free(1.0, 2.0)).unwrap();
    let mut source = ConstantSource::new(100.0);
    let mut input = ControlInput::default();

    let report = pt.step(&mut source, &mut input, ChassisState::default(), DT);

    let nodes = pt.nodes();
    assert_relative_eq!(report.drive_torque, 100.0);
    assert_relative_eq!(nodes[ids.clutch.index()].state.output_torque, 100.0);
    assert_relative_eq!(nodes[ids.transmission.index()].state.output_torque, 1200.0);
    assert_relative_eq!(nodes[ids.wheel_a.index()].state.input_torque, 600.0);
    assert_relative_eq!(nodes[ids.wheel_b.index()].state.input_torque, 600.0);

    // free wheels push nothing back
    assert_relative_eq!(report.reaction_torque, 0.0, epsilon = 1e-4);
}

#[test]
fn root_inertia_reflects_wheels_through_the_ratio() {
    let (mut pt, _) =
        fixed_ratio_driveline(500.0, 12.0, MockWheel::free(1.0, 2.0), MockWheel::free(1.0, 2.0)).unwrap();
    let report = pt.step(&mut ConstantSource::new(100.0), &mut ControlInput::default(), ChassisState::default(), DT);

    // clutch halves + transmission + (diff + 2 * 0.5 m r²) / 12²
    let expected = 0.05 + 0.05 + 0.05 + (0.05 + 2.0) / 144.0;
    assert_relative_eq!(report.root_inertia, expected, epsilon = 1e-5);
}

#[test]
fn source_is_pulled_to_the_wheel_speed_after_the_tick() {
    let (mut pt, ids) =
        fixed_ratio_driveline(500.0, 12.0, MockWheel::free(1.0, 2.0), MockWheel::free(1.0, 2.0)).unwrap();
    let mut source = ConstantSource::new(100.0);

    for _ in 0..5 {
        pt.step(&mut source, &mut ControlInput::default(), ChassisState::default(), DT);
    }

    let nodes = pt.nodes();
    let wa = nodes[ids.wheel_a.index()].as_wheel().unwrap().sim().angular_velocity();
    let wb = nodes[ids.wheel_b.index()].as_wheel().unwrap().sim().angular_velocity();
    assert!(wa > 0.0);
    assert_relative_eq!(source.state().angular_velocity, (wa + wb) * 0.5 * 12.0, epsilon = 1e-3);
}

#[test]
fn wheels_against_a_wall_load_the_source_up_to_clutch_capacity() {
    let (mut pt, _) =
        fixed_ratio_driveline(300.0, 1.0, MockWheel::locked(0.3, 20.0), MockWheel::locked(0.3, 20.0)).unwrap();
    let mut source = ConstantSource::new(1000.0);

    let report = pt.step(&mut source, &mut ControlInput::default(), ChassisState::default(), DT);
    assert_relative_eq!(report.reaction_torque, 300.0, epsilon = 1e-3);
    assert_relative_eq!(source.last_reaction, 300.0, epsilon = 1e-3);
}

#[test]
fn neutral_leaves_the_wheels_alone_and_the_source_unloaded() {
    let (mut pt, ids) =
        fixed_ratio_driveline(500.0, 12.0, MockWheel::free(1.0, 2.0), MockWheel::free(1.0, 2.0)).unwrap();
    pt.shift_into(ids.transmission, 0).unwrap();

    let report = pt.step(&mut ConstantSource::new(100.0), &mut ControlInput::default(), ChassisState::default(), DT);
    assert_eq!(pt.gear(), 0);
    assert_relative_eq!(pt.nodes()[ids.wheel_a.index()].state.input_torque, 0.0);
    assert_relative_eq!(report.reaction_torque, 100.0, epsilon = 1e-4);
}

// ============================================
// Configuration
// ============================================

#[test]
fn json_config_survives_a_load_save_cycle() {
    let json = two_wheel_config().to_json_pretty().unwrap();
    let parsed = PowertrainConfig::from_json(&json).unwrap();
    assert_eq!(parsed, two_wheel_config());

    let pt = Powertrain::from_config(&parsed, &mut mock_wheels).unwrap();
    assert_eq!(pt.to_config(), parsed);
}

#[test]
fn looping_config_is_refused() {
    let mut config = two_wheel_config();
    config.nodes[1].output = Some(NameHash::of("clutch"));

    let err = Powertrain::from_config(&config, &mut mock_wheels).unwrap_err();
    assert!(matches!(err, PowertrainError::Cycle(_)), "got {err:?}");
}

#[test]
fn every_generated_layout_loads_and_drives() {
    for layout in [DriveLayout::FrontWheelDrive, DriveLayout::RearWheelDrive, DriveLayout::AllWheelDrive] {
        let config = auto_layout(&sedan_mounts(), layout);
        let mut pt = Powertrain::from_config(&config, &mut mock_wheels).unwrap();
        let mut source = ConstantSource::new(150.0);

        let mut input = ControlInput { throttle: 1.0, ..Default::default() };
        for _ in 0..50 {
            let report = pt.step(&mut source, &mut input, cruising(), DT);
            assert!(report.reaction_torque.is_finite(), "{layout:?}");
        }
        assert!(pt.gear() >= 1, "{layout:?} never left neutral");
        assert!(source.state().angular_velocity.is_finite());
    }
}

// ============================================
// Driver input
// ============================================

#[test]
fn upshift_request_is_reported_and_consumed() {
    let mut pt = Powertrain::from_config(&two_wheel_config(), &mut mock_wheels).unwrap();
    let mut source = ConstantSource::new(100.0);
    let mut input = ControlInput { throttle: 0.5, shift_up: true, ..Default::default() };

    let report = pt.step(&mut source, &mut input, cruising(), DT);

    assert!(!input.shift_up);
    assert_eq!(pt.gear(), 1);
    assert!(report.events.iter().any(|e| e.event == TransmissionEvent::Upshift { from: 0, to: 1 }));
}

#[test]
fn handbrake_reaches_the_rear_wheels() {
    let mut pt = Powertrain::from_config(&two_wheel_config(), &mut mock_wheels).unwrap();
    let mut input = ControlInput { handbrake: 1.0, ..Default::default() };

    pt.step(&mut ConstantSource::new(0.0), &mut input, ChassisState::default(), DT);

    let snapshot = pt.snapshot();
    assert_eq!(snapshot.wheels.len(), 2);
    assert!(snapshot.wheels.iter().all(|w| w.brake_torque > 0.0));
}

#[test]
fn disabled_powertrain_does_nothing_until_enabled() {
    let (mut pt, ids) =
        fixed_ratio_driveline(500.0, 12.0, MockWheel::free(1.0, 2.0), MockWheel::free(1.0, 2.0)).unwrap();
    let mut source = ConstantSource::new(100.0);
    pt.disable();

    let report = pt.step(&mut source, &mut ControlInput::default(), ChassisState::default(), DT);
    assert_relative_eq!(report.drive_torque, 0.0);
    assert_relative_eq!(source.state().angular_velocity, 0.0);

    pt.enable();
    pt.shift_into(ids.transmission, 1).unwrap();
    let report = pt.step(&mut source, &mut ControlInput::default(), ChassisState::default(), DT);
    assert_relative_eq!(report.drive_torque, 100.0);
}
