//! Invariants of the solver checked over generated inputs.

use proptest::prelude::*;

use driveline::powertrain::test_utils::{ConstantSource, MockWheel, ctx_with, fixed_ratio_driveline};
use driveline::powertrain::{ChassisState, ControlInput, PowerSource, ShiftState, Transmission, TransmissionConfig, TransmissionType};

const DT: f32 = 0.01;

fn close(a: f32, b: f32, tolerance: f32) -> bool {
    (a - b).abs() <= tolerance * (1.0 + a.abs().max(b.abs()))
}

#[derive(Debug, Clone, Copy)]
enum GearOp {
    Up,
    Down,
    Into(i32),
    Tick,
}

fn gear_op() -> impl Strategy<Value = GearOp> {
    prop_oneof![Just(GearOp::Up), Just(GearOp::Down), (-5i32..6).prop_map(GearOp::Into), Just(GearOp::Tick)]
}

proptest! {
    #[test]
    fn clutch_never_passes_more_than_its_capacity(torque in -2000.0f32..2000.0, slip in 1.0f32..1000.0) {
        let (mut pt, ids) =
            fixed_ratio_driveline(slip, 1.0, MockWheel::locked(0.3, 20.0), MockWheel::locked(0.3, 20.0)).unwrap();
        let report = pt.step(&mut ConstantSource::new(torque), &mut ControlInput::default(), ChassisState::default(), DT);

        let crossed = pt.nodes()[ids.clutch.index()].state.output_torque;
        prop_assert!(close(crossed, torque.clamp(-slip, slip), 1e-5));
        prop_assert!(report.reaction_torque.abs() <= slip * (1.0 + 1e-5));
    }

    #[test]
    fn partial_engagement_caps_the_clutch_every_tick(
        torque in -2000.0f32..2000.0,
        slip in 1.0f32..1000.0,
        input in 0.0f32..=1.0,
        ticks in 1usize..8,
    ) {
        let (mut pt, ids) =
            fixed_ratio_driveline(slip, 1.0, MockWheel::locked(0.3, 20.0), MockWheel::locked(0.3, 20.0)).unwrap();
        pt.node_mut(ids.clutch).unwrap().as_clutch_mut().unwrap().set_clutch_input(input);
        let mut source = ConstantSource::new(torque);

        for _ in 0..ticks {
            let report = pt.step(&mut source, &mut ControlInput::default(), ChassisState::default(), DT);

            let node = &pt.nodes()[ids.clutch.index()];
            let capacity = slip * node.as_clutch().unwrap().engagement();
            prop_assert!(close(node.state.output_torque, torque.clamp(-capacity, capacity), 1e-5));
            prop_assert!(report.reaction_torque.abs() <= slip * (1.0 + 1e-5));
            prop_assert!(source.state().angular_velocity.is_finite());
        }
    }

    #[test]
    fn open_differential_splits_evenly_whatever_the_wheels_do(
        torque in -500.0f32..500.0,
        ratio in 1.0f32..15.0,
        wa in -100.0f32..100.0,
        wb in -100.0f32..100.0,
    ) {
        let (mut pt, ids) = fixed_ratio_driveline(
            1.0e6,
            ratio,
            MockWheel::free(0.33, 20.0).spinning(wa),
            MockWheel::free(0.33, 20.0).spinning(wb),
        ).unwrap();
        pt.step(&mut ConstantSource::new(torque), &mut ControlInput::default(), ChassisState::default(), DT);

        let nodes = pt.nodes();
        let ta = nodes[ids.wheel_a.index()].state.input_torque;
        let tb = nodes[ids.wheel_b.index()].state.input_torque;
        prop_assert!(close(ta, tb, 1e-5));
        prop_assert!(close(ta + tb, torque * ratio, 1e-4));
    }

    #[test]
    fn neutral_sends_nothing_downstream(torque in -1000.0f32..1000.0, wa in -50.0f32..50.0) {
        let (mut pt, ids) = fixed_ratio_driveline(
            1.0e6,
            10.0,
            MockWheel::free(0.33, 20.0).spinning(wa),
            MockWheel::free(0.33, 20.0),
        ).unwrap();
        pt.shift_into(ids.transmission, 0).unwrap();
        let report = pt.step(&mut ConstantSource::new(torque), &mut ControlInput::default(), ChassisState::default(), DT);

        let nodes = pt.nodes();
        prop_assert_eq!(nodes[ids.wheel_a.index()].state.input_torque, 0.0);
        prop_assert_eq!(nodes[ids.wheel_b.index()].state.input_torque, 0.0);
        prop_assert!(close(report.reaction_torque, torque, 1e-5));
    }

    #[test]
    fn gear_stays_within_the_box(ops in prop::collection::vec(gear_op(), 0..40)) {
        let mut t = Transmission::new(TransmissionConfig {
            transmission_type: TransmissionType::Manual,
            gears: vec![-3.0, 0.0, 3.0, 2.0, 1.0],
            final_ratio: 4.0,
            ..Default::default()
        });
        let ctx = ctx_with(ControlInput::default());

        for op in ops {
            let _ = match op {
                GearOp::Up => t.shift_up(None, 0.0),
                GearOp::Down => t.shift_down(None, 0.0),
                GearOp::Into(gear) => t.shift_into(gear, false, None, 0.0),
                GearOp::Tick => {
                    t.update_control(&ctx, 0.0, None, 0.0);
                    Ok(())
                }
            };
            prop_assert!(t.gear() >= -t.reverse_gear_count());
            prop_assert!(t.gear() <= t.forward_gear_count());
        }
    }

    #[test]
    fn gear_changes_once_at_the_midpoint(duration in 0.05f32..1.0, dt in 0.001f32..0.05) {
        let mut state = ShiftState::begin(1, 2, duration);
        let mut elapsed = 0.0f32;
        let mut changes = 0;

        for _ in 0..((duration / dt).ceil() as usize + 2) {
            elapsed += dt;
            let change = state.advance(dt, 0.0);
            let crossing = elapsed >= duration * 0.5 && changes == 0;
            prop_assert_eq!(change.is_some(), crossing);
            if let Some(change) = change {
                prop_assert_eq!(change, (1, 2));
                changes += 1;
            }
        }
        prop_assert_eq!(changes, 1);
        prop_assert_eq!(state, ShiftState::Idle);
    }

    #[test]
    fn root_inertia_adds_up_through_the_ratio(
        ratio in 1.0f32..20.0,
        mass in 1.0f32..40.0,
        radius in 0.2f32..0.6,
    ) {
        let (mut pt, _) =
            fixed_ratio_driveline(500.0, ratio, MockWheel::free(radius, mass), MockWheel::free(radius, mass)).unwrap();
        let report = pt.step(&mut ConstantSource::new(50.0), &mut ControlInput::default(), ChassisState::default(), DT);

        let wheel = 0.5 * mass * radius * radius;
        let expected = 0.05 + 0.05 + 0.05 + (0.05 + 2.0 * wheel) / (ratio * ratio);
        prop_assert!(close(report.root_inertia, expected, 1e-5));
    }
}
