mod common;

use common::*;
use gantry_core::{
    Axes, Coord, HomingError, KinematicsEngine, Move, MoveError, home_axes,
    homing::{HomingPhase, SimulatedEndstops},
};

const FULL_CYCLE: [HomingPhase; 6] = [
    HomingPhase::Forcing,
    HomingPhase::Homing,
    HomingPhase::Retracting,
    HomingPhase::Rehoming,
    HomingPhase::Reconciling,
    HomingPhase::Idle,
];

#[test]
fn corexy_homes_every_axis() {
    let mut kin = kinematics(COREXY);
    assert_eq!(kin.status(0.0).homed_axes, "");

    let mut driver = SimulatedEndstops::new();
    let outcome = home_axes(&mut kin, &mut driver, Axes::XYZ).unwrap();
    assert_eq!(outcome.axes, Axes::XYZ);
    assert_eq!(outcome.position, Coord::ORIGIN);
    assert_eq!(kin.status(0.0).homed_axes, "xyz");
    assert_eq!(outcome.phases.len(), 3 * FULL_CYCLE.len());
    assert_eq!(outcome.phases[..6], FULL_CYCLE);

    // One search and one slow re-search per rail
    let order: Vec<_> = driver
        .moves()
        .iter()
        .map(|m| m.endstops.join(","))
        .collect();
    assert_eq!(
        order,
        ["stepper_x", "stepper_x", "stepper_y", "stepper_y", "stepper_z", "stepper_z"]
    );
    assert_eq!(driver.moves()[0].speed, 50.0);
    assert_eq!(driver.moves()[1].speed, 25.0);
}

#[test]
fn single_axis_runs_one_full_cycle() {
    let mut kin = kinematics(CARTESIAN);
    let mut driver = SimulatedEndstops::new();
    let outcome = home_axes(&mut kin, &mut driver, Axes::Z).unwrap();
    assert_eq!(outcome.phases, FULL_CYCLE);
    assert_eq!(kin.status(0.0).homed_axes, "z");
}

#[test]
fn homing_is_idempotent() {
    let mut kin = kinematics(COREXY);
    let mut driver = SimulatedEndstops::new();

    home_axes(&mut kin, &mut driver, Axes::XYZ).unwrap();
    let second = home_axes(&mut kin, &mut driver, Axes::XYZ).unwrap();
    let positions = kin.stepper_positions();

    let third = home_axes(&mut kin, &mut driver, Axes::XYZ).unwrap();
    assert_eq!(second.position, third.position);
    assert_eq!(positions, kin.stepper_positions());
    assert_eq!(kin.status(0.0).homed_axes, "xyz");
}

#[test]
fn timeout_leaves_axes_unhomed() {
    let mut kin = kinematics(COREXY);
    let mut driver = SimulatedEndstops::new().with_stuck("stepper_y");

    let err = home_axes(&mut kin, &mut driver, Axes::XYZ).unwrap_err();
    assert_eq!(
        err,
        HomingError::Timeout {
            endstop: "stepper_y".into()
        }
    );
    assert_eq!(err.to_string(), "No trigger on stepper_y after full movement");

    // X homed before the failure but is cleared along with the rest
    assert_eq!(kin.status(0.0).homed_axes, "");
    let mut m = Move::new(Coord::ORIGIN, Coord::new(10.0, 0.0, 0.0), 100.0, 1000.0);
    assert!(matches!(
        kin.check_move(&mut m),
        Err(MoveError::MustHomeFirst { .. })
    ));
}

#[test]
fn endstop_still_triggered_after_retract() {
    let mut kin = kinematics(CARTESIAN);
    let mut driver = SimulatedEndstops::new().with_held("stepper_x");

    let err = home_axes(&mut kin, &mut driver, Axes::X).unwrap_err();
    assert_eq!(
        err,
        HomingError::StillTriggered {
            endstop: "stepper_x".into()
        }
    );
    assert_eq!(kin.status(0.0).homed_axes, "");
}

#[test]
fn adjustments_shift_final_position() {
    let mut kin = kinematics(CARTESIAN);
    let mut driver = SimulatedEndstops::new().with_adjustment("stepper_z", 0.05);

    let outcome = home_axes(&mut kin, &mut driver, Axes::Z).unwrap();
    assert!((outcome.position.z - 0.05).abs() < 1e-12);
    assert!((kin.position().z - 0.05).abs() < 1e-12);
}

#[test]
fn early_trigger_homes_to_endstop() {
    let mut kin = kinematics(CARTESIAN);
    let mut driver = SimulatedEndstops::new().with_trips("stepper_x", [50.0, 5.0]);

    let outcome = home_axes(&mut kin, &mut driver, Axes::X).unwrap();
    assert_eq!(outcome.position.x, 0.0);
    assert_eq!(kin.position().x, 0.0);
    assert_eq!(kin.stepper_positions()["stepper_x"], 0.0);

    // Tripped 250mm from the endstop in the forced frame, but the retract
    // still starts from the endstop
    let (from, to) = driver.retracts()[0];
    assert_eq!(from.x, 0.0);
    assert!((to.x - 5.0).abs() < 1e-9, "{to}");
    assert!((driver.moves()[1].start.x - 10.0).abs() < 1e-9);
}

#[test]
fn overshoot_shifts_halt_position() {
    let mut kin = kinematics(CARTESIAN);
    let mut driver = SimulatedEndstops::new()
        .with_trips("stepper_x", [120.0, 3.0])
        .with_overshoot("stepper_x", 0.5);

    let outcome = home_axes(&mut kin, &mut driver, Axes::X).unwrap();
    assert!((driver.retracts()[0].0.x + 0.5).abs() < 1e-12);
    assert!((outcome.position.x + 0.5).abs() < 1e-12);
    assert_eq!(kin.status(0.0).homed_axes, "x");
}

#[test]
fn delta_early_trigger_homes_to_top() {
    let mut kin = kinematics(DELTA);
    let mut driver = ["stepper_a", "stepper_b", "stepper_c"]
        .into_iter()
        .fold(SimulatedEndstops::new(), |driver, name| {
            driver.with_trips(name, [30.0, 2.0])
        });

    let outcome = home_axes(&mut kin, &mut driver, Axes::Z).unwrap();
    let gantry_core::Kinematics::Delta(delta) = &kin else {
        panic!("expected a delta machine");
    };
    let home = delta.home_position();
    assert_eq!(outcome.position, home);
    assert_eq!(driver.retracts()[0].0, home);
    assert!(kin.position().distance(&home) < 1e-6);
    for (name, endstop) in ["stepper_a", "stepper_b", "stepper_c"]
        .into_iter()
        .zip(delta.abs_endstops())
    {
        assert!((kin.stepper_positions()[name] - endstop).abs() < 1e-6);
    }
}

#[test]
fn zero_retract_skips_second_search() {
    let mut config = machine(CARTESIAN);
    config
        .steppers
        .get_mut("stepper_z")
        .unwrap()
        .homing_retract_dist = Some(0.0);
    let mut kin = gantry_core::Kinematics::from_config(&config).unwrap();

    let mut driver = SimulatedEndstops::new();
    let outcome = home_axes(&mut kin, &mut driver, Axes::Z).unwrap();
    assert_eq!(
        outcome.phases,
        [
            HomingPhase::Forcing,
            HomingPhase::Homing,
            HomingPhase::Reconciling,
            HomingPhase::Idle
        ]
    );
    assert_eq!(driver.moves().len(), 1);
}

#[test]
fn motor_off_requires_homing_again() {
    let mut kin = kinematics(COREXY);
    let mut driver = SimulatedEndstops::new();
    home_axes(&mut kin, &mut driver, Axes::XYZ).unwrap();

    let end = Coord::new(10.0, 0.0, 0.0);
    let mut m = Move::new(Coord::ORIGIN, end, 100.0, 1000.0);
    assert_eq!(kin.check_move(&mut m), Ok(()));

    kin.motor_off();
    let err = kin.check_move(&mut m).unwrap_err();
    assert_eq!(err, MoveError::MustHomeFirst { pos: end });
    assert_eq!(err.to_string(), "Must home axis first: 10.000 0.000 0.000");
}

#[test]
fn delta_homes_towers_together() {
    let mut kin = kinematics(DELTA);
    let mut driver = SimulatedEndstops::new();
    let outcome = home_axes(&mut kin, &mut driver, Axes::Z).unwrap();
    assert_eq!(outcome.axes, Axes::XYZ);
    assert_eq!(outcome.phases, FULL_CYCLE);

    let gantry_core::Kinematics::Delta(delta) = &kin else {
        panic!("expected a delta machine");
    };
    let home = delta.home_position();
    assert!(outcome.position.distance(&home) < 0.01, "{outcome:?}");
    assert!(kin.position().distance(&home) < 0.01);
    assert_eq!(
        driver.moves()[0].endstops,
        ["stepper_a", "stepper_b", "stepper_c"]
    );
    assert_eq!(kin.status(0.0).homed_axes, "xyz");
}

#[test]
fn deltesian_homes_pillars_then_y() {
    let mut kin = kinematics(DELTESIAN);
    let mut driver = SimulatedEndstops::new();
    let outcome = home_axes(&mut kin, &mut driver, Axes::XYZ).unwrap();
    assert_eq!(outcome.axes, Axes::XYZ);
    assert!((outcome.position.z - 250.0).abs() < 1e-6, "{outcome:?}");
    assert!(outcome.position.x.abs() < 1e-6);
    assert_eq!(driver.moves()[0].endstops, ["stepper_left", "stepper_right"]);
}

#[test]
fn rotary_delta_homes_at_endstop_height() {
    let mut kin = kinematics(ROTARY_DELTA);
    let mut driver = SimulatedEndstops::new();
    let outcome = home_axes(&mut kin, &mut driver, Axes::XYZ).unwrap();
    assert!(
        outcome.position.distance(&Coord::new(0.0, 0.0, 252.0)) < 0.01,
        "{outcome:?}"
    );
    assert_eq!(kin.status(0.0).homed_axes, "xyz");
}

#[test]
fn winch_reports_origin_without_searching() {
    let mut kin = kinematics(WINCH);
    let mut driver = SimulatedEndstops::new();
    let outcome = home_axes(&mut kin, &mut driver, Axes::XYZ).unwrap();
    assert_eq!(outcome.position, Coord::ORIGIN);
    assert!(outcome.phases.is_empty());
    assert!(driver.moves().is_empty());
}
