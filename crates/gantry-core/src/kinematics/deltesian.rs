// Deltesian kinematics

use crate::{
    boundary::{AxisLimits, SLOW_RATIO, SlowZones, ZSpeedLimit, check_reachable},
    config::{ConfigError, FloatOption, MachineConfig},
    homing::{HomingError, HomingState},
    itersolve::{ActiveFlags, CalcPositionCallback, Segment},
    kinematics::{
        Axes, KinematicsEngine, KinematicsStatus, StepperKinematics, ToolheadLimits,
        cartesian::{Axis, CartesianStepper},
        linear_homing_positions, reading,
    },
    mathutil::Coord,
    planner::{Move, MoveError},
    stepper::{Rail, RailOptions, StepperPositions},
};

/// Smallest allowed arm angle from horizontal, in degrees
const MIN_ANGLE: f64 = 5.0;

/// Step handle for one of the two vertical pillars
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeltesianStepper {
    arm2: f64,
    arm_x: f64,
}

impl DeltesianStepper {
    pub fn new(arm2: f64, arm_x: f64) -> Self {
        Self { arm2, arm_x }
    }

    pub fn active_flags(&self) -> ActiveFlags {
        ActiveFlags::new().with_x().with_z()
    }
}

impl CalcPositionCallback for DeltesianStepper {
    fn calc_position(&self, m: &Segment, move_time: f64) -> f64 {
        let c = m.coord(move_time);
        let dx = self.arm_x - c.x;
        (self.arm2 - dx * dx).sqrt() + c.z
    }
}

/// Two pillars with arms sharing the XZ plane plus a Cartesian Y axis.
#[derive(Debug)]
pub struct DeltesianKinematics {
    rails: Vec<Rail>,
    toolhead: ToolheadLimits,
    z_limit: ZSpeedLimit,
    arm2: [f64; 2],
    /// Horizontal distance from the effector center to each pivot
    arm_x: [f64; 2],
    abs_endstops: [f64; 2],
    home_z: f64,
    ranges: [(f64, f64); 3],
    limits: AxisLimits,
    zones: SlowZones,
}

impl DeltesianKinematics {
    pub fn from_config(config: &MachineConfig) -> Result<Self, ConfigError> {
        let printer = &config.printer;
        let left = config.stepper("stepper_left")?;
        let right = config.stepper("stepper_right")?;

        let arm_x_left = FloatOption::new("stepper_left", "arm_x_length", left.arm_x_length)
            .above(0.0)
            .get()?;
        let arm_x_right = FloatOption::new("stepper_right", "arm_x_length", right.arm_x_length)
            .default(arm_x_left)
            .above(0.0)
            .get()?;
        let arm_left = FloatOption::new("stepper_left", "arm_length", left.arm_length)
            .above(arm_x_left)
            .get()?;
        let arm_right = FloatOption::new("stepper_right", "arm_length", right.arm_length)
            .default(arm_left)
            .above(arm_x_right)
            .get()?;
        let arm = [arm_left, arm_right];
        let arm_x = [arm_x_left, arm_x_right];
        let arm2 = arm.map(|a| a * a);

        let rail_left = Rail::from_config(
            "stepper_left",
            left,
            StepperKinematics::Deltesian(DeltesianStepper::new(arm2[0], -arm_x[0])),
            RailOptions {
                need_position_minmax: false,
                ..RailOptions::default()
            },
        )?;
        let rail_right = Rail::from_config(
            "stepper_right",
            right,
            StepperKinematics::Deltesian(DeltesianStepper::new(arm2[1], arm_x[1])),
            RailOptions {
                need_position_minmax: false,
                default_position_endstop: Some(rail_left.homing_info().position_endstop),
                ..RailOptions::default()
            },
        )?;
        let rail_y = Rail::from_config(
            "stepper_y",
            config.stepper("stepper_y")?,
            StepperKinematics::Cartesian(CartesianStepper::new(Axis::Y)),
            RailOptions::default(),
        )?;

        // X travel keeps both arms above the minimum angle
        let min_angle = FloatOption::new("printer", "min_angle", printer.min_angle)
            .default(MIN_ANGLE)
            .minval(0.0)
            .maxval(90.0)
            .get()?;
        let cos_angle = min_angle.to_radians().cos();
        let x_kin_min = (-arm_x[0].min(cos_angle * arm[1] - arm_x[1])).ceil();
        let x_kin_max = arm_x[1].min(cos_angle * arm[0] - arm_x[0]).floor();
        let x_kin_range = (x_kin_max - x_kin_min)
            .min(x_kin_max * 2.0)
            .min(-x_kin_min * 2.0);
        let x_range = match printer.print_width {
            Some(width) => {
                let width = FloatOption::new("printer", "print_width", Some(width))
                    .minval(0.0)
                    .maxval(x_kin_range)
                    .get()?;
                (-width * 0.5, width * 0.5)
            }
            None => (x_kin_min, x_kin_max),
        };

        let pmax = [
            rail_left.homing_info().position_endstop,
            rail_right.homing_info().position_endstop,
        ];
        let abs_endstops = [0, 1].map(|i| pmax[i] + (arm2[i] - arm_x[i] * arm_x[i]).sqrt());
        let home_z = actuator_to_cartesian(&arm_x, &arm2, abs_endstops).1;
        let y_range = rail_y.range();

        let toolhead = ToolheadLimits::from_config(printer)?;
        let z_limit = ZSpeedLimit::from_config(printer, toolhead)?;

        let mut kin = Self {
            rails: vec![rail_left, rail_right, rail_y],
            toolhead,
            z_limit,
            arm2,
            arm_x,
            abs_endstops,
            home_z,
            ranges: [x_range, y_range, (0.0, 0.0)],
            limits: AxisLimits::unhomed(),
            zones: SlowZones {
                slow2: 0.0,
                very_slow2: 0.0,
            },
        };

        let z_max = kin.pillars_z_max(x_range.0).min(kin.pillars_z_max(x_range.1));
        let z_min = FloatOption::new("printer", "minimum_z_position", printer.minimum_z_position)
            .default(0.0)
            .maxval(z_max)
            .get()?;
        kin.ranges[2] = (z_min, z_max);

        let slow_x = |ratio: f64| {
            let k = ratio / (1.0 + ratio * ratio).sqrt();
            [0, 1]
                .map(|i| k * arm[i] - arm_x[i])
                .into_iter()
                .fold(f64::INFINITY, f64::min)
        };
        kin.zones = SlowZones {
            slow2: slow_x(SLOW_RATIO).powi(2),
            very_slow2: slow_x(2.0 * SLOW_RATIO).powi(2),
        };

        tracing::info!(
            "Deltesian X range {:.2}..{:.2}mm, Z max {:.2}mm (moves slowed past {:.2}mm and {:.2}mm)",
            x_range.0,
            x_range.1,
            z_max,
            kin.zones.slow2.sqrt(),
            kin.zones.very_slow2.sqrt()
        );
        kin.set_position(Coord::ORIGIN, Axes::NONE);
        Ok(kin)
    }

    /// Highest reachable Z with the effector at `x`
    pub fn pillars_z_max(&self, x: f64) -> f64 {
        let dz = [
            (self.arm2[0] - (self.arm_x[0] + x).powi(2)).sqrt(),
            (self.arm2[1] - (self.arm_x[1] - x).powi(2)).sqrt(),
        ];
        (self.abs_endstops[0] - dz[0]).min(self.abs_endstops[1] - dz[1])
    }

    /// Effector Z with both carriages at their endstops
    pub fn home_z(&self) -> f64 {
        self.home_z
    }
}

/// Intersect the two arm circles in the XZ plane, keeping the lower root
fn actuator_to_cartesian(arm_x: &[f64; 2], arm2: &[f64; 2], sp: [f64; 2]) -> (f64, f64) {
    let dx = arm_x[0] + arm_x[1];
    let dz = sp[1] - sp[0];
    let pivots2 = dx * dx + dz * dz;
    let pivots = pivots2.sqrt();
    let a = (arm2[0] - arm2[1] + pivots2) / (2.0 * pivots);
    let h = (arm2[0] - a * a).sqrt();
    let x = -arm_x[0] + (a * dx + h * dz) / pivots;
    let z = sp[0] + (a * dz - h * dx) / pivots;
    (x, z)
}

impl KinematicsEngine for DeltesianKinematics {
    fn rails(&self) -> &[Rail] {
        &self.rails
    }

    fn calc_position(&self, positions: &StepperPositions) -> Coord {
        let sp = [
            reading(positions, self.rails[0].name()),
            reading(positions, self.rails[1].name()),
        ];
        let (x, z) = actuator_to_cartesian(&self.arm_x, &self.arm2, sp);
        let y = reading(positions, self.rails[2].name());
        if !(x.is_finite() && z.is_finite()) {
            return Coord::new(f64::NAN, y, f64::NAN);
        }
        Coord::new(x, y, z)
    }

    fn set_position(&mut self, newpos: Coord, homing_axes: Axes) {
        for rail in &mut self.rails {
            rail.set_position(newpos);
        }
        for axis in homing_axes.iter() {
            self.limits.set(axis, self.ranges[axis]);
        }
    }

    fn clear_homing_state(&mut self, axes: Axes) {
        self.limits.clear(axes);
    }

    fn home(&mut self, homing: &mut HomingState<'_>) -> Result<(), HomingError> {
        let requested = homing.axes();
        let home_xz = requested.contains(0) || requested.contains(2);
        let home_y = requested.contains(1);
        let mut axes = Axes::NONE;
        if home_xz {
            axes = axes.union(Axes::XZ);
        }
        if home_y {
            axes = axes.union(Axes::Y);
        }
        homing.set_axes(axes);

        if home_xz {
            // Pillars home together; X and Z follow from them
            let max_dz2 = [0, 1]
                .map(|i| self.arm2[i] - self.arm_x[i].powi(2))
                .into_iter()
                .fold(0.0, f64::max);
            let forcepos = [Some(0.0), None, Some(-1.5 * max_dz2.sqrt())];
            let homepos = [Some(0.0), None, Some(self.home_z)];
            homing.home_rails(self, &[0, 1], forcepos, homepos)?;
        }
        if home_y {
            let (forcepos, homepos) = linear_homing_positions(&self.rails[2], 1);
            homing.home_rails(self, &[2], forcepos, homepos)?;
        }
        Ok(())
    }

    fn check_move(&mut self, m: &mut Move) -> Result<(), MoveError> {
        let end = m.end_pos;
        // Vertical moves on the center line may climb to the endstops
        let homing_move = end.x == 0.0
            && !m.moves_axis(0)
            && !m.moves_axis(1)
            && end.z <= self.home_z
            && end.z >= self.ranges[2].0
            && self.limits.is_homed(2);
        if !homing_move {
            self.limits.check_endstops(m)?;
            if (m.moves_axis(0) || m.moves_axis(2)) && end.z > self.pillars_z_max(end.x) {
                return Err(m.out_of_range());
            }
            check_reachable(&self.rails, m)?;
        }
        if m.moves_axis(2) {
            self.z_limit.apply(m);
        }
        if m.moves_axis(0) {
            let extreme_x2 = end.x.powi(2).max(m.start_pos.x.powi(2));
            self.zones.apply(
                m,
                extreme_x2,
                self.toolhead.max_velocity,
                self.toolhead.max_accel,
            );
        }
        Ok(())
    }

    fn status(&self, _eventtime: f64) -> KinematicsStatus {
        KinematicsStatus {
            homed_axes: self.limits.homed_axes().to_string(),
            axis_minimum: Coord::from(self.ranges.map(|r| r.0)),
            axis_maximum: Coord::from(self.ranges.map(|r| r.1)),
            cone_start_z: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KinematicsType, PrinterConfig, StepperConfig};

    fn machine() -> MachineConfig {
        let printer = PrinterConfig::new(KinematicsType::Deltesian, 300.0, 3000.0);
        let mut config = MachineConfig {
            printer,
            ..MachineConfig::default()
        };
        let pillar = StepperConfig {
            step_distance: Some(0.01),
            position_endstop: Some(250.0),
            arm_length: Some(217.0),
            arm_x_length: Some(160.0),
            ..StepperConfig::default()
        };
        config.steppers.insert("stepper_left".into(), pillar.clone());
        config.steppers.insert(
            "stepper_right".into(),
            StepperConfig {
                position_endstop: None,
                arm_length: None,
                arm_x_length: None,
                ..pillar
            },
        );
        config.steppers.insert(
            "stepper_y".into(),
            StepperConfig {
                step_distance: Some(0.0125),
                position_endstop: Some(0.0),
                position_max: Some(200.0),
                ..StepperConfig::default()
            },
        );
        config
    }

    #[test]
    fn deltesian_stepper_calculates_position() {
        let kin = DeltesianStepper::new(100.0, 0.0);
        let pos = kin.calc_position_from_coord(Coord::new(0.0, 0.0, 5.0));
        assert_eq!(pos, 15.0); // sqrt(100) + 5
    }

    #[test]
    fn home_is_at_endstop_height() {
        let kin = DeltesianKinematics::from_config(&machine()).unwrap();
        assert!((kin.home_z() - 250.0).abs() < 1e-9);
        let status = kin.status(0.0);
        assert_eq!(status.homed_axes, "");
        // Symmetric arms give a symmetric X range
        assert_eq!(status.axis_minimum.x, -status.axis_maximum.x);
        assert!(status.axis_maximum.z < kin.home_z());
    }

    #[test]
    fn round_trips_inside_envelope() {
        let mut kin = DeltesianKinematics::from_config(&machine()).unwrap();
        for p in [
            Coord::new(0.0, 10.0, 0.0),
            Coord::new(-30.0, 50.0, 20.0),
            Coord::new(35.0, 150.0, 100.0),
        ] {
            kin.set_position(p, Axes::NONE);
            let back = kin.calc_position(&kin.stepper_positions());
            assert!(back.distance(&p) < 1e-6, "{p:?} -> {back:?}");
        }
    }

    #[test]
    fn pillars_limit_z_near_x_extremes() {
        let mut kin = DeltesianKinematics::from_config(&machine()).unwrap();
        kin.set_position(Coord::ORIGIN, Axes::XYZ);
        assert!(kin.pillars_z_max(0.0) > kin.pillars_z_max(40.0));

        let z_max = kin.ranges[2].1;
        let mut m = Move::new(Coord::ORIGIN, Coord::new(0.0, 0.0, z_max), 100.0, 1000.0);
        kin.check_move(&mut m).unwrap();

        let mut m = Move::new(Coord::ORIGIN, Coord::new(30.0, 0.0, z_max + 1.0), 100.0, 1000.0);
        assert!(matches!(
            kin.check_move(&mut m),
            Err(MoveError::OutOfRange { .. })
        ));

        // Straight up the center line to the endstops is allowed
        let home = Coord::new(0.0, 0.0, kin.home_z());
        let mut m = Move::new(Coord::ORIGIN, home, 100.0, 1000.0);
        kin.check_move(&mut m).unwrap();
    }

    #[test]
    fn x_extremes_are_slowed() {
        let mut kin = DeltesianKinematics::from_config(&machine()).unwrap();
        kin.set_position(Coord::ORIGIN, Axes::XYZ);
        let x = kin.zones.very_slow2.sqrt() + 0.5;
        assert!(x < kin.ranges[0].1);
        let mut m = Move::new(Coord::ORIGIN, Coord::new(x, 0.0, 0.0), 300.0, 3000.0);
        kin.check_move(&mut m).unwrap();
        assert_eq!(m.velocity(), 75.0);
    }
}
