// SCARA kinematics

use crate::{
    boundary::{AxisLimits, SLOW_RATIO, SlowZones, ZSpeedLimit, check_reachable},
    config::{ConfigError, ElbowDirection, FloatOption, MachineConfig},
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Joint {
    Shoulder,
    Elbow,
}

/// The two-link planar arm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaraArms {
    pub inner: f64,
    pub outer: f64,
    pub elbow: ElbowDirection,
}

impl ScaraArms {
    /// Joint angles `(shoulder, elbow)` in radians reaching `(x, y)`.
    /// The elbow angle is relative to the inner arm.
    pub fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let (l1, l2) = (self.inner, self.outer);
        let cos_elbow = (x * x + y * y - l1 * l1 - l2 * l2) / (2.0 * l1 * l2);
        let elbow = match self.elbow {
            ElbowDirection::Left => cos_elbow.acos(),
            ElbowDirection::Right => -cos_elbow.acos(),
        };
        let shoulder = y.atan2(x) - (l2 * elbow.sin()).atan2(l1 + l2 * elbow.cos());
        (shoulder, elbow)
    }

    pub fn forward(&self, shoulder: f64, elbow: f64) -> (f64, f64) {
        let reach = shoulder + elbow;
        (
            self.inner * shoulder.cos() + self.outer * reach.cos(),
            self.inner * shoulder.sin() + self.outer * reach.sin(),
        )
    }

    /// Inner and outer radius of the reachable annulus
    pub fn reach(&self) -> (f64, f64) {
        ((self.inner - self.outer).abs(), self.inner + self.outer)
    }

    /// Squared radius at which `|sin(elbow)|` drops to `sin_elbow`
    /// on the way to full extension
    fn extension_radius2(&self, sin_elbow: f64) -> f64 {
        let (l1, l2) = (self.inner, self.outer);
        l1 * l1 + l2 * l2 + 2.0 * l1 * l2 * (1.0 - sin_elbow * sin_elbow).sqrt()
    }
}

/// Step handle for one rotary joint; positions are joint angles
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaraStepper {
    joint: Joint,
    arms: ScaraArms,
}

impl ScaraStepper {
    pub fn new(joint: Joint, arms: ScaraArms) -> Self {
        Self { joint, arms }
    }

    pub fn active_flags(&self) -> ActiveFlags {
        ActiveFlags::new().with_x().with_y()
    }
}

impl CalcPositionCallback for ScaraStepper {
    fn calc_position(&self, m: &Segment, move_time: f64) -> f64 {
        let c = m.coord(move_time);
        let (shoulder, elbow) = self.arms.inverse(c.x, c.y);
        match self.joint {
            Joint::Shoulder => shoulder,
            Joint::Elbow => elbow,
        }
    }
}

/// Shoulder and elbow joints sweeping the XY plane plus a linear Z rail.
#[derive(Debug)]
pub struct ScaraKinematics {
    rails: Vec<Rail>,
    arms: ScaraArms,
    toolhead: ToolheadLimits,
    z_limit: ZSpeedLimit,
    home_xy: (f64, f64),
    ranges: [(f64, f64); 3],
    limits: AxisLimits,
    zones: SlowZones,
}

impl ScaraKinematics {
    pub fn from_config(config: &MachineConfig) -> Result<Self, ConfigError> {
        let printer = &config.printer;
        let arms = ScaraArms {
            inner: FloatOption::new("printer", "inner_arm_length", printer.inner_arm_length)
                .above(0.0)
                .get()?,
            outer: FloatOption::new("printer", "outer_arm_length", printer.outer_arm_length)
                .above(0.0)
                .get()?,
            elbow: printer.elbow_direction.unwrap_or_default(),
        };

        let joint_opts = RailOptions {
            units_in_radians: true,
            angular_range: true,
            ..RailOptions::default()
        };
        let shoulder = Rail::from_config(
            "stepper_shoulder",
            config.stepper("stepper_shoulder")?,
            StepperKinematics::Scara(ScaraStepper::new(Joint::Shoulder, arms)),
            joint_opts,
        )?;
        let elbow = Rail::from_config(
            "stepper_elbow",
            config.stepper("stepper_elbow")?,
            StepperKinematics::Scara(ScaraStepper::new(Joint::Elbow, arms)),
            joint_opts,
        )?;
        let rail_z = Rail::from_config(
            "stepper_z",
            config.stepper("stepper_z")?,
            StepperKinematics::Cartesian(CartesianStepper::new(Axis::Z)),
            RailOptions::default(),
        )?;

        let home_xy = arms.forward(
            shoulder.homing_info().position_endstop,
            elbow.homing_info().position_endstop,
        );
        let (inner, outer) = arms.reach();
        if home_xy.0.hypot(home_xy.1) < inner - 1e-9 {
            return Err(ConfigError::Invalid {
                section: "stepper_elbow".into(),
                option: "position_endstop",
                reason: "places the arm inside its unreachable core".into(),
            });
        }

        let toolhead = ToolheadLimits::from_config(printer)?;
        let z_limit = ZSpeedLimit::from_config(printer, toolhead)?;
        let zones = SlowZones {
            slow2: arms.extension_radius2(1.0 / SLOW_RATIO),
            very_slow2: arms.extension_radius2(0.5 / SLOW_RATIO),
        };
        tracing::info!(
            "SCARA reach {:.2}..{:.2}mm (moves slowed past {:.2}mm and {:.2}mm)",
            inner,
            outer,
            zones.slow2.sqrt(),
            zones.very_slow2.sqrt()
        );

        let z_range = rail_z.range();
        let mut kin = Self {
            rails: vec![shoulder, elbow, rail_z],
            arms,
            toolhead,
            z_limit,
            home_xy,
            ranges: [(-outer, outer), (-outer, outer), z_range],
            limits: AxisLimits::unhomed(),
            zones,
        };
        kin.set_position(Coord::new(home_xy.0, home_xy.1, 0.0), Axes::NONE);
        Ok(kin)
    }

    pub fn arms(&self) -> ScaraArms {
        self.arms
    }

    /// XY position with both joints at their endstops
    pub fn home_xy(&self) -> (f64, f64) {
        self.home_xy
    }

    /// Force position for the joint pair: each joint backed off past its
    /// endstop the way a linear rail would be
    fn joint_force_xy(&self) -> (f64, f64) {
        let [shoulder, elbow] = [0, 1].map(|i| {
            let (lo, hi) = self.rails[i].range();
            let info = self.rails[i].homing_info();
            let endstop = info.position_endstop;
            if info.positive_dir {
                endstop - 1.5 * (endstop - lo)
            } else {
                endstop + 1.5 * (hi - endstop)
            }
        });
        self.arms.forward(shoulder, elbow)
    }

    /// Whether the XY segment of `m` passes through the unreachable core
    fn crosses_core(&self, m: &Move) -> bool {
        let inner = self.arms.reach().0;
        if inner <= 0.0 {
            return false;
        }
        let (sx, sy) = (m.start_pos.x, m.start_pos.y);
        let (dx, dy) = (m.axes_d.x, m.axes_d.y);
        let len2 = dx * dx + dy * dy;
        let t = if len2 > 0.0 {
            (-(sx * dx + sy * dy) / len2).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let (cx, cy) = (sx + t * dx, sy + t * dy);
        cx * cx + cy * cy < inner * inner
    }
}

impl KinematicsEngine for ScaraKinematics {
    fn rails(&self) -> &[Rail] {
        &self.rails
    }

    fn calc_position(&self, positions: &StepperPositions) -> Coord {
        let (x, y) = self.arms.forward(
            reading(positions, self.rails[0].name()),
            reading(positions, self.rails[1].name()),
        );
        Coord::new(x, y, reading(positions, self.rails[2].name()))
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
        let home_xy = requested.contains(0) || requested.contains(1);
        let home_z = requested.contains(2);
        let mut axes = Axes::NONE;
        if home_xy {
            axes = axes.union(Axes::XY);
        }
        if home_z {
            axes = axes.union(Axes::Z);
        }
        homing.set_axes(axes);

        if home_xy {
            // Both joints search for their endstops together
            let (fx, fy) = self.joint_force_xy();
            let forcepos = [Some(fx), Some(fy), None];
            let homepos = [Some(self.home_xy.0), Some(self.home_xy.1), None];
            homing.home_rails(self, &[0, 1], forcepos, homepos)?;
        }
        if home_z {
            let (forcepos, homepos) = linear_homing_positions(&self.rails[2], 2);
            homing.home_rails(self, &[2], forcepos, homepos)?;
        }
        Ok(())
    }

    fn check_move(&mut self, m: &mut Move) -> Result<(), MoveError> {
        let end = m.end_pos;
        let moves_xy = m.moves_axis(0) || m.moves_axis(1);
        let homing_move = moves_xy && end.x == self.home_xy.0 && end.y == self.home_xy.1;
        if !homing_move {
            self.limits.check_endstops(m)?;
            if moves_xy {
                let (inner, outer) = self.arms.reach();
                let r = end.x.hypot(end.y);
                if r > outer || r < inner || self.crosses_core(m) {
                    return Err(m.out_of_range());
                }
                check_reachable(&self.rails, m)?;
            }
        }
        if m.moves_axis(2) {
            self.z_limit.apply(m);
        }
        if moves_xy {
            let extreme2 = end.xy_magsq().max(m.start_pos.xy_magsq());
            self.zones.apply(
                m,
                extreme2,
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
    use crate::{
        boundary::SpeedTier,
        config::{KinematicsType, PrinterConfig, StepperConfig},
        homing::{HomingPhase, SimulatedEndstops, home_axes},
    };

    fn machine() -> MachineConfig {
        let mut printer = PrinterConfig::new(KinematicsType::Scara, 300.0, 3000.0);
        printer.inner_arm_length = Some(150.0);
        printer.outer_arm_length = Some(120.0);
        let mut config = MachineConfig {
            printer,
            ..MachineConfig::default()
        };
        config.steppers.insert(
            "stepper_shoulder".into(),
            StepperConfig {
                step_distance: Some(0.01),
                position_min: Some(-90.0),
                position_max: Some(90.0),
                position_endstop: Some(90.0),
                ..StepperConfig::default()
            },
        );
        config.steppers.insert(
            "stepper_elbow".into(),
            StepperConfig {
                step_distance: Some(0.01),
                position_min: Some(0.0),
                position_max: Some(150.0),
                position_endstop: Some(150.0),
                ..StepperConfig::default()
            },
        );
        config.steppers.insert(
            "stepper_z".into(),
            StepperConfig {
                step_distance: Some(0.0025),
                position_endstop: Some(0.0),
                position_max: Some(200.0),
                ..StepperConfig::default()
            },
        );
        config
    }

    fn homed() -> ScaraKinematics {
        let mut kin = ScaraKinematics::from_config(&machine()).unwrap();
        kin.set_position(Coord::new(100.0, 100.0, 10.0), Axes::XYZ);
        kin
    }

    #[test]
    fn joints_follow_law_of_cosines() {
        let arms = ScaraArms {
            inner: 150.0,
            outer: 120.0,
            elbow: ElbowDirection::Left,
        };
        let (shoulder, elbow) = arms.inverse(150.0, 120.0);
        assert!(shoulder.abs() < 1e-12);
        assert!((elbow - std::f64::consts::FRAC_PI_2).abs() < 1e-12);

        let right = ScaraArms {
            elbow: ElbowDirection::Right,
            ..arms
        };
        let (_, elbow) = right.inverse(150.0, 120.0);
        assert!(elbow < 0.0);
        let (x, y) = right.forward(right.inverse(150.0, 120.0).0, elbow);
        assert!((x - 150.0).abs() < 1e-9 && (y - 120.0).abs() < 1e-9);

        // Outside the annulus the joints have no solution
        assert!(arms.inverse(300.0, 0.0).1.is_nan());
        assert!(arms.inverse(10.0, 0.0).1.is_nan());
    }

    #[test]
    fn scara_joints_only_track_xy() {
        let flags = ScaraStepper::new(Joint::Elbow, homed().arms()).active_flags();
        assert!(flags.has_x() && flags.has_y() && !flags.has_z());
    }

    #[test]
    fn round_trips_across_annulus() {
        let mut kin = homed();
        for p in [
            Coord::new(100.0, 100.0, 10.0),
            Coord::new(-200.0, 50.0, 0.0),
            Coord::new(0.0, -40.0, 150.0),
            Coord::new(265.0, 0.0, 5.0),
        ] {
            kin.set_position(p, Axes::NONE);
            assert!(kin.position().distance(&p) < 1e-9, "{p:?}");
        }
    }

    #[test]
    fn home_position_from_joint_endstops() {
        let kin = ScaraKinematics::from_config(&machine()).unwrap();
        let (x, y) = kin.home_xy();
        assert!((x - -60.0).abs() < 1e-9);
        assert!((y - (150.0 - 60.0 * 3f64.sqrt())).abs() < 1e-9);
        assert_eq!(kin.status(0.0).homed_axes, "");
    }

    #[test]
    fn homing_joints_then_z() {
        let mut kin = ScaraKinematics::from_config(&machine()).unwrap();
        let mut driver = SimulatedEndstops::new();
        let outcome = home_axes(&mut kin, &mut driver, Axes::XYZ).unwrap();
        assert_eq!(outcome.axes, Axes::XYZ);
        let (hx, hy) = kin.home_xy();
        assert!(outcome.position.distance(&Coord::new(hx, hy, 0.0)) < 1e-9);
        assert_eq!(kin.status(0.0).homed_axes, "xyz");

        // Joint pair plus the Z rail, each searched twice
        let endstops: Vec<_> = driver.moves().iter().map(|m| m.endstops.clone()).collect();
        assert_eq!(endstops.len(), 4);
        assert_eq!(endstops[0], vec!["stepper_shoulder", "stepper_elbow"]);
        assert_eq!(endstops[3], vec!["stepper_z"]);
        assert_eq!(outcome.phases.last(), Some(&HomingPhase::Idle));
    }

    #[test]
    fn rejects_moves_outside_annulus() {
        let mut kin = homed();
        for end in [Coord::new(265.0, 60.0, 10.0), Coord::new(20.0, 0.0, 10.0)] {
            let mut m = Move::new(Coord::new(100.0, 100.0, 10.0), end, 100.0, 1000.0);
            assert_eq!(kin.check_move(&mut m), Err(MoveError::OutOfRange { pos: end }));
        }

        // Both ends reachable but the path cuts through the core
        let start = Coord::new(-100.0, 0.0, 10.0);
        let end = Coord::new(100.0, 0.0, 10.0);
        let mut m = Move::new(start, end, 100.0, 1000.0);
        assert!(kin.check_move(&mut m).is_err());
    }

    #[test]
    fn must_home_before_moving() {
        let mut kin = homed();
        kin.motor_off();
        let start = Coord::new(100.0, 100.0, 10.0);
        let mut m = Move::new(start, Coord::new(110.0, 100.0, 10.0), 100.0, 1000.0);
        assert!(matches!(
            kin.check_move(&mut m),
            Err(MoveError::MustHomeFirst { .. })
        ));
    }

    #[test]
    fn slows_near_full_extension() {
        let mut kin = homed();
        let start = Coord::new(200.0, 0.0, 10.0);

        let mut m = Move::new(start, Coord::new(150.0, 0.0, 10.0), 300.0, 3000.0);
        kin.check_move(&mut m).unwrap();
        assert_eq!(m.velocity(), 300.0);

        let mut m = Move::new(start, Coord::new(267.5, 0.0, 10.0), 300.0, 3000.0);
        kin.check_move(&mut m).unwrap();
        assert_eq!(kin.zones.tier(267.5 * 267.5), SpeedTier::Half);
        assert_eq!(m.velocity(), 150.0);

        let mut m = Move::new(start, Coord::new(269.5, 0.0, 10.0), 300.0, 3000.0);
        kin.check_move(&mut m).unwrap();
        assert_eq!(m.velocity(), 75.0);
    }
}
