// Rotary delta kinematics

use crate::{
    boundary::check_reachable,
    config::{ConfigError, ConfigUpdates, FloatOption, MachineConfig, StepperConfig, set_update},
    homing::{HomingError, HomingState},
    itersolve::{ActiveFlags, CalcPositionCallback, Segment},
    kinematics::{Axes, KinematicsEngine, KinematicsStatus, StepperKinematics, reading},
    mathutil::{Coord, trilateration},
    planner::{Move, MoveError},
    stepper::{Rail, RailOptions, StepperPositions},
};
use std::f64::consts::FRAC_PI_2;

const SHOULDERS: [&str; 3] = ["a", "b", "c"];
const DEFAULT_ANGLES: [f64; 3] = [30.0, 150.0, 270.0];

/// Step handle for one shoulder motor; positions are upper arm angles
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotaryDeltaStepper {
    shoulder_radius: f64,
    shoulder_height: f64,
    cos: f64,
    sin: f64,
    upper_arm: f64,
    upper_arm2: f64,
    lower_arm2: f64,
}

impl RotaryDeltaStepper {
    /// `angle` is the shoulder's direction around the Z axis in radians
    pub fn new(
        shoulder_radius: f64,
        shoulder_height: f64,
        angle: f64,
        upper_arm: f64,
        lower_arm: f64,
    ) -> Self {
        Self {
            shoulder_radius,
            shoulder_height,
            cos: angle.cos(),
            sin: angle.sin(),
            upper_arm,
            upper_arm2: upper_arm * upper_arm,
            lower_arm2: lower_arm * lower_arm,
        }
    }

    pub fn active_flags(&self) -> ActiveFlags {
        ActiveFlags::xyz()
    }
}

impl CalcPositionCallback for RotaryDeltaStepper {
    fn calc_position(&self, m: &Segment, move_time: f64) -> f64 {
        let c = m.coord(move_time);
        // Shoulder frame: origin at the joint, upper arm swings in the XZ plane
        let x = c.x * self.cos + c.y * self.sin - self.shoulder_radius;
        let y = -c.x * self.sin + c.y * self.cos;
        let z = c.z - self.shoulder_height;

        let k = (x * x + y * y + z * z + self.upper_arm2 - self.lower_arm2) / (2.0 * self.upper_arm);
        let xz = (x * x + z * z).sqrt();
        z.atan2(x) + (k / xz).acos()
    }
}

/// Rotary delta geometry, shared by the engine and calibration tooling.
#[derive(Debug, Clone, PartialEq)]
pub struct RotaryDeltaCalibration {
    pub shoulder_radius: f64,
    pub shoulder_height: f64,
    pub angles: [f64; 3],
    pub upper_arms: [f64; 3],
    pub lower_arms: [f64; 3],
    pub endstops: [f64; 3],
    pub stepdists: [f64; 3],
}

impl RotaryDeltaCalibration {
    /// Elbow position with shoulder `elbow_id` at angle `spos` (radians)
    pub fn elbow_coord(&self, elbow_id: usize, spos: f64) -> Coord {
        let sj_elbow_x = self.upper_arms[elbow_id] * spos.cos();
        let sj_elbow_z = self.upper_arms[elbow_id] * spos.sin();
        let angle = self.angles[elbow_id].to_radians();
        Coord::new(
            (sj_elbow_x + self.shoulder_radius) * angle.cos(),
            (sj_elbow_x + self.shoulder_radius) * angle.sin(),
            sj_elbow_z + self.shoulder_height,
        )
    }

    pub fn actuator_to_cartesian(&self, spos: [f64; 3]) -> Coord {
        let centers = [0, 1, 2].map(|i| self.elbow_coord(i, spos[i]));
        trilateration(centers, self.lower_arms.map(|la| la * la))
    }

    pub fn save_state(&self) -> ConfigUpdates {
        let mut updates = ConfigUpdates::new();
        set_update(&mut updates, "printer", "shoulder_radius", self.shoulder_radius);
        set_update(&mut updates, "printer", "shoulder_height", self.shoulder_height);
        for (i, shoulder) in SHOULDERS.iter().enumerate() {
            let section = format!("stepper_{shoulder}");
            set_update(&mut updates, &section, "angle", self.angles[i]);
            set_update(&mut updates, &section, "upper_arm_length", self.upper_arms[i]);
            set_update(&mut updates, &section, "lower_arm_length", self.lower_arms[i]);
            set_update(&mut updates, &section, "position_endstop", self.endstops[i]);
        }
        updates
    }
}

/// Three shoulder motors swinging upper arms, joined to the effector by
/// parallel lower arms.
#[derive(Debug)]
pub struct RotaryDeltaKinematics {
    rails: Vec<Rail>,
    calibration: RotaryDeltaCalibration,
    max_z_velocity: f64,
    home_position: Coord,
    max_z: f64,
    min_z: f64,
    limit_z: f64,
    max_xy2: f64,
    need_home: bool,
    limit_xy2: f64,
    axes_min: Coord,
    axes_max: Coord,
}

impl RotaryDeltaKinematics {
    pub fn from_config(config: &MachineConfig) -> Result<Self, ConfigError> {
        let printer = &config.printer;
        let sections: Vec<(String, &StepperConfig)> = SHOULDERS
            .iter()
            .map(|s| {
                let name = format!("stepper_{s}");
                let section = config.stepper(&name)?;
                Ok((name, section))
            })
            .collect::<Result<_, ConfigError>>()?;

        let max_velocity = FloatOption::new("printer", "max_velocity", Some(printer.max_velocity))
            .above(0.0)
            .get()?;
        let max_z_velocity = FloatOption::new("printer", "max_z_velocity", printer.max_z_velocity)
            .default(max_velocity)
            .above(0.0)
            .maxval(max_velocity)
            .get()?;
        let shoulder_radius = FloatOption::new("printer", "shoulder_radius", printer.shoulder_radius)
            .above(0.0)
            .get()?;
        let shoulder_height = FloatOption::new("printer", "shoulder_height", printer.shoulder_height)
            .above(0.0)
            .get()?;

        let (name_a, section_a) = &sections[0];
        let upper_a = FloatOption::new(name_a, "upper_arm_length", section_a.upper_arm_length)
            .above(0.0)
            .get()?;
        let lower_a = FloatOption::new(name_a, "lower_arm_length", section_a.lower_arm_length)
            .above(0.0)
            .get()?;
        let mut upper_arms = [0.0; 3];
        let mut lower_arms = [0.0; 3];
        let mut angles = [0.0; 3];
        for (i, (name, section)) in sections.iter().enumerate() {
            upper_arms[i] = FloatOption::new(name, "upper_arm_length", section.upper_arm_length)
                .default(upper_a)
                .above(0.0)
                .get()?;
            lower_arms[i] = FloatOption::new(name, "lower_arm_length", section.lower_arm_length)
                .default(lower_a)
                .above(0.0)
                .get()?;
            angles[i] = FloatOption::new(name, "angle", section.angle)
                .default(DEFAULT_ANGLES[i])
                .get()?;
        }

        let mut rails = Vec::with_capacity(3);
        let mut endstop_a = None;
        for (i, (name, section)) in sections.iter().enumerate() {
            let kin = RotaryDeltaStepper::new(
                shoulder_radius,
                shoulder_height,
                angles[i].to_radians(),
                upper_arms[i],
                lower_arms[i],
            );
            let rail = Rail::from_config(
                name,
                section,
                StepperKinematics::RotaryDelta(kin),
                RailOptions {
                    need_position_minmax: false,
                    default_position_endstop: endstop_a,
                    units_in_radians: true,
                    ..RailOptions::default()
                },
            )?;
            if endstop_a.is_none() {
                endstop_a = Some(rail.homing_info().position_endstop);
            }
            rails.push(rail);
        }

        // Endstops are configured as effector heights on the center line
        let endstops = [0, 1, 2].map(|i| rails[i].homing_info().position_endstop);
        let calibration = RotaryDeltaCalibration {
            shoulder_radius,
            shoulder_height,
            angles,
            upper_arms,
            lower_arms,
            endstops,
            stepdists: [0, 1, 2].map(|i| rails[i].stepper().step_dist()),
        };
        let eangles = [0, 1, 2].map(|i| {
            rails[i]
                .stepper()
                .calc_position_from_coord(Coord::new(0.0, 0.0, endstops[i]))
        });
        let home_position = calibration.actuator_to_cartesian(eangles);
        if !home_position.is_finite() {
            return Err(ConfigError::Invalid {
                section: "stepper_a".into(),
                option: "position_endstop",
                reason: "is not reachable by the arms".into(),
            });
        }

        let max_z = endstops.into_iter().fold(f64::INFINITY, f64::min);
        let min_z = FloatOption::new("printer", "minimum_z_position", printer.minimum_z_position)
            .default(0.0)
            .maxval(max_z)
            .get()?;
        let min_ua = upper_arms
            .map(|ua| shoulder_radius + ua)
            .into_iter()
            .fold(f64::INFINITY, f64::min);
        let min_la = lower_arms
            .map(|la| la - shoulder_radius)
            .into_iter()
            .fold(f64::INFINITY, f64::min);
        let max_xy = min_ua.min(min_la);
        let limit_z = [0, 1, 2]
            .map(|i| calibration.elbow_coord(i, eangles[i]).z - lower_arms[i])
            .into_iter()
            .fold(f64::INFINITY, f64::min);
        tracing::info!(
            "Delta max build height {:.2}mm (radius tapered above {:.2}mm)",
            max_z,
            limit_z
        );

        let mut kin = Self {
            rails,
            calibration,
            max_z_velocity,
            home_position,
            max_z,
            min_z,
            limit_z,
            max_xy2: max_xy * max_xy,
            need_home: true,
            limit_xy2: -1.0,
            axes_min: Coord::new(-max_xy, -max_xy, min_z),
            axes_max: Coord::new(max_xy, max_xy, max_z),
        };
        kin.set_position(Coord::ORIGIN, Axes::NONE);
        Ok(kin)
    }

    pub fn calibration(&self) -> &RotaryDeltaCalibration {
        &self.calibration
    }

    pub fn home_position(&self) -> Coord {
        self.home_position
    }
}

impl KinematicsEngine for RotaryDeltaKinematics {
    fn rails(&self) -> &[Rail] {
        &self.rails
    }

    fn calc_position(&self, positions: &StepperPositions) -> Coord {
        let spos = [0, 1, 2].map(|i| reading(positions, self.rails[i].name()));
        self.calibration.actuator_to_cartesian(spos)
    }

    fn set_position(&mut self, newpos: Coord, homing_axes: Axes) {
        for rail in &mut self.rails {
            rail.set_position(newpos);
        }
        self.limit_xy2 = -1.0;
        if homing_axes == Axes::XYZ {
            self.need_home = false;
        }
    }

    fn clear_homing_state(&mut self, axes: Axes) {
        if !axes.is_empty() {
            self.limit_xy2 = -1.0;
            self.need_home = true;
        }
    }

    fn home(&mut self, homing: &mut HomingState<'_>) -> Result<(), HomingError> {
        homing.set_axes(Axes::XYZ);
        let home = self.home_position;
        // Start the search as if every upper arm hung straight down
        let low = self
            .calibration
            .actuator_to_cartesian([-FRAC_PI_2; 3])
            .z;
        let force_z = if low.is_finite() { low } else { -1.0 };
        let forcepos = [Some(home.x), Some(home.y), Some(force_z)];
        let homepos = [Some(home.x), Some(home.y), Some(home.z)];
        homing.home_rails(self, &[0, 1, 2], forcepos, homepos)
    }

    fn check_move(&mut self, m: &mut Move) -> Result<(), MoveError> {
        let end_pos = m.end_pos;
        let end_xy2 = end_pos.xy_magsq();
        if end_xy2 <= self.limit_xy2 && !m.moves_axis(2) {
            return Ok(());
        }
        if self.need_home {
            return Err(m.must_home());
        }

        let end_z = end_pos.z;
        let mut limit_xy2 = self.max_xy2;
        if end_z > self.limit_z {
            limit_xy2 = limit_xy2.min((self.max_z - end_z).powi(2));
        }
        if end_xy2 > limit_xy2 || end_z > self.max_z || end_z < self.min_z {
            let is_homing_move = end_pos.x == self.home_position.x
                && end_pos.y == self.home_position.y
                && end_z >= self.min_z
                && end_z <= self.home_position.z;
            if !is_homing_move {
                return Err(m.out_of_range());
            }
            limit_xy2 = -1.0;
        }
        check_reachable(&self.rails, m)?;
        if m.moves_axis(2) {
            let accel = m.accel();
            m.limit_speed(self.max_z_velocity, accel);
            limit_xy2 = -1.0;
        }
        self.limit_xy2 = limit_xy2;
        Ok(())
    }

    fn status(&self, _eventtime: f64) -> KinematicsStatus {
        KinematicsStatus {
            homed_axes: if self.need_home { "" } else { "xyz" }.to_string(),
            axis_minimum: self.axes_min,
            axis_maximum: self.axes_max,
            cone_start_z: None,
        }
    }
}
