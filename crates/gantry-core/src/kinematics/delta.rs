// Delta kinematics

use crate::{
    boundary::{SLOW_RATIO, SlowZones, SpeedTier, ZSpeedLimit, check_reachable},
    config::{ConfigError, ConfigUpdates, FloatOption, MachineConfig, StepperConfig, set_update},
    homing::{HomingError, HomingState},
    itersolve::{ActiveFlags, CalcPositionCallback, Segment},
    kinematics::{Axes, KinematicsEngine, KinematicsStatus, StepperKinematics, ToolheadLimits, reading},
    mathutil::{Coord, Params, coordinate_descent, trilateration},
    planner::{Move, MoveError},
    stepper::{Rail, RailOptions, StepperPositions},
};

const TOWERS: [&str; 3] = ["a", "b", "c"];
const DEFAULT_ANGLES: [f64; 3] = [210.0, 330.0, 90.0];

/// Step handle for one tower carriage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeltaStepper {
    arm2: f64,
    tower_x: f64,
    tower_y: f64,
}

impl DeltaStepper {
    pub fn new(arm2: f64, tower_x: f64, tower_y: f64) -> Self {
        Self {
            arm2,
            tower_x,
            tower_y,
        }
    }

    pub fn active_flags(&self) -> ActiveFlags {
        ActiveFlags::xyz()
    }
}

impl CalcPositionCallback for DeltaStepper {
    fn calc_position(&self, m: &Segment, move_time: f64) -> f64 {
        let c = m.coord(move_time);
        let dx = self.tower_x - c.x;
        let dy = self.tower_y - c.y;
        (self.arm2 - dx * dx - dy * dy).sqrt() + c.z
    }
}

fn tower_positions(radius: f64, angles: &[f64; 3]) -> [(f64, f64); 3] {
    angles.map(|angle| {
        let angle = angle.to_radians();
        (angle.cos() * radius, angle.sin() * radius)
    })
}

/// Three vertical towers whose carriages push a shared effector through
/// fixed-length arm pairs.
#[derive(Debug)]
pub struct DeltaKinematics {
    rails: Vec<Rail>,
    toolhead: ToolheadLimits,
    z_limit: ZSpeedLimit,
    radius: f64,
    angles: [f64; 3],
    arm_lengths: [f64; 3],
    arm2: [f64; 3],
    towers: [(f64, f64); 3],
    abs_endstops: [f64; 3],
    home_position: Coord,
    max_z: f64,
    min_z: f64,
    /// Height above which the reachable radius tapers
    limit_z: f64,
    min_arm_length: f64,
    max_xy2: f64,
    zones: SlowZones,
    need_home: bool,
    /// Radius² inside which flat moves skip the envelope checks
    limit_xy2: f64,
    axes_min: Coord,
    axes_max: Coord,
}

impl DeltaKinematics {
    pub fn from_config(config: &MachineConfig) -> Result<Self, ConfigError> {
        let printer = &config.printer;
        let sections: Vec<(String, &StepperConfig)> = TOWERS
            .iter()
            .map(|t| {
                let name = format!("stepper_{t}");
                let section = config.stepper(&name)?;
                Ok((name, section))
            })
            .collect::<Result<_, ConfigError>>()?;

        let radius = FloatOption::new("printer", "delta_radius", printer.delta_radius)
            .above(0.0)
            .get()?;
        let print_radius = FloatOption::new("printer", "print_radius", printer.print_radius)
            .default(radius)
            .above(0.0)
            .get()?;
        let arm_length_a = FloatOption::new(&sections[0].0, "arm_length", sections[0].1.arm_length)
            .above(radius)
            .get()?;

        let mut arm_lengths = [0.0; 3];
        let mut angles = [0.0; 3];
        for (i, (name, section)) in sections.iter().enumerate() {
            arm_lengths[i] = FloatOption::new(name, "arm_length", section.arm_length)
                .default(arm_length_a)
                .above(radius)
                .get()?;
            angles[i] = FloatOption::new(name, "angle", section.angle)
                .default(DEFAULT_ANGLES[i])
                .get()?;
        }
        let arm2 = arm_lengths.map(|arm| arm * arm);
        let towers = tower_positions(radius, &angles);

        let mut rails = Vec::with_capacity(3);
        let mut endstop_a = None;
        for (i, (name, section)) in sections.iter().enumerate() {
            let (tx, ty) = towers[i];
            let rail = Rail::from_config(
                name,
                section,
                StepperKinematics::Delta(DeltaStepper::new(arm2[i], tx, ty)),
                RailOptions {
                    need_position_minmax: false,
                    default_position_endstop: endstop_a,
                    ..RailOptions::default()
                },
            )?;
            if endstop_a.is_none() {
                endstop_a = Some(rail.homing_info().position_endstop);
            }
            rails.push(rail);
        }

        let toolhead = ToolheadLimits::from_config(printer)?;
        let z_limit = ZSpeedLimit::from_config(printer, toolhead)?;

        let endstops = [0, 1, 2].map(|i| rails[i].homing_info().position_endstop);
        let abs_endstops = [0, 1, 2].map(|i| endstops[i] + (arm2[i] - radius * radius).sqrt());
        let home_position = actuator_to_cartesian(&towers, &arm2, abs_endstops);

        let max_z = endstops.into_iter().fold(f64::INFINITY, f64::min);
        let min_z = FloatOption::new("printer", "minimum_z_position", printer.minimum_z_position)
            .default(0.0)
            .maxval(max_z)
            .get()?;
        let limit_z = [0, 1, 2]
            .map(|i| abs_endstops[i] - arm_lengths[i])
            .into_iter()
            .fold(f64::INFINITY, f64::min);
        let min_arm_length = arm_lengths.into_iter().fold(f64::INFINITY, f64::min);
        tracing::info!(
            "Delta max build height {:.2}mm (radius tapered above {:.2}mm)",
            max_z,
            limit_z
        );

        // Past these radii an XY move would need excessive tower movement
        let half_min_step_dist = rails
            .iter()
            .map(|r| r.stepper().step_dist().abs())
            .fold(f64::INFINITY, f64::min)
            * 0.5;
        let ratio_to_xy = |ratio: f64| {
            ratio
                * (min_arm_length * min_arm_length / (ratio * ratio + 1.0)
                    - half_min_step_dist * half_min_step_dist)
                    .sqrt()
                + half_min_step_dist
                - radius
        };
        let zones = SlowZones {
            slow2: ratio_to_xy(SLOW_RATIO).powi(2),
            very_slow2: ratio_to_xy(2.0 * SLOW_RATIO).powi(2),
        };
        let max_xy = print_radius
            .min(min_arm_length - radius)
            .min(ratio_to_xy(4.0 * SLOW_RATIO));
        tracing::info!(
            "Delta max build radius {:.2}mm (moves slowed past {:.2}mm and {:.2}mm)",
            max_xy,
            zones.slow2.sqrt(),
            zones.very_slow2.sqrt()
        );

        let mut kin = Self {
            rails,
            toolhead,
            z_limit,
            radius,
            angles,
            arm_lengths,
            arm2,
            towers,
            abs_endstops,
            home_position,
            max_z,
            min_z,
            limit_z,
            min_arm_length,
            max_xy2: max_xy * max_xy,
            zones,
            need_home: true,
            limit_xy2: -1.0,
            axes_min: Coord::new(-max_xy, -max_xy, min_z),
            axes_max: Coord::new(max_xy, max_xy, max_z),
        };
        kin.set_position(Coord::ORIGIN, Axes::NONE);
        Ok(kin)
    }

    /// Effector position with every carriage at its endstop
    pub fn home_position(&self) -> Coord {
        self.home_position
    }

    /// Carriage heights at the endstops
    pub fn abs_endstops(&self) -> [f64; 3] {
        self.abs_endstops
    }

    pub fn calibration(&self) -> DeltaCalibration {
        DeltaCalibration::new(
            self.radius,
            self.angles,
            self.arm_lengths,
            [0, 1, 2].map(|i| self.rails[i].homing_info().position_endstop),
            [0, 1, 2].map(|i| self.rails[i].stepper().step_dist()),
        )
    }
}

fn actuator_to_cartesian(towers: &[(f64, f64); 3], arm2: &[f64; 3], spos: [f64; 3]) -> Coord {
    let centers = [0, 1, 2].map(|i| Coord::new(towers[i].0, towers[i].1, spos[i]));
    trilateration(centers, *arm2)
}

impl KinematicsEngine for DeltaKinematics {
    fn rails(&self) -> &[Rail] {
        &self.rails
    }

    fn calc_position(&self, positions: &StepperPositions) -> Coord {
        let spos = [0, 1, 2].map(|i| reading(positions, self.rails[i].name()));
        actuator_to_cartesian(&self.towers, &self.arm2, spos)
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
        // Towers cannot be unhomed individually
        if !axes.is_empty() {
            self.limit_xy2 = -1.0;
            self.need_home = true;
        }
    }

    fn home(&mut self, homing: &mut HomingState<'_>) -> Result<(), HomingError> {
        homing.set_axes(Axes::XYZ);
        let max_arm2 = self.arm2.into_iter().fold(0.0, f64::max);
        let home = self.home_position;
        let forcepos = [
            Some(home.x),
            Some(home.y),
            Some(-1.5 * (max_arm2 - self.max_xy2).sqrt()),
        ];
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
            let above_z_limit = end_z - self.limit_z;
            let allowed_radius = self.radius
                - (self.min_arm_length.powi(2) - (self.min_arm_length - above_z_limit).powi(2))
                    .sqrt();
            limit_xy2 = limit_xy2.min(allowed_radius * allowed_radius);
        }
        if end_xy2 > limit_xy2 || end_z > self.max_z || end_z < self.min_z {
            // Only the move back to the top of the towers may leave the envelope
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
            self.z_limit.apply(m);
            limit_xy2 = -1.0;
        }

        let extreme_xy2 = end_xy2.max(m.start_pos.xy_magsq());
        let tier = self.zones.apply(
            m,
            extreme_xy2,
            self.toolhead.max_velocity,
            self.toolhead.max_accel,
        );
        if tier != SpeedTier::Full {
            limit_xy2 = -1.0;
        }
        self.limit_xy2 = limit_xy2.min(self.zones.slow2);
        Ok(())
    }

    fn status(&self, _eventtime: f64) -> KinematicsStatus {
        KinematicsStatus {
            homed_axes: if self.need_home { "" } else { "xyz" }.to_string(),
            axis_minimum: self.axes_min,
            axis_maximum: self.axes_max,
            cone_start_z: Some(self.limit_z),
        }
    }
}

/// Delta geometry parameters in a form suitable for calibration.
///
/// A "stable position" is a carriage offset from its endstop measured in
/// steps, which stays meaningful while the geometry parameters change.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaCalibration {
    pub radius: f64,
    pub angles: [f64; 3],
    pub arms: [f64; 3],
    pub endstops: [f64; 3],
    pub stepdists: [f64; 3],
    towers: [(f64, f64); 3],
    abs_endstops: [f64; 3],
}

impl DeltaCalibration {
    pub fn new(
        radius: f64,
        angles: [f64; 3],
        arms: [f64; 3],
        endstops: [f64; 3],
        stepdists: [f64; 3],
    ) -> Self {
        let towers = tower_positions(radius, &angles);
        let abs_endstops = [0, 1, 2].map(|i| endstops[i] + (arms[i] * arms[i] - radius * radius).sqrt());
        Self {
            radius,
            angles,
            arms,
            endstops,
            stepdists,
            towers,
            abs_endstops,
        }
    }

    /// Parameter names and values for [`coordinate_descent`]
    pub fn coordinate_descent_params(&self, extended: bool) -> (Vec<&'static str>, Params) {
        let mut adj_params = vec![
            "radius",
            "angle_a",
            "angle_b",
            "endstop_a",
            "endstop_b",
            "endstop_c",
        ];
        if extended {
            adj_params.extend(["arm_a", "arm_b", "arm_c"]);
        }
        let mut params = Params::new();
        params.insert("radius".into(), self.radius);
        for (i, tower) in TOWERS.iter().enumerate() {
            params.insert(format!("angle_{tower}"), self.angles[i]);
            params.insert(format!("arm_{tower}"), self.arms[i]);
            params.insert(format!("endstop_{tower}"), self.endstops[i]);
            params.insert(format!("stepdist_{tower}"), self.stepdists[i]);
        }
        (adj_params, params)
    }

    pub fn from_params(params: &Params) -> Self {
        let get = |key: String| params.get(&key).copied().unwrap_or(f64::NAN);
        Self::new(
            get("radius".into()),
            TOWERS.map(|t| get(format!("angle_{t}"))),
            TOWERS.map(|t| get(format!("arm_{t}"))),
            TOWERS.map(|t| get(format!("endstop_{t}"))),
            TOWERS.map(|t| get(format!("stepdist_{t}"))),
        )
    }

    pub fn get_position_from_stable(&self, stable_position: [f64; 3]) -> Coord {
        let centers = [0, 1, 2].map(|i| {
            let (tx, ty) = self.towers[i];
            Coord::new(tx, ty, self.abs_endstops[i] - stable_position[i] * self.stepdists[i])
        });
        trilateration(centers, self.arms.map(|a| a * a))
    }

    pub fn calc_stable_position(&self, coord: Coord) -> [f64; 3] {
        [0, 1, 2].map(|i| {
            let (tx, ty) = self.towers[i];
            let steppos = (self.arms[i].powi(2) - (tx - coord.x).powi(2) - (ty - coord.y).powi(2))
                .sqrt()
                + coord.z;
            (self.abs_endstops[i] - steppos) / self.stepdists[i]
        })
    }

    /// Fit the geometry to probed heights.
    ///
    /// Each sample pairs the expected Z with the stable position recorded
    /// when the probe triggered there.
    pub fn calibrate(&self, heights: &[(f64, [f64; 3])], extended: bool) -> DeltaCalibration {
        let (adj_params, params) = self.coordinate_descent_params(extended);
        let error = |params: &Params| {
            let cal = DeltaCalibration::from_params(params);
            let total: f64 = heights
                .iter()
                .map(|(z, stable)| (cal.get_position_from_stable(*stable).z - z).powi(2))
                .sum();
            if total.is_finite() { total } else { 9_999_999_999_999.9 }
        };
        let new_params = coordinate_descent(&adj_params, &params, error);
        DeltaCalibration::from_params(&new_params)
    }

    /// Values to persist for this calibration
    pub fn save_state(&self) -> ConfigUpdates {
        let mut updates = ConfigUpdates::new();
        set_update(&mut updates, "printer", "delta_radius", self.radius);
        for (i, tower) in TOWERS.iter().enumerate() {
            let section = format!("stepper_{tower}");
            set_update(&mut updates, &section, "angle", self.angles[i]);
            set_update(&mut updates, &section, "arm_length", self.arms[i]);
            set_update(&mut updates, &section, "position_endstop", self.endstops[i]);
        }
        updates
    }
}
