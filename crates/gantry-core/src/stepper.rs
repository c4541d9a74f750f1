//! Actuators: steppers and the rails that carry their homing metadata.

use crate::{
    config::{ConfigError, FloatOption, StepperConfig},
    itersolve::{ActiveFlags, CalcPositionCallback},
    kinematics::StepperKinematics,
    mathutil::Coord,
};
use rustc_hash::FxHashMap;

/// Actuator readings keyed by stepper name.
pub type StepperPositions = FxHashMap<String, f64>;

const DEFAULT_FULL_STEPS: u32 = 200;

/// A single motor and the step-generator handle configured for it.
#[derive(Debug, Clone)]
pub struct Stepper {
    name: String,
    step_dist: f64,
    kin: StepperKinematics,
    commanded_pos: f64,
}

impl Stepper {
    pub fn new(name: impl Into<String>, step_dist: f64, kin: StepperKinematics) -> Self {
        Self {
            name: name.into(),
            step_dist,
            kin,
            commanded_pos: 0.0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signed distance per step; negative means an inverted direction pin
    pub fn step_dist(&self) -> f64 {
        self.step_dist
    }

    /// Handle the step generator evaluates for this stepper
    pub fn kinematics(&self) -> &StepperKinematics {
        &self.kin
    }

    pub(crate) fn set_kinematics(&mut self, kin: StepperKinematics) {
        self.kin = kin;
    }

    pub fn active_flags(&self) -> ActiveFlags {
        self.kin.active_flags()
    }

    pub fn commanded_position(&self) -> f64 {
        self.commanded_pos
    }

    /// Whole steps from the zero position, as the MCU would count them
    pub fn mcu_position(&self) -> i64 {
        (self.commanded_pos / self.step_dist).round() as i64
    }

    pub fn calc_position_from_coord(&self, c: Coord) -> f64 {
        self.kin.calc_position_from_coord(c)
    }

    /// Park the stepper at the actuator position matching toolhead `c`
    pub fn set_position(&mut self, c: Coord) {
        self.commanded_pos = self.calc_position_from_coord(c);
    }
}

/// How a rail approaches its endstop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HomingInfo {
    pub speed: f64,
    pub position_endstop: f64,
    pub retract_speed: f64,
    pub retract_dist: f64,
    pub positive_dir: bool,
    pub second_homing_speed: f64,
}

/// Construction switches for [`Rail::from_config`].
#[derive(Debug, Clone, Copy)]
pub struct RailOptions {
    pub need_position_minmax: bool,
    pub need_position_endstop: bool,
    pub default_position_endstop: Option<f64>,
    /// Step distance is configured in degrees and stored in radians
    pub units_in_radians: bool,
    /// Endstop and range are configured in degrees and stored in radians
    pub angular_range: bool,
}

impl Default for RailOptions {
    fn default() -> Self {
        Self {
            need_position_minmax: true,
            need_position_endstop: true,
            default_position_endstop: None,
            units_in_radians: false,
            angular_range: false,
        }
    }
}

/// A stepper plus its configured travel range and homing mechanics.
#[derive(Debug, Clone)]
pub struct Rail {
    stepper: Stepper,
    position_min: f64,
    position_max: f64,
    homing: HomingInfo,
}

impl Rail {
    pub fn new(stepper: Stepper, range: (f64, f64), homing: HomingInfo) -> Self {
        Self {
            stepper,
            position_min: range.0,
            position_max: range.1,
            homing,
        }
    }

    pub fn from_config(
        name: &str,
        config: &StepperConfig,
        kin: StepperKinematics,
        opts: RailOptions,
    ) -> Result<Self, ConfigError> {
        let step_dist = step_distance(name, config, opts.units_in_radians)?;
        let angle_scale = if opts.angular_range {
            std::f64::consts::PI / 180.0
        } else {
            1.0
        };

        let endstop = FloatOption::new(name, "position_endstop", config.position_endstop);
        let position_endstop = match (opts.need_position_endstop, opts.default_position_endstop) {
            (false, _) => endstop.default(0.0).get()?,
            (true, Some(default)) => endstop.default(default).get()?,
            (true, None) => endstop.get()?,
        };

        let (position_min, position_max) = if opts.need_position_minmax {
            let min = FloatOption::new(name, "position_min", config.position_min)
                .default(0.0)
                .get()?;
            let max = FloatOption::new(name, "position_max", config.position_max)
                .above(min)
                .get()?;
            (min, max)
        } else {
            (0.0, position_endstop)
        };

        if opts.need_position_endstop
            && (position_endstop < position_min || position_endstop > position_max)
        {
            return Err(ConfigError::Invalid {
                section: name.to_string(),
                option: "position_endstop",
                reason: "must be between position_min and position_max".into(),
            });
        }

        let speed = FloatOption::new(name, "homing_speed", config.homing_speed)
            .default(5.0)
            .above(0.0)
            .get()?;
        let second_homing_speed =
            FloatOption::new(name, "second_homing_speed", config.second_homing_speed)
                .default(speed / 2.0)
                .above(0.0)
                .get()?;
        let retract_speed =
            FloatOption::new(name, "homing_retract_speed", config.homing_retract_speed)
                .default(speed)
                .above(0.0)
                .get()?;
        let retract_dist =
            FloatOption::new(name, "homing_retract_dist", config.homing_retract_dist)
                .default(5.0)
                .minval(0.0)
                .get()?;

        let positive_dir = match config.homing_positive_dir {
            Some(dir) => dir,
            None if !opts.need_position_endstop => false,
            None => {
                let axis_len = position_max - position_min;
                if position_endstop <= position_min + axis_len / 4.0 {
                    false
                } else if position_endstop >= position_max - axis_len / 4.0 {
                    true
                } else {
                    return Err(ConfigError::Invalid {
                        section: name.to_string(),
                        option: "homing_positive_dir",
                        reason: "cannot be inferred and must be specified".into(),
                    });
                }
            }
        };

        Ok(Self {
            stepper: Stepper::new(name, step_dist, kin),
            position_min: position_min * angle_scale,
            position_max: position_max * angle_scale,
            homing: HomingInfo {
                speed,
                position_endstop: position_endstop * angle_scale,
                retract_speed,
                retract_dist,
                positive_dir,
                second_homing_speed,
            },
        })
    }

    pub fn name(&self) -> &str {
        self.stepper.name()
    }

    pub fn stepper(&self) -> &Stepper {
        &self.stepper
    }

    pub fn stepper_mut(&mut self) -> &mut Stepper {
        &mut self.stepper
    }

    /// Configured `(position_min, position_max)`
    pub fn range(&self) -> (f64, f64) {
        (self.position_min, self.position_max)
    }

    pub fn homing_info(&self) -> &HomingInfo {
        &self.homing
    }

    pub fn set_position(&mut self, c: Coord) {
        self.stepper.set_position(c);
    }

    pub fn commanded_position(&self) -> f64 {
        self.stepper.commanded_position()
    }
}

fn step_distance(
    name: &str,
    config: &StepperConfig,
    units_in_radians: bool,
) -> Result<f64, ConfigError> {
    let dist = match (config.step_distance, config.rotation_distance) {
        (Some(step), _) => step,
        (None, Some(rotation)) => {
            let full_steps = config.full_steps_per_rotation.unwrap_or(DEFAULT_FULL_STEPS);
            let microsteps = config.microsteps.ok_or_else(|| ConfigError::MissingOption {
                section: name.to_string(),
                option: "microsteps",
            })?;
            if full_steps == 0 || microsteps == 0 {
                return Err(ConfigError::Invalid {
                    section: name.to_string(),
                    option: "microsteps",
                    reason: "must be above 0".into(),
                });
            }
            rotation / f64::from(full_steps * microsteps)
        }
        (None, None) => {
            return Err(ConfigError::MissingOption {
                section: name.to_string(),
                option: "step_distance",
            });
        }
    };

    if dist == 0.0 || !dist.is_finite() {
        return Err(ConfigError::Invalid {
            section: name.to_string(),
            option: "step_distance",
            reason: "must be non-zero".into(),
        });
    }

    Ok(if units_in_radians {
        dist.to_radians()
    } else {
        dist
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinematics::cartesian::{Axis, CartesianStepper};

    fn x_kin() -> StepperKinematics {
        StepperKinematics::Cartesian(CartesianStepper::new(Axis::X))
    }

    fn section() -> StepperConfig {
        StepperConfig {
            step_distance: Some(0.0125),
            position_endstop: Some(0.0),
            position_max: Some(200.0),
            ..StepperConfig::default()
        }
    }

    #[test]
    fn rail_defaults_follow_homing_speed() {
        let rail = Rail::from_config("stepper_x", &section(), x_kin(), RailOptions::default())
            .unwrap();
        let hi = rail.homing_info();
        assert_eq!(rail.range(), (0.0, 200.0));
        assert_eq!(hi.speed, 5.0);
        assert_eq!(hi.second_homing_speed, 2.5);
        assert_eq!(hi.retract_speed, 5.0);
        assert_eq!(hi.retract_dist, 5.0);
        assert!(!hi.positive_dir);
    }

    #[test]
    fn rail_infers_positive_dir_from_endstop() {
        let mut cfg = section();
        cfg.position_endstop = Some(195.0);
        let rail = Rail::from_config("stepper_x", &cfg, x_kin(), RailOptions::default()).unwrap();
        assert!(rail.homing_info().positive_dir);

        cfg.position_endstop = Some(100.0);
        let err = Rail::from_config("stepper_x", &cfg, x_kin(), RailOptions::default());
        assert!(matches!(
            err,
            Err(ConfigError::Invalid {
                option: "homing_positive_dir",
                ..
            })
        ));
    }

    #[test]
    fn rail_rejects_endstop_outside_range() {
        let mut cfg = section();
        cfg.position_endstop = Some(250.0);
        let err = Rail::from_config("stepper_x", &cfg, x_kin(), RailOptions::default());
        assert!(matches!(
            err,
            Err(ConfigError::Invalid {
                option: "position_endstop",
                ..
            })
        ));
    }

    #[test]
    fn step_distance_from_rotation_distance() {
        let cfg = StepperConfig {
            step_distance: None,
            rotation_distance: Some(40.0),
            microsteps: Some(16),
            ..section()
        };
        let rail = Rail::from_config("stepper_x", &cfg, x_kin(), RailOptions::default()).unwrap();
        assert_eq!(rail.stepper().step_dist(), 40.0 / 3200.0);

        let cfg = StepperConfig {
            step_distance: None,
            ..section()
        };
        assert!(Rail::from_config("stepper_x", &cfg, x_kin(), RailOptions::default()).is_err());
    }

    #[test]
    fn rail_without_minmax_spans_zero_to_endstop() {
        let cfg = StepperConfig {
            position_max: None,
            position_endstop: Some(250.0),
            ..section()
        };
        let opts = RailOptions {
            need_position_minmax: false,
            ..RailOptions::default()
        };
        let rail = Rail::from_config("stepper_a", &cfg, x_kin(), opts).unwrap();
        assert_eq!(rail.range(), (0.0, 250.0));
        assert!(rail.homing_info().positive_dir);
    }

    #[test]
    fn stepper_tracks_commanded_position() {
        let mut stepper = Stepper::new("stepper_x", 0.01, x_kin());
        stepper.set_position(Coord::new(12.5, 1.0, 2.0));
        assert_eq!(stepper.commanded_position(), 12.5);
        assert_eq!(stepper.mcu_position(), 1250);
    }
}
