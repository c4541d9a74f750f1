//! Machine description consumed by [`Kinematics::from_config`].
//!
//! The layout mirrors the section-per-stepper style machine configs use: a
//! `[printer]` section naming the kinematics plus one `[stepper_*]` section
//! per actuator. Reading files is left to the caller; this module only
//! defines the serde shapes and the bounds checking helpers.
//!
//! [`Kinematics::from_config`]: crate::kinematics::Kinematics::from_config

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("section '{0}' not found")]
    MissingSection(String),

    #[error("option '{option}' in section '{section}' must be specified")]
    MissingOption {
        section: String,
        option: &'static str,
    },

    #[error("option '{option}' in section '{section}' {reason}")]
    Invalid {
        section: String,
        option: &'static str,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KinematicsType {
    Cartesian,
    Corexy,
    HybridCorexy,
    LimitedCorexy,
    Corexz,
    Delta,
    Deltesian,
    RotaryDelta,
    Winch,
    Scara,
}

/// Which way the SCARA elbow bends when seen from above
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElbowDirection {
    #[default]
    Left,
    Right,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MachineConfig {
    pub printer: PrinterConfig,

    /// Every other section, keyed by name (`stepper_x`, `stepper_a`, ...)
    #[serde(flatten)]
    pub steppers: BTreeMap<String, StepperConfig>,
}

impl MachineConfig {
    pub fn stepper(&self, name: &str) -> Result<&StepperConfig, ConfigError> {
        self.steppers
            .get(name)
            .ok_or_else(|| ConfigError::MissingSection(name.to_string()))
    }

    pub fn has_stepper(&self, name: &str) -> bool {
        self.steppers.contains_key(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrinterConfig {
    pub kinematics: KinematicsType,
    pub max_velocity: f64,
    pub max_accel: f64,
    #[serde(default)]
    pub max_z_velocity: Option<f64>,
    #[serde(default)]
    pub max_z_accel: Option<f64>,
    #[serde(default)]
    pub minimum_z_position: Option<f64>,

    // delta
    #[serde(default)]
    pub delta_radius: Option<f64>,
    #[serde(default)]
    pub print_radius: Option<f64>,

    // deltesian
    #[serde(default)]
    pub min_angle: Option<f64>,
    #[serde(default)]
    pub print_width: Option<f64>,

    // rotary delta
    #[serde(default)]
    pub shoulder_radius: Option<f64>,
    #[serde(default)]
    pub shoulder_height: Option<f64>,

    // limited corexy
    #[serde(default)]
    pub max_x_velocity: Option<f64>,
    #[serde(default)]
    pub max_y_velocity: Option<f64>,
    #[serde(default)]
    pub max_x_accel: Option<f64>,
    #[serde(default)]
    pub max_y_accel: Option<f64>,
    #[serde(default)]
    pub scale_xy_accel: Option<bool>,

    // winch flex compensation
    #[serde(default)]
    pub mover_weight: Option<f64>,
    #[serde(default)]
    pub spring_constant: Option<f64>,
    #[serde(default)]
    pub target_force: Option<f64>,
    #[serde(default)]
    pub min_force: Option<Vec<f64>>,
    #[serde(default)]
    pub max_force: Option<Vec<f64>>,
    #[serde(default)]
    pub guy_wire_lengths: Option<Vec<f64>>,

    // scara
    #[serde(default)]
    pub inner_arm_length: Option<f64>,
    #[serde(default)]
    pub outer_arm_length: Option<f64>,
    #[serde(default)]
    pub elbow_direction: Option<ElbowDirection>,
}

impl PrinterConfig {
    pub fn new(kinematics: KinematicsType, max_velocity: f64, max_accel: f64) -> Self {
        Self {
            kinematics,
            max_velocity,
            max_accel,
            max_z_velocity: None,
            max_z_accel: None,
            minimum_z_position: None,
            delta_radius: None,
            print_radius: None,
            min_angle: None,
            print_width: None,
            shoulder_radius: None,
            shoulder_height: None,
            max_x_velocity: None,
            max_y_velocity: None,
            max_x_accel: None,
            max_y_accel: None,
            scale_xy_accel: None,
            mover_weight: None,
            spring_constant: None,
            target_force: None,
            min_force: None,
            max_force: None,
            guy_wire_lengths: None,
            inner_arm_length: None,
            outer_arm_length: None,
            elbow_direction: None,
        }
    }
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self::new(KinematicsType::Cartesian, 300.0, 3000.0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StepperConfig {
    pub step_distance: Option<f64>,
    pub rotation_distance: Option<f64>,
    pub full_steps_per_rotation: Option<u32>,
    pub microsteps: Option<u32>,

    pub position_endstop: Option<f64>,
    pub position_min: Option<f64>,
    pub position_max: Option<f64>,
    pub homing_speed: Option<f64>,
    pub second_homing_speed: Option<f64>,
    pub homing_retract_dist: Option<f64>,
    pub homing_retract_speed: Option<f64>,
    pub homing_positive_dir: Option<bool>,

    pub arm_length: Option<f64>,
    pub arm_x_length: Option<f64>,
    pub angle: Option<f64>,
    pub upper_arm_length: Option<f64>,
    pub lower_arm_length: Option<f64>,
    pub anchor_x: Option<f64>,
    pub anchor_y: Option<f64>,
    pub anchor_z: Option<f64>,
}

/// A single float option with bounds, resolved against a section.
///
/// ```
/// use gantry_core::config::FloatOption;
///
/// let v = FloatOption::new("printer", "delta_radius", Some(140.0))
///     .above(0.0)
///     .get()
///     .unwrap();
/// assert_eq!(v, 140.0);
/// ```
#[derive(Debug, Clone)]
pub struct FloatOption<'a> {
    section: &'a str,
    option: &'static str,
    value: Option<f64>,
    default: Option<f64>,
    minval: Option<f64>,
    maxval: Option<f64>,
    above: Option<f64>,
    below: Option<f64>,
}

impl<'a> FloatOption<'a> {
    pub fn new(section: &'a str, option: &'static str, value: Option<f64>) -> Self {
        Self {
            section,
            option,
            value,
            default: None,
            minval: None,
            maxval: None,
            above: None,
            below: None,
        }
    }

    pub fn default(mut self, default: f64) -> Self {
        self.default = Some(default);
        self
    }

    pub fn minval(mut self, v: f64) -> Self {
        self.minval = Some(v);
        self
    }

    pub fn maxval(mut self, v: f64) -> Self {
        self.maxval = Some(v);
        self
    }

    pub fn above(mut self, v: f64) -> Self {
        self.above = Some(v);
        self
    }

    pub fn below(mut self, v: f64) -> Self {
        self.below = Some(v);
        self
    }

    fn invalid(&self, reason: String) -> ConfigError {
        ConfigError::Invalid {
            section: self.section.to_string(),
            option: self.option,
            reason,
        }
    }

    pub fn get(self) -> Result<f64, ConfigError> {
        let value = match (self.value, self.default) {
            (Some(v), _) => v,
            // Defaults are trusted and skip the bounds checks
            (None, Some(d)) => return Ok(d),
            (None, None) => {
                return Err(ConfigError::MissingOption {
                    section: self.section.to_string(),
                    option: self.option,
                });
            }
        };

        if !value.is_finite() {
            return Err(self.invalid("must be a finite number".into()));
        }
        if let Some(min) = self.minval {
            if value < min {
                return Err(self.invalid(format!("must have minimum of {min}")));
            }
        }
        if let Some(max) = self.maxval {
            if value > max {
                return Err(self.invalid(format!("must have maximum of {max}")));
            }
        }
        if let Some(above) = self.above {
            if value <= above {
                return Err(self.invalid(format!("must be above {above}")));
            }
        }
        if let Some(below) = self.below {
            if value >= below {
                return Err(self.invalid(format!("must be below {below}")));
            }
        }
        Ok(value)
    }
}

/// Option values to write back, keyed by section then option.
pub type ConfigUpdates = BTreeMap<String, BTreeMap<&'static str, String>>;

pub(crate) fn set_update(
    updates: &mut ConfigUpdates,
    section: &str,
    option: &'static str,
    value: f64,
) {
    updates
        .entry(section.to_string())
        .or_default()
        .insert(option, format!("{value:.6}"));
}

/// Expand a per-anchor list option: a single value applies to every anchor.
pub(crate) fn per_anchor(
    section: &str,
    option: &'static str,
    values: Option<&[f64]>,
    count: usize,
    default: f64,
) -> Result<Vec<f64>, ConfigError> {
    match values {
        None => Ok(vec![default; count]),
        Some([single]) => Ok(vec![*single; count]),
        Some(list) if list.len() == count => Ok(list.to_vec()),
        Some(list) => Err(ConfigError::Invalid {
            section: section.to_string(),
            option,
            reason: format!("has {} entries but there are {count} anchors", list.len()),
        }),
    }
}
