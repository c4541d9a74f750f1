//! Geometry engines for the supported machine topologies.
//!
//! Every topology implements [`KinematicsEngine`]: a forward transform from
//! actuator readings to a toolhead position, an inverse transform that parks
//! each actuator, a homing choreography and a move validator. [`Kinematics`]
//! is the closed set of topologies a machine description can select.
//!
//! Each module also holds the per-stepper callback the step generator
//! evaluates for that topology; [`StepperKinematics`] is the handle type
//! stored on every [`Stepper`](crate::stepper::Stepper).

use crate::{
    config::{ConfigError, FloatOption, KinematicsType, MachineConfig, PrinterConfig},
    homing::{HomingError, HomingState},
    itersolve::{ActiveFlags, CalcPositionCallback, Segment},
    mathutil::Coord,
    planner::{Move, MoveError},
    stepper::{Rail, StepperPositions},
};
use serde::Serialize;
use std::fmt;

pub mod cartesian;
pub mod corexy;
pub mod corexz;
pub mod delta;
pub mod deltesian;
pub mod limited_corexy;
pub mod rotary_delta;
pub mod scara;
pub mod winch;
pub mod winch_flex;

use cartesian::{Belts, CartesianStepper, LinearKinematics};
use corexy::CoreXyStepper;
use corexz::CoreXzStepper;
use delta::{DeltaKinematics, DeltaStepper};
use deltesian::{DeltesianKinematics, DeltesianStepper};
use limited_corexy::LimitedCoreXyKinematics;
use rotary_delta::{RotaryDeltaKinematics, RotaryDeltaStepper};
use scara::{ScaraKinematics, ScaraStepper};
use winch::{WinchKinematics, WinchStepper};

/// A set of Cartesian axes, by index (0 = x, 1 = y, 2 = z).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Axes(u8);

impl Axes {
    pub const NONE: Axes = Axes(0);
    pub const X: Axes = Axes(1 << 0);
    pub const Y: Axes = Axes(1 << 1);
    pub const Z: Axes = Axes(1 << 2);
    pub const XY: Axes = Axes(Self::X.0 | Self::Y.0);
    pub const XZ: Axes = Axes(Self::X.0 | Self::Z.0);
    pub const XYZ: Axes = Axes(Self::X.0 | Self::Y.0 | Self::Z.0);

    pub fn from_indices(axes: impl IntoIterator<Item = usize>) -> Self {
        axes.into_iter()
            .filter(|&axis| axis < 3)
            .fold(Self::NONE, |acc, axis| Axes(acc.0 | (1 << axis)))
    }

    /// Parse an axis list such as `"xz"`; unknown letters are rejected
    pub fn parse(s: &str) -> Option<Self> {
        s.chars().try_fold(Self::NONE, |acc, ch| {
            let axis = match ch.to_ascii_lowercase() {
                'x' => Self::X,
                'y' => Self::Y,
                'z' => Self::Z,
                _ => return None,
            };
            Some(acc.union(axis))
        })
    }

    pub const fn contains(&self, axis: usize) -> bool {
        axis < 3 && self.0 & (1 << axis) != 0
    }

    pub const fn union(self, other: Axes) -> Axes {
        Axes(self.0 | other.0)
    }

    pub const fn intersects(&self, other: Axes) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = usize> {
        (0..3).filter(move |&axis| self.contains(axis))
    }

    fn as_active_flags(self) -> ActiveFlags {
        let mut flags = ActiveFlags::new();
        if self.contains(0) {
            flags = flags.with_x();
        }
        if self.contains(1) {
            flags = flags.with_y();
        }
        if self.contains(2) {
            flags = flags.with_z();
        }
        flags
    }
}

impl fmt::Display for Axes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (axis, name) in ['x', 'y', 'z'].into_iter().enumerate() {
            if self.contains(axis) {
                write!(f, "{name}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Axes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Axes({self})")
    }
}

/// Read-only snapshot reported to status consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KinematicsStatus {
    pub homed_axes: String,
    pub axis_minimum: Coord,
    pub axis_maximum: Coord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cone_start_z: Option<f64>,
}

/// Velocity and acceleration caps of the whole toolhead
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToolheadLimits {
    pub max_velocity: f64,
    pub max_accel: f64,
}

impl ToolheadLimits {
    pub fn from_config(printer: &PrinterConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            max_velocity: FloatOption::new("printer", "max_velocity", Some(printer.max_velocity))
                .above(0.0)
                .get()?,
            max_accel: FloatOption::new("printer", "max_accel", Some(printer.max_accel))
                .above(0.0)
                .get()?,
        })
    }
}

pub trait KinematicsEngine {
    /// Every actuator, in configuration order
    fn rails(&self) -> &[Rail];

    /// Actuators that respond to motion along any of `axes`
    fn actuators(&self, axes: Axes) -> Vec<&Rail> {
        let flags = axes.as_active_flags();
        self.rails()
            .iter()
            .filter(|rail| rail.stepper().active_flags().intersects(flags))
            .collect()
    }

    /// Current commanded actuator positions
    fn stepper_positions(&self) -> StepperPositions {
        self.rails()
            .iter()
            .map(|rail| (rail.name().to_string(), rail.commanded_position()))
            .collect()
    }

    /// Forward transform. Unreachable or missing readings yield NaN
    /// components rather than an error.
    fn calc_position(&self, positions: &StepperPositions) -> Coord;

    /// Toolhead position implied by the commanded actuator positions
    fn position(&self) -> Coord {
        self.calc_position(&self.stepper_positions())
    }

    /// Inverse transform: park every actuator at `newpos` and mark
    /// `homing_axes` as homed.
    fn set_position(&mut self, newpos: Coord, homing_axes: Axes);

    fn clear_homing_state(&mut self, axes: Axes);

    fn motor_off(&mut self) {
        self.clear_homing_state(Axes::XYZ);
    }

    fn home(&mut self, homing: &mut HomingState<'_>) -> Result<(), HomingError>;

    /// Validate a planned move, possibly lowering its speed limits. Nothing
    /// but the error is observable when this fails.
    fn check_move(&mut self, m: &mut Move) -> Result<(), MoveError>;

    fn status(&self, eventtime: f64) -> KinematicsStatus;
}

/// Look up a reading, treating a missing stepper as unreachable
pub(crate) fn reading(positions: &StepperPositions, name: &str) -> f64 {
    positions.get(name).copied().unwrap_or(f64::NAN)
}

/// Force and target positions for homing a single linear rail along `axis`
pub(crate) fn linear_homing_positions(
    rail: &Rail,
    axis: usize,
) -> ([Option<f64>; 3], [Option<f64>; 3]) {
    let (position_min, position_max) = rail.range();
    let hi = rail.homing_info();
    let mut homepos = [None; 3];
    homepos[axis] = Some(hi.position_endstop);
    let mut forcepos = homepos;
    forcepos[axis] = Some(if hi.positive_dir {
        hi.position_endstop - 1.5 * (hi.position_endstop - position_min)
    } else {
        hi.position_endstop + 1.5 * (position_max - hi.position_endstop)
    });
    (forcepos, homepos)
}

/// The per-stepper callback handed to the step generator.
#[derive(Debug, Clone)]
pub enum StepperKinematics {
    Cartesian(CartesianStepper),
    CoreXy(CoreXyStepper),
    CoreXz(CoreXzStepper),
    Delta(DeltaStepper),
    Deltesian(DeltesianStepper),
    RotaryDelta(RotaryDeltaStepper),
    Winch(WinchStepper),
    Scara(ScaraStepper),
}

impl StepperKinematics {
    pub fn active_flags(&self) -> ActiveFlags {
        match self {
            StepperKinematics::Cartesian(k) => k.active_flags(),
            StepperKinematics::CoreXy(k) => k.active_flags(),
            StepperKinematics::CoreXz(k) => k.active_flags(),
            StepperKinematics::Delta(k) => k.active_flags(),
            StepperKinematics::Deltesian(k) => k.active_flags(),
            StepperKinematics::RotaryDelta(k) => k.active_flags(),
            StepperKinematics::Winch(k) => k.active_flags(),
            StepperKinematics::Scara(k) => k.active_flags(),
        }
    }
}

impl CalcPositionCallback for StepperKinematics {
    fn calc_position(&self, m: &Segment, move_time: f64) -> f64 {
        match self {
            StepperKinematics::Cartesian(k) => k.calc_position(m, move_time),
            StepperKinematics::CoreXy(k) => k.calc_position(m, move_time),
            StepperKinematics::CoreXz(k) => k.calc_position(m, move_time),
            StepperKinematics::Delta(k) => k.calc_position(m, move_time),
            StepperKinematics::Deltesian(k) => k.calc_position(m, move_time),
            StepperKinematics::RotaryDelta(k) => k.calc_position(m, move_time),
            StepperKinematics::Winch(k) => k.calc_position(m, move_time),
            StepperKinematics::Scara(k) => k.calc_position(m, move_time),
        }
    }
}

/// The geometry engine selected by a machine description.
#[derive(Debug)]
pub enum Kinematics {
    Cartesian(LinearKinematics),
    CoreXy(LinearKinematics),
    HybridCoreXy(LinearKinematics),
    CoreXz(LinearKinematics),
    LimitedCoreXy(LimitedCoreXyKinematics),
    Delta(DeltaKinematics),
    Deltesian(DeltesianKinematics),
    RotaryDelta(RotaryDeltaKinematics),
    Winch(WinchKinematics),
    Scara(ScaraKinematics),
}

impl Kinematics {
    pub fn from_config(config: &MachineConfig) -> Result<Self, ConfigError> {
        let kin = match config.printer.kinematics {
            KinematicsType::Cartesian => {
                Kinematics::Cartesian(LinearKinematics::from_config(config, Belts::Cartesian)?)
            }
            KinematicsType::Corexy => {
                Kinematics::CoreXy(LinearKinematics::from_config(config, Belts::CoreXy)?)
            }
            KinematicsType::HybridCorexy => Kinematics::HybridCoreXy(
                LinearKinematics::from_config(config, Belts::HybridCoreXy)?,
            ),
            KinematicsType::Corexz => {
                Kinematics::CoreXz(LinearKinematics::from_config(config, Belts::CoreXz)?)
            }
            KinematicsType::LimitedCorexy => {
                Kinematics::LimitedCoreXy(LimitedCoreXyKinematics::from_config(config)?)
            }
            KinematicsType::Delta => Kinematics::Delta(DeltaKinematics::from_config(config)?),
            KinematicsType::Deltesian => {
                Kinematics::Deltesian(DeltesianKinematics::from_config(config)?)
            }
            KinematicsType::RotaryDelta => {
                Kinematics::RotaryDelta(RotaryDeltaKinematics::from_config(config)?)
            }
            KinematicsType::Winch => Kinematics::Winch(WinchKinematics::from_config(config)?),
            KinematicsType::Scara => Kinematics::Scara(ScaraKinematics::from_config(config)?),
        };
        tracing::info!(kinematics = kin.name(), "kinematics configured");
        Ok(kin)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Kinematics::Cartesian(_) => "cartesian",
            Kinematics::CoreXy(_) => "corexy",
            Kinematics::HybridCoreXy(_) => "hybrid_corexy",
            Kinematics::CoreXz(_) => "corexz",
            Kinematics::LimitedCoreXy(_) => "limited_corexy",
            Kinematics::Delta(_) => "delta",
            Kinematics::Deltesian(_) => "deltesian",
            Kinematics::RotaryDelta(_) => "rotary_delta",
            Kinematics::Winch(_) => "winch",
            Kinematics::Scara(_) => "scara",
        }
    }

    fn engine(&self) -> &dyn KinematicsEngine {
        match self {
            Kinematics::Cartesian(k)
            | Kinematics::CoreXy(k)
            | Kinematics::HybridCoreXy(k)
            | Kinematics::CoreXz(k) => k,
            Kinematics::LimitedCoreXy(k) => k,
            Kinematics::Delta(k) => k,
            Kinematics::Deltesian(k) => k,
            Kinematics::RotaryDelta(k) => k,
            Kinematics::Winch(k) => k,
            Kinematics::Scara(k) => k,
        }
    }

    fn engine_mut(&mut self) -> &mut dyn KinematicsEngine {
        match self {
            Kinematics::Cartesian(k)
            | Kinematics::CoreXy(k)
            | Kinematics::HybridCoreXy(k)
            | Kinematics::CoreXz(k) => k,
            Kinematics::LimitedCoreXy(k) => k,
            Kinematics::Delta(k) => k,
            Kinematics::Deltesian(k) => k,
            Kinematics::RotaryDelta(k) => k,
            Kinematics::Winch(k) => k,
            Kinematics::Scara(k) => k,
        }
    }
}

impl KinematicsEngine for Kinematics {
    fn rails(&self) -> &[Rail] {
        self.engine().rails()
    }

    fn calc_position(&self, positions: &StepperPositions) -> Coord {
        self.engine().calc_position(positions)
    }

    fn set_position(&mut self, newpos: Coord, homing_axes: Axes) {
        self.engine_mut().set_position(newpos, homing_axes)
    }

    fn clear_homing_state(&mut self, axes: Axes) {
        self.engine_mut().clear_homing_state(axes)
    }

    fn motor_off(&mut self) {
        self.engine_mut().motor_off()
    }

    fn home(&mut self, homing: &mut HomingState<'_>) -> Result<(), HomingError> {
        self.engine_mut().home(homing)
    }

    fn check_move(&mut self, m: &mut Move) -> Result<(), MoveError> {
        self.engine_mut().check_move(m)
    }

    fn status(&self, eventtime: f64) -> KinematicsStatus {
        self.engine().status(eventtime)
    }
}
