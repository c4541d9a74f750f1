//! Kinematics for stepper-driven machines.
//!
//! Geometry engines translate between a toolhead position and per-actuator
//! positions, validate planned moves against the reachable envelope, and
//! drive the homing state machine that establishes absolute position.
//! Step timing, trajectory planning and MCU transport live elsewhere.

pub mod boundary;
pub mod config;
pub mod homing;
pub mod itersolve;
pub mod kinematics;
pub mod mathutil;
pub mod planner;
pub mod stepper;

pub use config::{ConfigError, MachineConfig};
pub use homing::{HomingError, HomingOutcome, home_axes};
pub use kinematics::{Axes, Kinematics, KinematicsEngine, KinematicsStatus};
pub use mathutil::Coord;
pub use planner::{Move, MoveError};
