//! The slice of the trajectory planner the geometry engines see.
//!
//! A [`Move`] is built by the planner, handed to
//! [`KinematicsEngine::check_move`](crate::kinematics::KinematicsEngine::check_move)
//! and may come back with tighter velocity/acceleration limits.

use crate::mathutil::Coord;
use thiserror::Error;

/// Reasons a move is rejected before it reaches the step generator.
///
/// All of these are recoverable: the offending command is dropped and the
/// machine keeps running.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MoveError {
    #[error("Must home axis first: {pos}")]
    MustHomeFirst { pos: Coord },

    #[error("Move out of range: {pos}")]
    OutOfRange { pos: Coord },

    #[error("Unreachable position: {pos}")]
    UnreachableGeometry { pos: Coord },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Move {
    pub start_pos: Coord,
    pub end_pos: Coord,
    pub axes_d: Coord,
    pub axes_r: Coord,
    pub move_d: f64,
    max_cruise_v2: f64,
    accel: f64,
    min_move_t: f64,
}

impl Move {
    pub fn new(start_pos: Coord, end_pos: Coord, speed: f64, accel: f64) -> Self {
        let axes_d = end_pos - start_pos;
        let mut move_d = axes_d.norm();
        let axes_r = if move_d < 0.000_000_001 {
            move_d = 0.0;
            Coord::ORIGIN
        } else {
            axes_d * (1.0 / move_d)
        };
        let min_move_t = if speed > 0.0 { move_d / speed } else { 0.0 };
        Self {
            start_pos,
            end_pos,
            axes_d,
            axes_r,
            move_d,
            max_cruise_v2: speed * speed,
            accel,
            min_move_t,
        }
    }

    /// A move issued by the homing state machine; acceleration is left to
    /// the planner
    pub fn homing(start_pos: Coord, end_pos: Coord, speed: f64) -> Self {
        Self::new(start_pos, end_pos, speed, f64::INFINITY)
    }

    /// Tighten (never loosen) the cruise velocity and acceleration
    pub fn limit_speed(&mut self, speed: f64, accel: f64) {
        let speed2 = speed * speed;
        if speed2 < self.max_cruise_v2 {
            self.max_cruise_v2 = speed2;
            self.min_move_t = self.move_d / speed;
        }
        self.accel = self.accel.min(accel);
    }

    pub fn velocity(&self) -> f64 {
        self.max_cruise_v2.sqrt()
    }

    pub fn accel(&self) -> f64 {
        self.accel
    }

    pub fn min_move_t(&self) -> f64 {
        self.min_move_t
    }

    /// Whether the move changes the given axis
    pub fn moves_axis(&self, axis: usize) -> bool {
        self.axes_d.axis(axis) != 0.0
    }

    pub fn out_of_range(&self) -> MoveError {
        MoveError::OutOfRange { pos: self.end_pos }
    }

    pub fn must_home(&self) -> MoveError {
        MoveError::MustHomeFirst { pos: self.end_pos }
    }

    pub fn unreachable(&self) -> MoveError {
        MoveError::UnreachableGeometry { pos: self.end_pos }
    }
}
