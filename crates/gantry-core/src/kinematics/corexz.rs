// CoreXZ belt steppers

use crate::itersolve::{ActiveFlags, CalcPositionCallback, Segment};

/// CoreXZ stepper type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepperType {
    /// Plus stepper: position = X + Z
    Plus,
    /// Minus stepper: position = X - Z
    Minus,
}

/// Step handle for one motor of a CoreXZ belt pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreXzStepper {
    stepper_type: StepperType,
}

impl CoreXzStepper {
    pub fn new(stepper_type: StepperType) -> Self {
        Self { stepper_type }
    }

    pub fn active_flags(&self) -> ActiveFlags {
        ActiveFlags::new().with_x().with_z()
    }
}

impl CalcPositionCallback for CoreXzStepper {
    fn calc_position(&self, m: &Segment, move_time: f64) -> f64 {
        let c = m.coord(move_time);
        match self.stepper_type {
            StepperType::Plus => c.x + c.z,
            StepperType::Minus => c.x - c.z,
        }
    }
}
