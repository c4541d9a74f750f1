// CoreXY belt steppers

use crate::itersolve::{ActiveFlags, CalcPositionCallback, Segment};

/// CoreXY stepper type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepperType {
    /// Plus stepper: position = X + Y
    Plus,
    /// Minus stepper: position = X - Y
    Minus,
}

/// Step handle for one motor of a CoreXY belt pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreXyStepper {
    stepper_type: StepperType,
}

impl CoreXyStepper {
    pub fn new(stepper_type: StepperType) -> Self {
        Self { stepper_type }
    }

    pub fn active_flags(&self) -> ActiveFlags {
        ActiveFlags::new().with_x().with_y()
    }
}

impl CalcPositionCallback for CoreXyStepper {
    fn calc_position(&self, m: &Segment, move_time: f64) -> f64 {
        let c = m.coord(move_time);
        match self.stepper_type {
            StepperType::Plus => c.x + c.y,
            StepperType::Minus => c.x - c.y,
        }
    }
}
