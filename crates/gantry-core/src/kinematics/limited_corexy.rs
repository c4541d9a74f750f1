// CoreXY with per-axis velocity and acceleration caps

use crate::{
    config::{ConfigError, FloatOption, MachineConfig},
    homing::{HomingError, HomingState},
    kinematics::{
        Axes, KinematicsEngine, KinematicsStatus,
        cartesian::{Belts, LinearKinematics},
    },
    mathutil::Coord,
    planner::{Move, MoveError},
    stepper::{Rail, StepperPositions},
};

/// CoreXY whose X and Y axes each have their own speed limits.
///
/// A diagonal move is slowed until neither axis component exceeds its cap.
#[derive(Debug)]
pub struct LimitedCoreXyKinematics {
    inner: LinearKinematics,
    max_velocity: [f64; 2],
    max_accel: [f64; 2],
    scale_xy_accel: bool,
}

impl LimitedCoreXyKinematics {
    pub fn from_config(config: &MachineConfig) -> Result<Self, ConfigError> {
        let inner = LinearKinematics::from_config(config, Belts::CoreXy)?;
        let printer = &config.printer;
        let toolhead = inner.toolhead();

        let max_velocity = [
            FloatOption::new("printer", "max_x_velocity", printer.max_x_velocity)
                .default(toolhead.max_velocity)
                .above(0.0)
                .get()?,
            FloatOption::new("printer", "max_y_velocity", printer.max_y_velocity)
                .default(toolhead.max_velocity)
                .above(0.0)
                .get()?,
        ];
        let max_accel = [
            FloatOption::new("printer", "max_x_accel", printer.max_x_accel)
                .default(toolhead.max_accel)
                .above(0.0)
                .get()?,
            FloatOption::new("printer", "max_y_accel", printer.max_y_accel)
                .default(toolhead.max_accel)
                .above(0.0)
                .get()?,
        ];
        let scale_xy_accel = printer.scale_xy_accel.unwrap_or(false);

        tracing::info!(?max_velocity, ?max_accel, scale_xy_accel, "per-axis limits");
        Ok(Self {
            inner,
            max_velocity,
            max_accel,
            scale_xy_accel,
        })
    }
}

impl KinematicsEngine for LimitedCoreXyKinematics {
    fn rails(&self) -> &[Rail] {
        self.inner.rails()
    }

    fn calc_position(&self, positions: &StepperPositions) -> Coord {
        self.inner.calc_position(positions)
    }

    fn set_position(&mut self, newpos: Coord, homing_axes: Axes) {
        self.inner.set_position(newpos, homing_axes)
    }

    fn clear_homing_state(&mut self, axes: Axes) {
        self.inner.clear_homing_state(axes)
    }

    fn home(&mut self, homing: &mut HomingState<'_>) -> Result<(), HomingError> {
        self.inner.home(homing)
    }

    fn check_move(&mut self, m: &mut Move) -> Result<(), MoveError> {
        self.inner.check_move(m)?;

        let x_r = m.axes_r.x.abs();
        let y_r = m.axes_r.y.abs();
        if x_r == 0.0 && y_r == 0.0 {
            return Ok(());
        }

        let cap = |limit: [f64; 2]| {
            let x = if x_r > 0.0 { limit[0] / x_r } else { f64::INFINITY };
            let y = if y_r > 0.0 { limit[1] / y_r } else { f64::INFINITY };
            x.min(y)
        };
        let max_v = cap(self.max_velocity);
        let mut max_a = cap(self.max_accel);
        if self.scale_xy_accel {
            max_a *= m.accel() / self.inner.toolhead().max_accel;
        }
        m.limit_speed(max_v, max_a);
        Ok(())
    }

    fn status(&self, eventtime: f64) -> KinematicsStatus {
        self.inner.status(eventtime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KinematicsType, PrinterConfig, StepperConfig};

    fn machine(scale_xy_accel: bool) -> MachineConfig {
        let mut printer = PrinterConfig::new(KinematicsType::LimitedCorexy, 500.0, 5000.0);
        printer.max_x_velocity = Some(300.0);
        printer.max_y_velocity = Some(200.0);
        printer.max_x_accel = Some(3000.0);
        printer.max_y_accel = Some(1000.0);
        printer.scale_xy_accel = Some(scale_xy_accel);
        let mut config = MachineConfig {
            printer,
            ..MachineConfig::default()
        };
        for name in ["stepper_x", "stepper_y", "stepper_z"] {
            config.steppers.insert(
                name.into(),
                StepperConfig {
                    step_distance: Some(0.0125),
                    position_endstop: Some(0.0),
                    position_max: Some(200.0),
                    ..StepperConfig::default()
                },
            );
        }
        config
    }

    fn homed(scale: bool) -> LimitedCoreXyKinematics {
        let mut kin = LimitedCoreXyKinematics::from_config(&machine(scale)).unwrap();
        kin.set_position(Coord::ORIGIN, Axes::XYZ);
        kin
    }

    #[test]
    fn pure_axis_moves_use_that_axis_limit() {
        let mut kin = homed(false);
        let mut m = Move::new(Coord::ORIGIN, Coord::new(0.0, 100.0, 0.0), 500.0, 5000.0);
        kin.check_move(&mut m).unwrap();
        assert_eq!(m.velocity(), 200.0);
        assert_eq!(m.accel(), 1000.0);

        let mut m = Move::new(Coord::ORIGIN, Coord::new(100.0, 0.0, 0.0), 500.0, 5000.0);
        kin.check_move(&mut m).unwrap();
        assert_eq!(m.velocity(), 300.0);
        assert_eq!(m.accel(), 3000.0);
    }

    #[test]
    fn diagonal_moves_are_bounded_by_slowest_component() {
        let mut kin = homed(false);
        let mut m = Move::new(Coord::ORIGIN, Coord::new(30.0, 40.0, 0.0), 500.0, 5000.0);
        kin.check_move(&mut m).unwrap();
        // y share is 0.8: 200 / 0.8 and 1000 / 0.8
        assert!((m.velocity() - 250.0).abs() < 1e-9);
        assert!((m.accel() - 1250.0).abs() < 1e-9);
    }

    #[test]
    fn scale_xy_accel_follows_requested_accel() {
        let mut kin = homed(true);
        let mut m = Move::new(Coord::ORIGIN, Coord::new(100.0, 0.0, 0.0), 500.0, 2500.0);
        kin.check_move(&mut m).unwrap();
        assert_eq!(m.accel(), 1500.0);
    }
}
