//! Move validation and speed de-rating building blocks shared by the
//! geometry engines.

use crate::{
    config::{ConfigError, FloatOption, PrinterConfig},
    kinematics::{Axes, ToolheadLimits},
    planner::{Move, MoveError},
    stepper::Rail,
};

/// Tower-to-effector movement ratio past which moves are slowed
pub const SLOW_RATIO: f64 = 3.0;

/// Live per-axis travel limits.
///
/// An inverted pair (`lo > hi`) marks the axis as not homed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisLimits([(f64, f64); 3]);

impl AxisLimits {
    pub const UNHOMED: (f64, f64) = (1.0, -1.0);

    pub const fn unhomed() -> Self {
        Self([Self::UNHOMED; 3])
    }

    pub fn get(&self, axis: usize) -> (f64, f64) {
        self.0[axis]
    }

    pub fn set(&mut self, axis: usize, range: (f64, f64)) {
        self.0[axis] = range;
    }

    pub fn is_homed(&self, axis: usize) -> bool {
        let (lo, hi) = self.0[axis];
        lo <= hi
    }

    pub fn clear(&mut self, axes: Axes) {
        for axis in axes.iter() {
            self.0[axis] = Self::UNHOMED;
        }
    }

    pub fn homed_axes(&self) -> Axes {
        Axes::from_indices((0..3).filter(|&axis| self.is_homed(axis)))
    }

    /// Whether `value` lies within the live range of `axis`
    pub fn contains(&self, axis: usize, value: f64) -> bool {
        let (lo, hi) = self.0[axis];
        value >= lo && value <= hi
    }

    /// Reject the move if any axis it changes ends outside the live range
    pub fn check_endstops(&self, m: &Move) -> Result<(), MoveError> {
        for axis in 0..3 {
            if m.moves_axis(axis) && !self.contains(axis, m.end_pos.axis(axis)) {
                if !self.is_homed(axis) {
                    return Err(m.must_home());
                }
                return Err(m.out_of_range());
            }
        }
        Ok(())
    }
}

impl Default for AxisLimits {
    fn default() -> Self {
        Self::unhomed()
    }
}

/// Reject the move if any actuator has no solution at its end position
pub fn check_reachable(rails: &[Rail], m: &Move) -> Result<(), MoveError> {
    let reachable = rails
        .iter()
        .all(|rail| rail.stepper().calc_position_from_coord(m.end_pos).is_finite());
    if reachable {
        Ok(())
    } else {
        Err(m.unreachable())
    }
}

/// Z velocity/acceleration caps applied in proportion to a move's Z share.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZSpeedLimit {
    pub max_z_velocity: f64,
    pub max_z_accel: f64,
}

impl ZSpeedLimit {
    /// Read `max_z_velocity`/`max_z_accel`, defaulting to the toolhead caps
    pub fn from_config(
        printer: &PrinterConfig,
        toolhead: ToolheadLimits,
    ) -> Result<Self, ConfigError> {
        let max_z_velocity = FloatOption::new("printer", "max_z_velocity", printer.max_z_velocity)
            .default(toolhead.max_velocity)
            .above(0.0)
            .maxval(toolhead.max_velocity)
            .get()?;
        let max_z_accel = FloatOption::new("printer", "max_z_accel", printer.max_z_accel)
            .default(toolhead.max_accel)
            .above(0.0)
            .maxval(toolhead.max_accel)
            .get()?;
        Ok(Self {
            max_z_velocity,
            max_z_accel,
        })
    }

    pub fn apply(&self, m: &mut Move) {
        // Sub-nanometre moves are snapped to zero length
        if !m.moves_axis(2) || m.move_d == 0.0 {
            return;
        }
        let z_ratio = m.move_d / m.axes_d.z.abs();
        m.limit_speed(self.max_z_velocity * z_ratio, self.max_z_accel * z_ratio);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedTier {
    Full,
    Half,
    Quarter,
}

impl SpeedTier {
    pub fn factor(self) -> f64 {
        match self {
            SpeedTier::Full => 1.0,
            SpeedTier::Half => 0.5,
            SpeedTier::Quarter => 0.25,
        }
    }
}

/// Two nested slow-down thresholds on a squared distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlowZones {
    pub slow2: f64,
    pub very_slow2: f64,
}

impl SlowZones {
    pub fn tier(&self, extreme2: f64) -> SpeedTier {
        if extreme2 > self.very_slow2 {
            SpeedTier::Quarter
        } else if extreme2 > self.slow2 {
            SpeedTier::Half
        } else {
            SpeedTier::Full
        }
    }

    /// Slow the move by the tier `extreme2` falls in. Returns the tier used.
    pub fn apply(&self, m: &mut Move, extreme2: f64, max_velocity: f64, max_accel: f64) -> SpeedTier {
        let tier = self.tier(extreme2);
        if tier != SpeedTier::Full {
            let r = tier.factor();
            m.limit_speed(max_velocity * r, max_accel * r);
        }
        tier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mathutil::Coord;

    fn mv(end: [f64; 3]) -> Move {
        Move::new(Coord::ORIGIN, Coord::from(end), 100.0, 1000.0)
    }

    #[test]
    fn unhomed_limits_require_homing() {
        let limits = AxisLimits::unhomed();
        assert!(!limits.is_homed(0));
        assert!(limits.homed_axes().is_empty());
        assert_eq!(
            limits.check_endstops(&mv([10.0, 0.0, 0.0])),
            Err(MoveError::MustHomeFirst {
                pos: Coord::new(10.0, 0.0, 0.0)
            })
        );
        // Axes that do not move are not checked
        assert!(limits.check_endstops(&mv([0.0, 0.0, 0.0])).is_ok());
    }

    #[test]
    fn homed_limits_reject_out_of_range() {
        let mut limits = AxisLimits::unhomed();
        limits.set(0, (0.0, 200.0));
        assert!(limits.check_endstops(&mv([150.0, 0.0, 0.0])).is_ok());
        assert!(matches!(
            limits.check_endstops(&mv([250.0, 0.0, 0.0])),
            Err(MoveError::OutOfRange { .. })
        ));
        assert_eq!(limits.homed_axes(), Axes::X);

        limits.clear(Axes::X);
        assert!(!limits.is_homed(0));
    }

    #[test]
    fn unreachable_actuator_rejects_move() {
        use crate::{
            kinematics::{StepperKinematics, delta::DeltaStepper},
            stepper::{HomingInfo, Stepper},
        };

        // Arm of length 10 hanging from a tower at the origin
        let stepper = Stepper::new(
            "stepper_a",
            0.01,
            StepperKinematics::Delta(DeltaStepper::new(100.0, 0.0, 0.0)),
        );
        let homing = HomingInfo {
            speed: 5.0,
            position_endstop: 100.0,
            retract_speed: 5.0,
            retract_dist: 5.0,
            positive_dir: true,
            second_homing_speed: 2.5,
        };
        let rails = [Rail::new(stepper, (0.0, 100.0), homing)];

        assert!(check_reachable(&rails, &mv([5.0, 0.0, 0.0])).is_ok());
        assert_eq!(
            check_reachable(&rails, &mv([20.0, 0.0, 0.0])),
            Err(MoveError::UnreachableGeometry {
                pos: Coord::new(20.0, 0.0, 0.0)
            })
        );
    }

    #[test]
    fn z_limit_scales_with_z_share() {
        let z = ZSpeedLimit {
            max_z_velocity: 5.0,
            max_z_accel: 100.0,
        };
        let mut m = mv([3.0, 0.0, 4.0]);
        z.apply(&mut m);
        // move_d / |dz| = 5 / 4
        assert!((m.velocity() - 6.25).abs() < 1e-12);
        assert!((m.accel() - 125.0).abs() < 1e-12);

        let mut flat = mv([3.0, 4.0, 0.0]);
        z.apply(&mut flat);
        assert_eq!(flat.velocity(), 100.0);
    }

    #[test]
    fn configured_z_caps_limit_velocity_and_accel() {
        use crate::config::{KinematicsType, PrinterConfig};

        let mut printer = PrinterConfig::new(KinematicsType::Cartesian, 300.0, 3000.0);
        printer.max_z_velocity = Some(10.0);
        printer.max_z_accel = Some(200.0);
        let toolhead = ToolheadLimits::from_config(&printer).unwrap();
        let z = ZSpeedLimit::from_config(&printer, toolhead).unwrap();

        let mut m = mv([0.0, 0.0, 20.0]);
        z.apply(&mut m);
        assert_eq!(m.velocity(), 10.0);
        assert_eq!(m.accel(), 200.0);
        assert!((m.min_move_t() - 2.0).abs() < 1e-12);

        // Unset caps fall back to the toolhead limits
        let z = ZSpeedLimit::from_config(
            &PrinterConfig::new(KinematicsType::Cartesian, 300.0, 3000.0),
            toolhead,
        )
        .unwrap();
        assert_eq!(z.max_z_velocity, 300.0);
        assert_eq!(z.max_z_accel, 3000.0);
    }

    #[test]
    fn z_limit_ignores_zero_length_moves() {
        let z = ZSpeedLimit {
            max_z_velocity: 5.0,
            max_z_accel: 100.0,
        };
        let mut m = mv([0.0, 0.0, 1e-10]);
        assert_eq!(m.move_d, 0.0);
        z.apply(&mut m);
        assert_eq!(m.velocity(), 100.0);
        assert_eq!(m.accel(), 1000.0);
        assert_eq!(m.min_move_t(), 0.0);
    }

    #[test]
    fn slow_zones_pick_tiers() {
        let zones = SlowZones {
            slow2: 100.0,
            very_slow2: 400.0,
        };
        assert_eq!(zones.tier(50.0), SpeedTier::Full);
        assert_eq!(zones.tier(150.0), SpeedTier::Half);
        assert_eq!(zones.tier(500.0), SpeedTier::Quarter);

        let mut m = mv([1.0, 0.0, 0.0]);
        assert_eq!(zones.apply(&mut m, 500.0, 200.0, 2000.0), SpeedTier::Quarter);
        assert_eq!(m.velocity(), 50.0);
        assert_eq!(m.accel(), 500.0);
    }
}
