//! Interface between the geometry engines and the step generator.
//!
//! The step generator itself lives outside this crate. It walks planned
//! trapezoid segments and asks each stepper's [`CalcPositionCallback`] for the
//! actuator position at a given time, searching for step edges. The geometry
//! engines only configure those callbacks; they never produce steps.

use crate::mathutil::Coord;

// Active flags for axis filtering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActiveFlags(u8);

impl ActiveFlags {
    const X: u8 = 1 << 0;
    const Y: u8 = 1 << 1;
    const Z: u8 = 1 << 2;

    pub const fn new() -> Self {
        Self(0)
    }

    pub const fn xyz() -> Self {
        Self(Self::X | Self::Y | Self::Z)
    }

    pub const fn with_x(mut self) -> Self {
        self.0 |= Self::X;
        self
    }

    pub const fn with_y(mut self) -> Self {
        self.0 |= Self::Y;
        self
    }

    pub const fn with_z(mut self) -> Self {
        self.0 |= Self::Z;
        self
    }

    pub const fn has_x(&self) -> bool {
        self.0 & Self::X != 0
    }

    pub const fn has_y(&self) -> bool {
        self.0 & Self::Y != 0
    }

    pub const fn has_z(&self) -> bool {
        self.0 & Self::Z != 0
    }

    /// Whether the stepper responds to motion along the given axis index
    pub const fn has_axis(&self, axis: usize) -> bool {
        axis < 3 && self.0 & (1 << axis) != 0
    }

    pub const fn intersects(&self, other: ActiveFlags) -> bool {
        self.0 & other.0 != 0
    }
}

/// One constant-acceleration piece of a planned move, as the step generator
/// sees it.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Segment {
    pub print_time: f64,
    pub move_t: f64,
    pub start_v: f64,
    pub half_accel: f64,
    pub start_pos: Coord,
    pub axes_r: Coord,
}

impl Segment {
    /// A zero-velocity segment parked at `pos`
    pub fn stationary(pos: Coord) -> Self {
        Self {
            move_t: 1000.0,
            start_pos: pos,
            ..Self::default()
        }
    }

    /// Distance traveled at `move_time` into the segment
    pub fn distance(&self, move_time: f64) -> f64 {
        (self.start_v + self.half_accel * move_time) * move_time
    }

    /// Toolhead coordinate at `move_time` into the segment
    pub fn coord(&self, move_time: f64) -> Coord {
        self.start_pos + self.axes_r * self.distance(move_time)
    }

    /// Whether this segment moves any axis in `flags`
    pub fn is_active(&self, flags: ActiveFlags) -> bool {
        (flags.has_x() && self.axes_r.x != 0.0)
            || (flags.has_y() && self.axes_r.y != 0.0)
            || (flags.has_z() && self.axes_r.z != 0.0)
    }
}

// Position callback trait - calculates position at a given time in a move
pub trait CalcPositionCallback {
    fn calc_position(&self, m: &Segment, move_time: f64) -> f64;

    /// Actuator position while the toolhead is parked at `c`
    fn calc_position_from_coord(&self, c: Coord) -> f64 {
        self.calc_position(&Segment::stationary(c), 500.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CoordCallback;

    impl CalcPositionCallback for CoordCallback {
        fn calc_position(&self, m: &Segment, move_time: f64) -> f64 {
            let c = m.coord(move_time);
            c.x + 2.0 * c.y + 3.0 * c.z
        }
    }

    #[test]
    fn active_flags_by_axis() {
        let flags = ActiveFlags::new().with_x().with_z();
        assert!(flags.has_x() && !flags.has_y() && flags.has_z());
        assert!(flags.has_axis(0));
        assert!(!flags.has_axis(1));
        assert!(flags.has_axis(2));
        assert!(!flags.has_axis(3));
        assert!(flags.intersects(ActiveFlags::new().with_z()));
        assert!(!flags.intersects(ActiveFlags::new().with_y()));
    }

    #[test]
    fn segment_coord_follows_trapezoid() {
        let m = Segment {
            print_time: 0.0,
            move_t: 1.0,
            start_v: 10.0,
            half_accel: 5.0,
            start_pos: Coord::new(1.0, 2.0, 3.0),
            axes_r: Coord::new(1.0, 0.0, 0.0),
        };
        // (10 + 5 * 0.5) * 0.5
        assert_eq!(m.distance(0.5), 6.25);
        assert_eq!(m.coord(0.5), Coord::new(7.25, 2.0, 3.0));
        assert!(m.is_active(ActiveFlags::new().with_x()));
        assert!(!m.is_active(ActiveFlags::new().with_y().with_z()));
    }

    #[test]
    fn calculates_position_from_coordinates() {
        let pos = CoordCallback.calc_position_from_coord(Coord::new(1.0, 2.0, 3.0));
        assert_eq!(pos, 1.0 + 2.0 * 2.0 + 3.0 * 3.0);
    }
}
