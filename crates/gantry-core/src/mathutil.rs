//! Vector helpers and the numeric solvers shared by the geometry engines.
//!
//! Nothing in here panics on bad geometry. Degenerate inputs produce NaN
//! components which callers translate into an unreachable-position error.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt,
    ops::{Add, Mul, Sub},
};

/// A point (or vector) in Cartesian toolhead space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Coord {
    pub const ORIGIN: Coord = Coord {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn nan() -> Self {
        Self::new(f64::NAN, f64::NAN, f64::NAN)
    }

    /// Component by axis index (0 = x, 1 = y, 2 = z)
    pub fn axis(&self, axis: usize) -> f64 {
        match axis {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }

    pub fn set_axis(&mut self, axis: usize, value: f64) {
        match axis {
            0 => self.x = value,
            1 => self.y = value,
            _ => self.z = value,
        }
    }

    pub fn dot(&self, other: &Coord) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(&self, other: &Coord) -> Coord {
        Coord {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    pub fn magsq(&self) -> f64 {
        self.dot(self)
    }

    pub fn norm(&self) -> f64 {
        self.magsq().sqrt()
    }

    pub fn distance(&self, other: &Coord) -> f64 {
        (*self - *other).norm()
    }

    /// Squared distance from the Z axis
    pub fn xy_magsq(&self) -> f64 {
        self.x * self.x + self.y * self.y
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Add for Coord {
    type Output = Coord;

    fn add(self, rhs: Coord) -> Coord {
        Coord::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Coord {
    type Output = Coord;

    fn sub(self, rhs: Coord) -> Coord {
        Coord::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Coord {
    type Output = Coord;

    fn mul(self, rhs: f64) -> Coord {
        Coord::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl From<[f64; 3]> for Coord {
    fn from(v: [f64; 3]) -> Self {
        Coord::new(v[0], v[1], v[2])
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3} {:.3} {:.3}", self.x, self.y, self.z)
    }
}

/// Intersect three spheres and return the root below the plane of their
/// centers.
///
/// "Below" is relative to `ez = ex × ey` where `ex` points from the first to
/// the second center and `ey` towards the third, so callers pick the side by
/// the order they pass the centers in. Collinear centers or spheres that do
/// not meet yield NaN components.
pub fn trilateration(centers: [Coord; 3], radius2: [f64; 3]) -> Coord {
    let [c1, c2, c3] = centers;
    let s21 = c2 - c1;
    let s31 = c3 - c1;

    let d = s21.norm();
    let ex = s21 * (1.0 / d);
    let i = ex.dot(&s31);
    let vect_ey = s31 - ex * i;
    let ey = vect_ey * (1.0 / vect_ey.norm());
    let ez = ex.cross(&ey);
    let j = ey.dot(&s31);

    let x = (radius2[0] - radius2[1] + d * d) / (2.0 * d);
    let y = (radius2[0] - radius2[2] - x * x + (x - i) * (x - i) + j * j) / (2.0 * j);
    // A negative radicand leaves NaN in z, which is the failure signal
    let z = -(radius2[0] - x * x - y * y).sqrt();

    if !(x.is_finite() && y.is_finite() && z.is_finite()) {
        return Coord::nan();
    }

    c1 + ex * x + ey * y + ez * z
}

/// Solve the 3x3 linear system `a * v = b` by Cramer's rule.
///
/// Returns `None` when the matrix is (numerically) singular.
pub fn solve3(a: [[f64; 3]; 3], b: [f64; 3]) -> Option<[f64; 3]> {
    let det = |m: &[[f64; 3]; 3]| {
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    };

    let d = det(&a);
    let scale = a
        .iter()
        .flat_map(|row| row.iter())
        .fold(0.0f64, |acc, v| acc.max(v.abs()));
    if scale == 0.0 || d.abs() <= 1e-12 * scale * scale * scale {
        return None;
    }

    let mut out = [0.0; 3];
    for (col, slot) in out.iter_mut().enumerate() {
        let mut m = a;
        for row in 0..3 {
            m[row][col] = b[row];
        }
        *slot = det(&m) / d;
    }
    Some(out)
}

/// Named parameters for [`coordinate_descent`].
pub type Params = BTreeMap<String, f64>;

/// Minimize `error_func` by nudging each of `adj_params` up and down in turn.
///
/// Each parameter keeps its own step size which grows by 10% on improvement
/// and shrinks by 10% otherwise. The search stops once the sum of step sizes
/// drops below 1e-5 or after 10000 rounds.
pub fn coordinate_descent<F>(adj_params: &[&str], params: &Params, mut error_func: F) -> Params
where
    F: FnMut(&Params) -> f64,
{
    let mut params = params.clone();
    let mut dp: Vec<f64> = vec![1.0; adj_params.len()];
    let mut best_err = error_func(&params);
    tracing::info!("coordinate descent initial error: {best_err}");

    let threshold = 0.00001;
    let mut rounds = 0;
    while dp.iter().sum::<f64>() > threshold && rounds < 10000 {
        rounds += 1;
        for (name, step) in adj_params.iter().zip(dp.iter_mut()) {
            let orig = params.get(*name).copied().unwrap_or(0.0);

            params.insert((*name).to_string(), orig + *step);
            let err = error_func(&params);
            if err < best_err {
                best_err = err;
                *step *= 1.1;
                continue;
            }

            params.insert((*name).to_string(), orig - *step);
            let err = error_func(&params);
            if err < best_err {
                best_err = err;
                *step *= 1.1;
                continue;
            }

            params.insert((*name).to_string(), orig);
            *step *= 0.9;
        }
    }

    tracing::info!("coordinate descent best error: {best_err} rounds: {rounds}");
    params
}
