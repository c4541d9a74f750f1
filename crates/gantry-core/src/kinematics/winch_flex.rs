//! Cable flex compensation for winch machines.
//!
//! Each cable is modeled as a linear spring. At a given mover position the
//! cable tensions are the ones closest to `target_force` that still hold the
//! mover's weight, clamped per cable to `[min_force, max_force]`. The
//! resulting elastic stretch is measured relative to the stretch at the
//! origin, so an unloaded machine homed at the origin needs no correction
//! there.
//!
//! [`WinchFlexHelper`] owns the model. Step handles hold an `Arc` snapshot
//! and are re-issued by the winch engine whenever the helper is
//! reconfigured.

use crate::{
    config::{ConfigError, FloatOption, PrinterConfig, per_anchor},
    mathutil::{Coord, solve3, trilateration},
};
use std::sync::Arc;

pub const GRAVITY: f64 = 9.81;

/// Refinement passes on the reverse path
const REVERSE_ITERATIONS: usize = 3;

const DEFAULT_TARGET_FORCE: f64 = 20.0;
const DEFAULT_MIN_FORCE: f64 = 0.0;
const DEFAULT_MAX_FORCE: f64 = 120.0;

/// Inputs of the cable model.
#[derive(Debug, Clone, PartialEq)]
pub struct FlexParams {
    /// Mass of the mover in kg
    pub mover_weight: f64,
    /// Force per unit strain of each cable, in N
    pub spring_constant: f64,
    /// Pretension each cable aims for, in N
    pub target_force: f64,
    pub min_force: Vec<f64>,
    pub max_force: Vec<f64>,
    /// Extra fixed cable length between spool and anchor, per cable
    pub guy_wires: Option<Vec<f64>>,
}

impl FlexParams {
    /// Parameters that disable compensation
    pub fn disabled(anchors: usize) -> Self {
        Self {
            mover_weight: 0.0,
            spring_constant: 0.0,
            target_force: DEFAULT_TARGET_FORCE,
            min_force: vec![DEFAULT_MIN_FORCE; anchors],
            max_force: vec![DEFAULT_MAX_FORCE; anchors],
            guy_wires: None,
        }
    }

    pub fn from_config(printer: &PrinterConfig, anchors: usize) -> Result<Self, ConfigError> {
        let positive = |option: &'static str, value: Option<f64>, default: f64| {
            FloatOption::new("printer", option, value)
                .default(default)
                .minval(0.0)
                .get()
        };
        let guy_wires = match printer.guy_wire_lengths.as_deref() {
            None => None,
            Some(values) => Some(per_anchor(
                "printer",
                "guy_wire_lengths",
                Some(values),
                anchors,
                0.0,
            )?),
        };
        let min_force = per_anchor(
            "printer",
            "min_force",
            printer.min_force.as_deref(),
            anchors,
            DEFAULT_MIN_FORCE,
        )?;
        let max_force = per_anchor(
            "printer",
            "max_force",
            printer.max_force.as_deref(),
            anchors,
            DEFAULT_MAX_FORCE,
        )?;
        if min_force.iter().zip(&max_force).any(|(lo, hi)| lo > hi) {
            return Err(ConfigError::Invalid {
                section: "printer".into(),
                option: "min_force",
                reason: "must not exceed max_force".into(),
            });
        }

        Ok(Self {
            mover_weight: positive("mover_weight", printer.mover_weight, 0.0)?,
            spring_constant: positive("spring_constant", printer.spring_constant, 0.0)?,
            target_force: positive("target_force", printer.target_force, DEFAULT_TARGET_FORCE)?,
            min_force,
            max_force,
            guy_wires,
        })
    }
}

/// An immutable snapshot of the cable model.
#[derive(Debug, Clone, PartialEq)]
pub struct FlexModel {
    anchors: Vec<Coord>,
    params: FlexParams,
    enabled: bool,
    origin_stretch: Vec<f64>,
}

impl FlexModel {
    pub fn new(anchors: Vec<Coord>, params: FlexParams) -> Self {
        let enabled =
            anchors.len() >= 4 && params.mover_weight > 0.0 && params.spring_constant > 0.0;
        let mut model = Self {
            origin_stretch: vec![0.0; anchors.len()],
            anchors,
            params,
            enabled,
        };
        if enabled {
            model.origin_stretch = model.stretch(Coord::ORIGIN);
        }
        model
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn anchors(&self) -> &[Coord] {
        &self.anchors
    }

    pub fn params(&self) -> &FlexParams {
        &self.params
    }

    /// Cable tensions holding the mover at `pos`
    pub fn forces(&self, pos: Coord) -> Vec<f64> {
        let dirs: Vec<Coord> = self
            .anchors
            .iter()
            .map(|anchor| {
                let d = *anchor - pos;
                let norm = d.norm();
                if norm > 0.0 { d * (1.0 / norm) } else { Coord::ORIGIN }
            })
            .collect();
        self.solve_forces(&dirs)
    }

    /// Least-squares distance from the target tension subject to static
    /// equilibrium, with cables outside their bounds pinned to the bound
    fn solve_forces(&self, dirs: &[Coord]) -> Vec<f64> {
        let p = &self.params;
        let n = dirs.len();
        let weight = Coord::new(0.0, 0.0, p.mover_weight * GRAVITY);
        let mut pinned: Vec<Option<f64>> = vec![None; n];
        let mut forces = vec![p.target_force; n];

        for _ in 0..=n {
            let mut rhs = weight;
            let mut normal = [[0.0; 3]; 3];
            for (dir, pin) in dirs.iter().zip(&pinned) {
                match pin {
                    Some(force) => rhs = rhs - *dir * *force,
                    None => {
                        rhs = rhs - *dir * p.target_force;
                        let u = [dir.x, dir.y, dir.z];
                        for (row, ur) in normal.iter_mut().zip(u) {
                            for (cell, uc) in row.iter_mut().zip(u) {
                                *cell += ur * uc;
                            }
                        }
                    }
                }
            }
            let Some(lambda) = solve3(normal, [rhs.x, rhs.y, rhs.z]) else {
                break;
            };
            let lambda = Coord::from(lambda);

            let mut changed = false;
            for i in 0..n {
                if pinned[i].is_some() {
                    continue;
                }
                let force = p.target_force + dirs[i].dot(&lambda);
                forces[i] = force;
                if force < p.min_force[i] {
                    pinned[i] = Some(p.min_force[i]);
                    changed = true;
                } else if force > p.max_force[i] {
                    pinned[i] = Some(p.max_force[i]);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        for (i, force) in forces.iter_mut().enumerate() {
            *force = pinned[i]
                .unwrap_or(*force)
                .clamp(p.min_force[i], p.max_force[i]);
        }
        forces
    }

    /// Absolute elastic extension of every cable at `pos`
    fn stretch(&self, pos: Coord) -> Vec<f64> {
        let k = self.params.spring_constant;
        self.forces(pos)
            .into_iter()
            .enumerate()
            .map(|(i, force)| {
                let guy = self.params.guy_wires.as_ref().map_or(0.0, |g| g[i]);
                let length = self.anchors[i].distance(&pos) + guy;
                length * force / (k + force)
            })
            .collect()
    }

    /// Straight-line anchor distances and their flex corrections at `pos`
    pub fn calc_arrays(&self, pos: Coord) -> (Vec<f64>, Vec<f64>) {
        let distances = self.anchors.iter().map(|a| a.distance(&pos)).collect();
        let flex = if self.enabled {
            self.stretch(pos)
                .into_iter()
                .zip(&self.origin_stretch)
                .map(|(s, s0)| s - s0)
                .collect()
        } else {
            vec![0.0; self.anchors.len()]
        };
        (distances, flex)
    }

    /// Commanded length of cable `index` to place the mover at `pos`
    pub fn cable_length(&self, index: usize, pos: Coord) -> f64 {
        let distance = self.anchors[index].distance(&pos);
        if !self.enabled {
            return distance;
        }
        let (_, flex) = self.calc_arrays(pos);
        distance - flex[index]
    }

    /// Estimate the mover position from commanded cable lengths
    pub fn calc_position_from_lengths(&self, lengths: &[f64]) -> Coord {
        if self.anchors.len() < 3 || lengths.len() < 3 {
            return Coord::nan();
        }
        // The mover hangs above the plane of the first three anchors
        let normal = (self.anchors[1] - self.anchors[0]).cross(&(self.anchors[2] - self.anchors[0]));
        let order = if normal.z > 0.0 { [0, 2, 1] } else { [0, 1, 2] };
        let centers = order.map(|i| self.anchors[i]);
        let solve = |radii: [f64; 3]| trilateration(centers, radii.map(|r| r * r));

        let mut pos = solve(order.map(|i| lengths[i]));
        if !self.enabled {
            return pos;
        }
        for _ in 0..REVERSE_ITERATIONS {
            if !pos.is_finite() {
                break;
            }
            let (_, flex) = self.calc_arrays(pos);
            pos = solve(order.map(|i| lengths[i] + flex[i]));
        }
        pos
    }
}

/// Owner of the cable model; hands out shared snapshots to step handles.
#[derive(Debug, Clone)]
pub struct WinchFlexHelper {
    model: Arc<FlexModel>,
}

impl WinchFlexHelper {
    pub fn new(anchors: Vec<Coord>, params: FlexParams) -> Self {
        let model = FlexModel::new(anchors, params);
        tracing::info!(
            anchors = model.anchors().len(),
            enabled = model.enabled(),
            "winch flex compensation"
        );
        Self {
            model: Arc::new(model),
        }
    }

    /// Replace the physical model; previously issued handles keep the old one
    pub fn configure(&mut self, params: FlexParams) {
        let anchors = self.model.anchors().to_vec();
        *self = Self::new(anchors, params);
    }

    pub fn handle(&self) -> Arc<FlexModel> {
        Arc::clone(&self.model)
    }

    pub fn model(&self) -> &FlexModel {
        &self.model
    }

    pub fn calc_arrays(&self, pos: Coord) -> (Vec<f64>, Vec<f64>) {
        self.model.calc_arrays(pos)
    }

    pub fn calc_position_from_lengths(&self, lengths: &[f64]) -> Coord {
        self.model.calc_position_from_lengths(lengths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchors() -> Vec<Coord> {
        vec![
            Coord::new(16.4, -1610.98, -131.53),
            Coord::new(1314.22, 1268.14, -121.28),
            Coord::new(-1415.73, 707.61, -121.82),
            Coord::new(0.0, 0.0, 2299.83),
        ]
    }

    fn loaded() -> FlexParams {
        FlexParams {
            mover_weight: 2.0,
            spring_constant: 20000.0,
            ..FlexParams::disabled(4)
        }
    }

    #[test]
    fn disabled_model_uses_raw_distances() {
        let pos = Coord::new(100.0, -50.0, 10.0);
        for params in [
            FlexParams::disabled(4),
            FlexParams {
                spring_constant: 0.0,
                ..loaded()
            },
            FlexParams {
                mover_weight: 0.0,
                ..loaded()
            },
        ] {
            let model = FlexModel::new(anchors(), params);
            assert!(!model.enabled());
            let (distances, flex) = model.calc_arrays(pos);
            assert_eq!(flex, vec![0.0; 4]);
            for (i, d) in distances.iter().enumerate() {
                assert_eq!(model.cable_length(i, pos), *d);
            }
        }

        // Three anchors can never enable compensation
        let model = FlexModel::new(anchors()[..3].to_vec(), FlexParams {
            min_force: vec![0.0; 3],
            max_force: vec![120.0; 3],
            ..loaded()
        });
        assert!(!model.enabled());
    }

    #[test]
    fn forces_balance_weight() {
        let model = FlexModel::new(anchors(), loaded());
        let pos = Coord::new(50.0, 20.0, 100.0);
        let forces = model.forces(pos);
        let net = anchors()
            .iter()
            .zip(&forces)
            .fold(Coord::ORIGIN, |acc, (a, f)| {
                let d = *a - pos;
                acc + d * (f / d.norm())
            });
        assert!((net.x).abs() < 1e-6, "{net:?}");
        assert!((net.y).abs() < 1e-6, "{net:?}");
        assert!((net.z - 2.0 * GRAVITY).abs() < 1e-6, "{net:?}");
        assert!(forces.iter().all(|f| (0.0..=120.0).contains(f)));
    }

    #[test]
    fn flex_vanishes_at_origin() {
        let model = FlexModel::new(anchors(), loaded());
        assert!(model.enabled());
        let (_, flex) = model.calc_arrays(Coord::ORIGIN);
        assert!(flex.iter().all(|f| *f == 0.0));

        let (_, flex) = model.calc_arrays(Coord::new(300.0, -200.0, 400.0));
        assert!(flex.iter().any(|f| *f != 0.0));
    }

    #[test]
    fn reverse_path_recovers_position() {
        let model = FlexModel::new(anchors(), loaded());
        let pos = Coord::new(100.0, -50.0, 10.0);
        let lengths: Vec<f64> = (0..4).map(|i| model.cable_length(i, pos)).collect();
        let back = model.calc_position_from_lengths(&lengths);
        assert!(back.distance(&pos) < 1e-3, "{back:?}");

        let raw = FlexModel::new(anchors(), FlexParams::disabled(4));
        let lengths: Vec<f64> = (0..4).map(|i| raw.cable_length(i, pos)).collect();
        let back = raw.calc_position_from_lengths(&lengths);
        assert!(back.distance(&pos) < 1e-6, "{back:?}");
    }

    #[test]
    fn reconfigure_issues_new_snapshot() {
        let mut helper = WinchFlexHelper::new(anchors(), FlexParams::disabled(4));
        let old = helper.handle();
        helper.configure(loaded());
        assert!(!old.enabled());
        assert!(helper.handle().enabled());
        assert!(!Arc::ptr_eq(&old, &helper.handle()));
    }
}
