//! The homing state machine.
//!
//! A homing operation walks each axis group through
//! `Forcing -> Homing -> Retracting -> Rehoming -> Reconciling` and back to
//! `Idle`. Geometry engines decide how their rails are grouped and which
//! positions are forced and targeted; everything else happens here. Actual
//! motion and endstop detection belong to a [`HomingDriver`].

use crate::{
    kinematics::{Axes, KinematicsEngine},
    mathutil::Coord,
    planner::{Move, MoveError},
    stepper::StepperPositions,
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HomingError {
    #[error("No trigger on {endstop} after full movement")]
    Timeout { endstop: String },

    #[error("Endstop {endstop} still triggered after retract")]
    StillTriggered { endstop: String },

    #[error(transparent)]
    Move(#[from] MoveError),

    #[error("Homing produced an unreachable position: {pos}")]
    Unreachable { pos: Coord },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomingPhase {
    Idle,
    Forcing,
    Homing,
    Retracting,
    Rehoming,
    Reconciling,
}

/// One endstop search handed to the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct HomingMove {
    /// Rails whose endstops must all trigger
    pub endstops: Vec<String>,
    pub start: Coord,
    pub target: Coord,
    pub speed: f64,
    pub start_positions: StepperPositions,
    /// Stepper positions if the move ran to completion without a trigger
    pub target_positions: StepperPositions,
}

/// Stepper readings reported at the end of an endstop search.
///
/// Both maps are in the frame of the search's start positions. Steppers
/// missing from `trigger` are assumed to be at their commanded position, and
/// steppers missing from `halt` stopped where they triggered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndstopReadings {
    pub trigger: StepperPositions,
    pub halt: StepperPositions,
}

impl EndstopReadings {
    pub fn triggered_at(trigger: StepperPositions) -> Self {
        Self {
            trigger,
            halt: StepperPositions::default(),
        }
    }

    /// Distance each stepper travelled past its trigger point
    pub fn overshoot(&self) -> StepperPositions {
        self.halt
            .iter()
            .filter_map(|(name, halt)| {
                let trigger = self.trigger.get(name)?;
                Some((name.clone(), halt - trigger))
            })
            .collect()
    }
}

/// Motion and endstop collaborator used while homing.
pub trait HomingDriver {
    /// Run `m` until its endstops trigger and report where the steppers were
    /// at trigger time and where they came to rest.
    fn homing_move(&mut self, m: &HomingMove) -> Result<EndstopReadings, HomingError>;

    fn retract(&mut self, _from: Coord, _to: Coord, _speed: f64) -> Result<(), HomingError> {
        Ok(())
    }

    /// Per-stepper offsets between the raw trigger point and the true
    /// endstop position (phase or backlash correction)
    fn homing_adjustments(&self, _endstops: &[String]) -> StepperPositions {
        StepperPositions::default()
    }
}

/// Transient state for a single homing operation.
pub struct HomingState<'d> {
    driver: &'d mut dyn HomingDriver,
    axes: Axes,
    position: Coord,
    phase: HomingPhase,
    history: Vec<HomingPhase>,
    homed_position: Option<Coord>,
    trigger_positions: StepperPositions,
}

impl<'d> HomingState<'d> {
    pub fn new(driver: &'d mut dyn HomingDriver, axes: Axes, position: Coord) -> Self {
        Self {
            driver,
            axes,
            position,
            phase: HomingPhase::Idle,
            history: Vec::new(),
            homed_position: None,
            trigger_positions: StepperPositions::default(),
        }
    }

    /// Axes being homed
    pub fn axes(&self) -> Axes {
        self.axes
    }

    /// Geometries that cannot home axes independently widen the request
    pub fn set_axes(&mut self, axes: Axes) {
        self.axes = axes;
    }

    pub fn phase(&self) -> HomingPhase {
        self.phase
    }

    /// Every phase entered so far, in order
    pub fn history(&self) -> &[HomingPhase] {
        &self.history
    }

    /// Believed toolhead position
    pub fn position(&self) -> Coord {
        self.position
    }

    pub fn homed_position(&self) -> Option<Coord> {
        self.homed_position
    }

    /// Override the final position instead of homing rails
    pub fn set_homed_position(&mut self, pos: Coord) {
        self.homed_position = Some(pos);
    }

    /// Stepper readings from the last authoritative endstop trigger
    pub fn trigger_positions(&self) -> &StepperPositions {
        &self.trigger_positions
    }

    fn enter(&mut self, phase: HomingPhase) {
        tracing::debug!(from = ?self.phase, to = ?phase, axes = %self.axes, "homing phase");
        self.phase = phase;
        self.history.push(phase);
    }

    fn fill_coord(&self, coord: [Option<f64>; 3]) -> Coord {
        let mut out = self.position;
        for (axis, value) in coord.into_iter().enumerate() {
            if let Some(value) = value {
                out.set_axis(axis, value);
            }
        }
        out
    }

    /// Home a group of rails together.
    ///
    /// `forcepos` holds the synthetic start position for each homed axis and
    /// `movepos` the endstop coordinate to approach. Axes left as `None` keep
    /// the current toolhead position.
    pub fn home_rails(
        &mut self,
        kin: &mut dyn KinematicsEngine,
        rails: &[usize],
        forcepos: [Option<f64>; 3],
        movepos: [Option<f64>; 3],
    ) -> Result<(), HomingError> {
        let Some(&first) = rails.first() else {
            return Ok(());
        };
        let hi = *kin.rails()[first].homing_info();
        let endstops: Vec<String> = rails
            .iter()
            .map(|&idx| kin.rails()[idx].name().to_string())
            .collect();
        let homing_axes = Axes::from_indices((0..3).filter(|&axis| forcepos[axis].is_some()));

        self.enter(HomingPhase::Forcing);
        let startpos = self.fill_coord(forcepos);
        let homepos = self.fill_coord(movepos);
        kin.set_position(startpos, homing_axes);
        self.position = startpos;

        self.enter(HomingPhase::Homing);
        let mut readings = self.homing_move(kin, &endstops, homepos, hi.speed)?;
        self.halt_at(kin, homepos, &readings)?;

        let axes_d = homepos - startpos;
        let move_d = axes_d.norm();
        if hi.retract_dist > 0.0 && move_d > 0.0 {
            self.enter(HomingPhase::Retracting);
            let retract_r = (hi.retract_dist / move_d).min(1.0);
            let retractpos = homepos - axes_d * retract_r;
            let mut retract = Move::homing(self.position, retractpos, hi.retract_speed);
            kin.check_move(&mut retract)?;
            self.driver.retract(self.position, retractpos, retract.velocity())?;
            kin.set_position(retractpos, Axes::NONE);
            self.position = retractpos;

            self.enter(HomingPhase::Rehoming);
            let startpos = retractpos - axes_d * retract_r;
            kin.set_position(startpos, Axes::NONE);
            self.position = startpos;
            let start_positions = kin.stepper_positions();
            readings = self.homing_move(kin, &endstops, homepos, hi.second_homing_speed)?;
            for name in &endstops {
                let start = start_positions.get(name).copied().unwrap_or(f64::NAN);
                let hit = readings.trigger.get(name).copied().unwrap_or(f64::NAN);
                if (hit - start).abs() < 1e-9 {
                    return Err(HomingError::StillTriggered {
                        endstop: name.clone(),
                    });
                }
            }
            self.halt_at(kin, homepos, &readings)?;
        }

        self.enter(HomingPhase::Reconciling);
        let adjustments = self.driver.homing_adjustments(&endstops);
        let mut finalpos = self.position;
        if adjustments.values().any(|offset| *offset != 0.0) {
            let mut positions = kin.stepper_positions();
            for (name, offset) in adjustments.iter() {
                if let Some(pos) = positions.get_mut(name) {
                    *pos += offset;
                }
            }
            let newpos = kin.calc_position(&positions);
            if !newpos.is_finite() {
                return Err(HomingError::Unreachable { pos: newpos });
            }
            for axis in homing_axes.iter() {
                finalpos.set_axis(axis, newpos.axis(axis));
            }
        }
        kin.set_position(finalpos, homing_axes);
        self.position = finalpos;
        self.trigger_positions = readings.trigger;

        self.enter(HomingPhase::Idle);
        Ok(())
    }

    fn homing_move(
        &mut self,
        kin: &mut dyn KinematicsEngine,
        endstops: &[String],
        target: Coord,
        speed: f64,
    ) -> Result<EndstopReadings, HomingError> {
        let mut m = Move::homing(self.position, target, speed);
        kin.check_move(&mut m)?;

        let start_positions = kin.stepper_positions();
        let target_positions: StepperPositions = kin
            .rails()
            .iter()
            .map(|rail| {
                let stepper = rail.stepper();
                (stepper.name().to_string(), stepper.calc_position_from_coord(target))
            })
            .collect();
        let hmove = HomingMove {
            endstops: endstops.to_vec(),
            start: self.position,
            target,
            speed: m.velocity(),
            start_positions: start_positions.clone(),
            target_positions,
        };
        let reported = self.driver.homing_move(&hmove)?;

        let mut trigger = start_positions;
        trigger.extend(reported.trigger);
        Ok(EndstopReadings {
            trigger,
            halt: reported.halt,
        })
    }

    /// Park the toolhead at the endstop coordinate, shifted by however far
    /// the steppers ran past their trigger point
    fn halt_at(
        &mut self,
        kin: &mut dyn KinematicsEngine,
        homepos: Coord,
        readings: &EndstopReadings,
    ) -> Result<(), HomingError> {
        kin.set_position(homepos, Axes::NONE);
        self.position = homepos;

        let overshoot = readings.overshoot();
        if overshoot.values().all(|d| *d == 0.0) {
            return Ok(());
        }
        let mut positions = kin.stepper_positions();
        for (name, d) in overshoot.iter() {
            if let Some(pos) = positions.get_mut(name) {
                *pos += d;
            }
        }
        let haltpos = kin.calc_position(&positions);
        if !haltpos.is_finite() {
            return Err(HomingError::Unreachable { pos: haltpos });
        }
        kin.set_position(haltpos, Axes::NONE);
        self.position = haltpos;
        Ok(())
    }
}

/// Summary of a completed homing operation.
#[derive(Debug, Clone, PartialEq)]
pub struct HomingOutcome {
    pub axes: Axes,
    pub position: Coord,
    pub phases: Vec<HomingPhase>,
}

/// Home `axes` on `kin`. On failure every axis involved is left unhomed.
pub fn home_axes(
    kin: &mut dyn KinematicsEngine,
    driver: &mut dyn HomingDriver,
    axes: Axes,
) -> Result<HomingOutcome, HomingError> {
    let current = kin.position();
    let start = Coord::new(
        finite_or_zero(current.x),
        finite_or_zero(current.y),
        finite_or_zero(current.z),
    );
    let mut state = HomingState::new(driver, axes, start);
    let result = kin.home(&mut state);
    let homed = state.axes();

    match result {
        Ok(()) => {
            let position = match state.homed_position() {
                Some(pos) => {
                    kin.set_position(pos, homed);
                    pos
                }
                None => state.position(),
            };
            tracing::info!(axes = %homed, %position, "homing complete");
            Ok(HomingOutcome {
                axes: homed,
                position,
                phases: state.history,
            })
        }
        Err(err) => {
            tracing::warn!(axes = %homed, error = %err, "homing aborted, clearing limits");
            kin.clear_homing_state(homed.union(axes));
            Err(err)
        }
    }
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() { v } else { 0.0 }
}

/// A driver whose endstops trigger at the commanded target unless told to
/// trip early.
#[derive(Debug, Clone, Default)]
pub struct SimulatedEndstops {
    stuck: BTreeSet<String>,
    held: BTreeSet<String>,
    trips: BTreeMap<String, VecDeque<f64>>,
    overshoot: StepperPositions,
    adjustments: StepperPositions,
    moves: Vec<HomingMove>,
    retracts: Vec<(Coord, Coord)>,
}

impl SimulatedEndstops {
    pub fn new() -> Self {
        Self::default()
    }

    /// The endstop never triggers
    pub fn with_stuck(mut self, endstop: impl Into<String>) -> Self {
        self.stuck.insert(endstop.into());
        self
    }

    /// The endstop reports triggered before the move starts
    pub fn with_held(mut self, endstop: impl Into<String>) -> Self {
        self.held.insert(endstop.into());
        self
    }

    /// Trip after the stepper travels each of `distances` in turn, one per
    /// search. Later searches run to the target.
    pub fn with_trips(
        mut self,
        endstop: impl Into<String>,
        distances: impl IntoIterator<Item = f64>,
    ) -> Self {
        self.trips
            .entry(endstop.into())
            .or_default()
            .extend(distances);
        self
    }

    /// The stepper coasts `distance` past every trigger point
    pub fn with_overshoot(mut self, stepper: impl Into<String>, distance: f64) -> Self {
        self.overshoot.insert(stepper.into(), distance);
        self
    }

    pub fn with_adjustment(mut self, stepper: impl Into<String>, offset: f64) -> Self {
        self.adjustments.insert(stepper.into(), offset);
        self
    }

    /// Every endstop search issued so far
    pub fn moves(&self) -> &[HomingMove] {
        &self.moves
    }

    /// Start and end of every retract so far
    pub fn retracts(&self) -> &[(Coord, Coord)] {
        &self.retracts
    }
}

impl HomingDriver for SimulatedEndstops {
    fn homing_move(&mut self, m: &HomingMove) -> Result<EndstopReadings, HomingError> {
        if let Some(endstop) = m.endstops.iter().find(|e| self.stuck.contains(*e)) {
            return Err(HomingError::Timeout {
                endstop: endstop.clone(),
            });
        }
        self.moves.push(m.clone());

        let mut readings = EndstopReadings::triggered_at(m.target_positions.clone());
        for endstop in &m.endstops {
            let (Some(&start), Some(&target)) =
                (m.start_positions.get(endstop), m.target_positions.get(endstop))
            else {
                continue;
            };
            let dir = (target - start).signum();
            let trigger = if self.held.contains(endstop) {
                start
            } else if let Some(d) = self.trips.get_mut(endstop).and_then(VecDeque::pop_front) {
                start + dir * d.min((target - start).abs())
            } else {
                target
            };
            readings.trigger.insert(endstop.clone(), trigger);
            if let Some(&coast) = self.overshoot.get(endstop) {
                readings.halt.insert(endstop.clone(), trigger + dir * coast);
            }
        }
        Ok(readings)
    }

    fn retract(&mut self, from: Coord, to: Coord, _speed: f64) -> Result<(), HomingError> {
        self.retracts.push((from, to));
        Ok(())
    }

    fn homing_adjustments(&self, endstops: &[String]) -> StepperPositions {
        self.adjustments
            .iter()
            .filter(|(name, _)| endstops.contains(name))
            .map(|(name, offset)| (name.clone(), *offset))
            .collect()
    }
}
