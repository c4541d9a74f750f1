// Cable winch kinematics

use crate::{
    config::{ConfigError, FloatOption, MachineConfig},
    homing::{HomingError, HomingState},
    itersolve::{ActiveFlags, CalcPositionCallback, Segment},
    kinematics::{
        Axes, KinematicsEngine, KinematicsStatus, StepperKinematics, reading,
        winch_flex::{FlexModel, FlexParams, WinchFlexHelper},
    },
    mathutil::Coord,
    planner::{Move, MoveError},
    stepper::{Rail, RailOptions, StepperPositions},
};
use std::sync::Arc;

const ANCHOR_NAMES: &str = "abcdefghijklmnopqrstuvwxyz";
const MIN_ANCHORS: usize = 3;

/// Step handle for one spool; positions are commanded cable lengths
#[derive(Debug, Clone)]
pub struct WinchStepper {
    index: usize,
    flex: Arc<FlexModel>,
}

impl WinchStepper {
    pub fn new(index: usize, flex: Arc<FlexModel>) -> Self {
        Self { index, flex }
    }

    pub fn anchor(&self) -> Coord {
        self.flex.anchors()[self.index]
    }

    pub fn active_flags(&self) -> ActiveFlags {
        ActiveFlags::xyz()
    }
}

impl CalcPositionCallback for WinchStepper {
    fn calc_position(&self, m: &Segment, move_time: f64) -> f64 {
        self.flex.cable_length(self.index, m.coord(move_time))
    }
}

/// A mover suspended from three or more anchored cables.
///
/// Homing and boundary checks are not implemented: the machine always
/// reports every axis homed, homes in place at the origin, and accepts any
/// move.
#[derive(Debug)]
pub struct WinchKinematics {
    rails: Vec<Rail>,
    flex: WinchFlexHelper,
    axes_min: Coord,
    axes_max: Coord,
}

impl WinchKinematics {
    pub fn from_config(config: &MachineConfig) -> Result<Self, ConfigError> {
        let mut sections = Vec::new();
        for (i, letter) in ANCHOR_NAMES.chars().enumerate() {
            let name = format!("stepper_{letter}");
            if i >= MIN_ANCHORS && !config.has_stepper(&name) {
                break;
            }
            sections.push((name.clone(), config.stepper(&name)?));
        }

        let anchors = sections
            .iter()
            .map(|(name, section)| {
                Ok(Coord::new(
                    FloatOption::new(name, "anchor_x", section.anchor_x).get()?,
                    FloatOption::new(name, "anchor_y", section.anchor_y).get()?,
                    FloatOption::new(name, "anchor_z", section.anchor_z).get()?,
                ))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let params = FlexParams::from_config(&config.printer, anchors.len())?;
        let flex = WinchFlexHelper::new(anchors.clone(), params);

        let rails = sections
            .iter()
            .enumerate()
            .map(|(i, (name, section))| {
                Rail::from_config(
                    name,
                    section,
                    StepperKinematics::Winch(WinchStepper::new(i, flex.handle())),
                    RailOptions {
                        need_position_minmax: false,
                        need_position_endstop: false,
                        ..RailOptions::default()
                    },
                )
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let (axes_min, axes_max) = anchors.iter().fold(
            (
                Coord::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
                Coord::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            ),
            |(lo, hi), a| {
                (
                    Coord::new(lo.x.min(a.x), lo.y.min(a.y), lo.z.min(a.z)),
                    Coord::new(hi.x.max(a.x), hi.y.max(a.y), hi.z.max(a.z)),
                )
            },
        );

        let mut kin = Self {
            rails,
            flex,
            axes_min,
            axes_max,
        };
        kin.set_position(Coord::ORIGIN, Axes::NONE);
        Ok(kin)
    }

    pub fn flex(&self) -> &WinchFlexHelper {
        &self.flex
    }

    pub fn anchors(&self) -> &[Coord] {
        self.flex.model().anchors()
    }

    /// Swap in a new cable model and hand every stepper the new snapshot.
    /// Commanded cable lengths are left untouched.
    pub fn set_flex_params(&mut self, params: FlexParams) {
        self.flex.configure(params);
        for (i, rail) in self.rails.iter_mut().enumerate() {
            let handle = WinchStepper::new(i, self.flex.handle());
            rail.stepper_mut().set_kinematics(StepperKinematics::Winch(handle));
        }
    }
}

impl KinematicsEngine for WinchKinematics {
    fn rails(&self) -> &[Rail] {
        &self.rails
    }

    fn calc_position(&self, positions: &StepperPositions) -> Coord {
        let lengths: Vec<f64> = self
            .rails
            .iter()
            .map(|rail| reading(positions, rail.name()))
            .collect();
        self.flex.calc_position_from_lengths(&lengths)
    }

    fn set_position(&mut self, newpos: Coord, _homing_axes: Axes) {
        for rail in &mut self.rails {
            rail.set_position(newpos);
        }
    }

    fn clear_homing_state(&mut self, _axes: Axes) {}

    fn home(&mut self, homing: &mut HomingState<'_>) -> Result<(), HomingError> {
        homing.set_axes(Axes::XYZ);
        homing.set_homed_position(Coord::ORIGIN);
        Ok(())
    }

    fn check_move(&mut self, _m: &mut Move) -> Result<(), MoveError> {
        Ok(())
    }

    fn status(&self, _eventtime: f64) -> KinematicsStatus {
        KinematicsStatus {
            homed_axes: Axes::XYZ.to_string(),
            axis_minimum: self.axes_min,
            axis_maximum: self.axes_max,
            cone_start_z: None,
        }
    }
}
