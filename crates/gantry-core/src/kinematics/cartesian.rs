// Cartesian kinematics and the belt arrangements built on linear rails

use crate::{
    boundary::{AxisLimits, ZSpeedLimit},
    config::{ConfigError, MachineConfig},
    homing::{HomingError, HomingState},
    itersolve::{ActiveFlags, CalcPositionCallback, Segment},
    kinematics::{
        Axes, KinematicsEngine, KinematicsStatus, StepperKinematics, ToolheadLimits,
        corexy::{CoreXyStepper, StepperType as XyType},
        corexz::{CoreXzStepper, StepperType as XzType},
        linear_homing_positions, reading,
    },
    mathutil::Coord,
    planner::{Move, MoveError},
    stepper::{Rail, RailOptions, StepperPositions},
};

/// Which axis this stepper controls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    /// Parse axis from string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "x" => Some(Axis::X),
            "y" => Some(Axis::Y),
            "z" => Some(Axis::Z),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// Step handle for a stepper that follows one Cartesian axis directly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartesianStepper {
    axis: Axis,
}

impl CartesianStepper {
    pub fn new(axis: Axis) -> Self {
        Self { axis }
    }

    pub fn active_flags(&self) -> ActiveFlags {
        match self.axis {
            Axis::X => ActiveFlags::new().with_x(),
            Axis::Y => ActiveFlags::new().with_y(),
            Axis::Z => ActiveFlags::new().with_z(),
        }
    }
}

impl CalcPositionCallback for CartesianStepper {
    fn calc_position(&self, m: &Segment, move_time: f64) -> f64 {
        m.coord(move_time).axis(self.axis.index())
    }
}

/// How the three linear motors combine into toolhead motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Belts {
    /// One motor per axis
    Cartesian,
    /// `a = x + y`, `b = x - y`
    CoreXy,
    /// `a = x - y` with a dedicated Y motor
    HybridCoreXy,
    /// `a = x + z`, `c = x - z`
    CoreXz,
}

impl Belts {
    fn stepper_kinematics(self, axis: Axis) -> StepperKinematics {
        let cartesian = StepperKinematics::Cartesian(CartesianStepper::new(axis));
        match (self, axis) {
            (Belts::CoreXy, Axis::X) => StepperKinematics::CoreXy(CoreXyStepper::new(XyType::Plus)),
            (Belts::CoreXy, Axis::Y) => {
                StepperKinematics::CoreXy(CoreXyStepper::new(XyType::Minus))
            }
            (Belts::HybridCoreXy, Axis::X) => {
                StepperKinematics::CoreXy(CoreXyStepper::new(XyType::Minus))
            }
            (Belts::CoreXz, Axis::X) => StepperKinematics::CoreXz(CoreXzStepper::new(XzType::Plus)),
            (Belts::CoreXz, Axis::Z) => {
                StepperKinematics::CoreXz(CoreXzStepper::new(XzType::Minus))
            }
            _ => cartesian,
        }
    }

    /// Toolhead position from the three motor positions
    fn forward(self, [a, b, c]: [f64; 3]) -> Coord {
        match self {
            Belts::Cartesian => Coord::new(a, b, c),
            Belts::CoreXy => Coord::new(0.5 * (a + b), 0.5 * (a - b), c),
            Belts::HybridCoreXy => Coord::new(a + b, b, c),
            Belts::CoreXz => Coord::new(0.5 * (a + c), b, 0.5 * (a - c)),
        }
    }
}

/// Kinematics for machines whose three motors drive linear rails.
#[derive(Debug)]
pub struct LinearKinematics {
    belts: Belts,
    rails: Vec<Rail>,
    limits: AxisLimits,
    toolhead: ToolheadLimits,
    z_limit: ZSpeedLimit,
}

impl LinearKinematics {
    pub fn from_config(config: &MachineConfig, belts: Belts) -> Result<Self, ConfigError> {
        let toolhead = ToolheadLimits::from_config(&config.printer)?;
        let z_limit = ZSpeedLimit::from_config(&config.printer, toolhead)?;

        let rails = [Axis::X, Axis::Y, Axis::Z]
            .into_iter()
            .zip(["stepper_x", "stepper_y", "stepper_z"])
            .map(|(axis, name)| {
                Rail::from_config(
                    name,
                    config.stepper(name)?,
                    belts.stepper_kinematics(axis),
                    RailOptions::default(),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(?belts, ?z_limit, "linear kinematics configured");
        Ok(Self {
            belts,
            rails,
            limits: AxisLimits::unhomed(),
            toolhead,
            z_limit,
        })
    }

    pub fn belts(&self) -> Belts {
        self.belts
    }

    pub fn toolhead(&self) -> ToolheadLimits {
        self.toolhead
    }

    pub fn limits(&self) -> &AxisLimits {
        &self.limits
    }
}

impl KinematicsEngine for LinearKinematics {
    fn rails(&self) -> &[Rail] {
        &self.rails
    }

    fn calc_position(&self, positions: &StepperPositions) -> Coord {
        let pos = [0, 1, 2].map(|i| reading(positions, self.rails[i].name()));
        self.belts.forward(pos)
    }

    fn set_position(&mut self, newpos: Coord, homing_axes: Axes) {
        for rail in &mut self.rails {
            rail.set_position(newpos);
        }
        for axis in homing_axes.iter() {
            self.limits.set(axis, self.rails[axis].range());
        }
    }

    fn clear_homing_state(&mut self, axes: Axes) {
        self.limits.clear(axes);
    }

    fn home(&mut self, homing: &mut HomingState<'_>) -> Result<(), HomingError> {
        for axis in homing.axes().iter() {
            let (forcepos, homepos) = linear_homing_positions(&self.rails[axis], axis);
            homing.home_rails(self, &[axis], forcepos, homepos)?;
        }
        Ok(())
    }

    fn check_move(&mut self, m: &mut Move) -> Result<(), MoveError> {
        self.limits.check_endstops(m)?;
        self.z_limit.apply(m);
        Ok(())
    }

    fn status(&self, _eventtime: f64) -> KinematicsStatus {
        let min = [0, 1, 2].map(|i| self.rails[i].range().0);
        let max = [0, 1, 2].map(|i| self.rails[i].range().1);
        KinematicsStatus {
            homed_axes: self.limits.homed_axes().to_string(),
            axis_minimum: Coord::from(min),
            axis_maximum: Coord::from(max),
            cone_start_z: None,
        }
    }
}
