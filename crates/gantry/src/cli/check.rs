use crate::config;
use anyhow::{Context, Result};
use clap::Args;
use gantry_core::{Axes, Coord, KinematicsEngine, Move, home_axes, homing::SimulatedEndstops};
use serde_json::json;
use std::path::PathBuf;

#[derive(Args)]
pub struct CheckArgs {
    /// Path to the machine description (TOML or JSON).
    pub config: PathBuf,

    /// Start of the move as `X Y Z`.
    #[arg(long, num_args = 3, allow_negative_numbers = true, required = true)]
    pub from: Vec<f64>,

    /// End of the move as `X Y Z`.
    #[arg(long, num_args = 3, allow_negative_numbers = true, required = true)]
    pub to: Vec<f64>,

    /// Requested velocity; defaults to the machine's max_velocity.
    #[arg(long)]
    pub speed: Option<f64>,

    /// Requested acceleration; defaults to the machine's max_accel.
    #[arg(long)]
    pub accel: Option<f64>,
}

fn coord(v: &[f64]) -> Coord {
    Coord::new(v[0], v[1], v[2])
}

impl CheckArgs {
    pub fn run(&self) -> Result<()> {
        let (machine, mut kin) = config::load(&self.config)?;
        home_axes(&mut kin, &mut SimulatedEndstops::new(), Axes::XYZ)?;

        let speed = self.speed.unwrap_or(machine.printer.max_velocity);
        let accel = self.accel.unwrap_or(machine.printer.max_accel);
        let mut m = Move::new(coord(&self.from), coord(&self.to), speed, accel);
        kin.check_move(&mut m).context("move rejected")?;

        super::print_json(&json!({
            "velocity": m.velocity(),
            "accel": m.accel(),
            "derated": m.velocity() < speed || m.accel() < accel,
        }))
    }
}
