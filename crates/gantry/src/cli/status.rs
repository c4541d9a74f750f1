use crate::config;
use anyhow::Result;
use clap::Args;
use gantry_core::{Axes, KinematicsEngine, home_axes, homing::SimulatedEndstops};
use std::path::PathBuf;

#[derive(Args)]
pub struct StatusArgs {
    /// Path to the machine description (TOML or JSON).
    pub config: PathBuf,

    /// Home every axis against simulated endstops first.
    #[arg(long)]
    pub homed: bool,
}

impl StatusArgs {
    pub fn run(&self) -> Result<()> {
        let (_, mut kin) = config::load(&self.config)?;
        if self.homed {
            home_axes(&mut kin, &mut SimulatedEndstops::new(), Axes::XYZ)?;
        }
        super::print_json(&kin.status(0.0))
    }
}
