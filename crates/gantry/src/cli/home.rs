use crate::config;
use anyhow::{Context, Result};
use clap::Args;
use gantry_core::{Axes, KinematicsEngine, home_axes, homing::SimulatedEndstops};
use serde_json::json;
use std::path::PathBuf;

#[derive(Args)]
pub struct HomeArgs {
    /// Path to the machine description (TOML or JSON).
    pub config: PathBuf,

    /// Axes to home, e.g. `xy`.
    #[arg(long, default_value = "xyz")]
    pub axes: String,

    /// Endstop that never triggers.
    #[arg(long)]
    pub stuck: Vec<String>,
}

impl HomeArgs {
    pub fn run(&self) -> Result<()> {
        let axes = Axes::parse(&self.axes)
            .with_context(|| format!("invalid axes {:?}, expected letters from xyz", self.axes))?;
        let (_, mut kin) = config::load(&self.config)?;

        let mut driver = self
            .stuck
            .iter()
            .fold(SimulatedEndstops::new(), |driver, name| driver.with_stuck(name.as_str()));
        let outcome = home_axes(&mut kin, &mut driver, axes)?;

        let phases: Vec<String> = outcome.phases.iter().map(|p| format!("{p:?}")).collect();
        super::print_json(&json!({
            "axes": outcome.axes.to_string(),
            "position": outcome.position,
            "phases": phases,
            "endstop_searches": driver.moves().len(),
            "status": kin.status(0.0),
        }))
    }
}
