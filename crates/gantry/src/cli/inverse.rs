use crate::config;
use anyhow::{Result, bail};
use clap::Args;
use gantry_core::{Axes, Coord, KinematicsEngine};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Args)]
pub struct InverseArgs {
    /// Path to the machine description (TOML or JSON).
    pub config: PathBuf,

    #[arg(allow_negative_numbers = true)]
    pub x: f64,
    #[arg(allow_negative_numbers = true)]
    pub y: f64,
    #[arg(allow_negative_numbers = true)]
    pub z: f64,
}

#[derive(Serialize)]
struct Actuator<'a> {
    name: &'a str,
    position: f64,
    mcu_position: i64,
}

impl InverseArgs {
    pub fn run(&self) -> Result<()> {
        let (_, mut kin) = config::load(&self.config)?;
        let pos = Coord::new(self.x, self.y, self.z);
        kin.set_position(pos, Axes::NONE);

        let actuators: Vec<_> = kin
            .rails()
            .iter()
            .map(|rail| Actuator {
                name: rail.name(),
                position: rail.commanded_position(),
                mcu_position: rail.stepper().mcu_position(),
            })
            .collect();
        if let Some(bad) = actuators.iter().find(|a| !a.position.is_finite()) {
            bail!("{pos} is unreachable for {}", bad.name);
        }
        super::print_json(&actuators)
    }
}
