use crate::config;
use anyhow::{Context, Result, bail};
use clap::Args;
use gantry_core::{KinematicsEngine, stepper::StepperPositions};
use std::path::PathBuf;

#[derive(Args)]
pub struct ForwardArgs {
    /// Path to the machine description (TOML or JSON).
    pub config: PathBuf,

    /// Actuator readings as `name=value`.
    #[arg(required = true, allow_negative_numbers = true)]
    pub readings: Vec<String>,
}

impl ForwardArgs {
    pub fn run(&self) -> Result<()> {
        let (_, kin) = config::load(&self.config)?;
        let positions = parse_readings(&self.readings)?;
        for rail in kin.rails() {
            if !positions.contains_key(rail.name()) {
                bail!("missing reading for {}", rail.name());
            }
        }

        let pos = kin.calc_position(&positions);
        if !pos.is_finite() {
            bail!("readings do not correspond to a reachable position");
        }
        super::print_json(&pos)
    }
}

fn parse_readings(readings: &[String]) -> Result<StepperPositions> {
    readings
        .iter()
        .map(|reading| {
            let (name, value) = reading
                .split_once('=')
                .with_context(|| format!("expected name=value, got {reading:?}"))?;
            let value: f64 = value
                .trim()
                .parse()
                .with_context(|| format!("invalid reading for {name}"))?;
            Ok((name.trim().to_string(), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_readings() {
        let readings = ["stepper_a=12.5".to_string(), " stepper_b = -3 ".to_string()];
        let positions = parse_readings(&readings).unwrap();
        assert_eq!(positions["stepper_a"], 12.5);
        assert_eq!(positions["stepper_b"], -3.0);
    }

    #[test]
    fn test_parse_readings_rejects_garbage() {
        assert!(parse_readings(&["stepper_a".to_string()]).is_err());
        assert!(parse_readings(&["stepper_a=fast".to_string()]).is_err());
    }
}
