use anyhow::{Context, Result};
use gantry_core::{Kinematics, MachineConfig};
use std::{fs, path::Path};

/// Load a machine description from a file, auto-detecting TOML or JSON format
pub fn from_file<P: AsRef<Path>>(path: P) -> Result<MachineConfig> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;

    let extension = path.extension().and_then(|s| s.to_str());

    match extension {
        Some("toml") => from_toml(&content),
        Some("json") => from_json(&content),
        _ => {
            // Try TOML first (preferred), fall back to JSON
            from_toml(&content).or_else(|_| from_json(&content))
        }
    }
}

/// Parse a machine description from a TOML string
pub fn from_toml(content: &str) -> Result<MachineConfig> {
    toml::from_str(content).context("failed to parse config as TOML")
}

/// Parse a machine description from a JSON string
pub fn from_json(content: &str) -> Result<MachineConfig> {
    serde_json::from_str(content).context("failed to parse config as JSON")
}

/// Load a machine description and build its kinematics
pub fn load<P: AsRef<Path>>(path: P) -> Result<(MachineConfig, Kinematics)> {
    let path = path.as_ref();
    let config = from_file(path)?;
    let kin = Kinematics::from_config(&config)
        .with_context(|| format!("invalid machine description {}", path.display()))?;
    tracing::debug!(config = %path.display(), kinematics = kin.name(), "machine loaded");
    Ok((config, kin))
}
