use anyhow::{Context, Result};
use serde::Serialize;

pub mod check;
pub mod forward;
pub mod home;
pub mod inverse;
pub mod status;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{out}");
    Ok(())
}
