use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cli;
mod config;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine readable
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Status(args) => args.run(),
        Command::Inverse(args) => args.run(),
        Command::Forward(args) => args.run(),
        Command::Home(args) => args.run(),
        Command::Check(args) => args.run(),
    }
}

#[derive(Parser)]
#[command(name = "gantry", about = "Inspect machine kinematics")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the kinematics status of a machine as JSON.
    Status(cli::status::StatusArgs),
    /// Compute actuator positions for a toolhead position.
    Inverse(cli::inverse::InverseArgs),
    /// Compute the toolhead position for actuator readings.
    Forward(cli::forward::ForwardArgs),
    /// Run the homing sequence against simulated endstops.
    Home(cli::home::HomeArgs),
    /// Validate a move on a freshly homed machine.
    Check(cli::check::CheckArgs),
}
