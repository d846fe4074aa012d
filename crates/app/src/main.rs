mod cli;
mod gps;

use clap::Parser;
use vision::{WatchConfig, config::TelemetryOptions, telemetry};

use crate::cli::{Cli, Command};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Watch(args) => {
            let config = WatchConfig::try_from(args)?;
            let _telemetry = telemetry::init(&config.telemetry)?;
            vision::run(config)
        }
        Command::Gps(args) => {
            let _telemetry = telemetry::init(&TelemetryOptions::default())?;
            gps::run(args)
        }
    }
}
