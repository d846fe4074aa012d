use std::time::Duration;

use anyhow::{Result, anyhow};
use clap::{Args, Parser, Subcommand};
use vision::{WatchArgs, location::GeoPoint};

#[derive(Debug, Parser)]
#[command(
    name = "firewatch",
    version,
    about = "Fire detection with temporal confirmation, alerting and an MJPEG stream"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the detection loop and serve the stream and status API.
    Watch(WatchArgs),
    /// Print simulated GPS fixes.
    Gps(GpsArgs),
}

#[derive(Debug, Args)]
pub struct GpsArgs {
    /// Stop after this many fixes instead of running until Ctrl+C.
    #[arg(long = "count", value_name = "N")]
    pub count: Option<u64>,
    #[arg(long = "start-lat", value_name = "DEG", default_value_t = 12.9716)]
    pub start_lat: f64,
    #[arg(long = "start-lon", value_name = "DEG", default_value_t = 77.5946)]
    pub start_lon: f64,
    /// Delay between fixes.
    #[arg(long = "interval-ms", value_name = "MS", default_value_t = 1_000)]
    pub interval_ms: u64,
}

impl GpsArgs {
    pub fn start(&self) -> Result<GeoPoint> {
        GeoPoint::new(self.start_lat, self.start_lon)
            .ok_or_else(|| anyhow!("--start-lat/--start-lon are outside valid coordinates"))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}
