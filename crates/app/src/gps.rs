use std::{
    io::Write,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use anyhow::{Context, Result};
use tracing::warn;
use vision::location::{LocationProvider, SimulatedGps};

use crate::cli::GpsArgs;

/// Print one simulated fix per interval until `--count` is reached or Ctrl+C.
pub fn run(args: GpsArgs) -> Result<()> {
    let gps = SimulatedGps::new(args.start()?);
    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    if let Err(err) = ctrlc::set_handler(move || handler_stop.store(true, Ordering::SeqCst)) {
        warn!("Failed to install Ctrl+C handler: {err}");
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let interval = args.interval();
    let mut printed = 0u64;
    while !stop.load(Ordering::SeqCst) && args.count.map_or(true, |count| printed < count) {
        if printed > 0 {
            thread::sleep(interval);
        }
        write_fix(&gps, &mut out)?;
        printed += 1;
    }
    Ok(())
}

fn write_fix(gps: &dyn LocationProvider, out: &mut impl Write) -> Result<()> {
    let fix = gps.location();
    writeln!(out, "{}, {}", fix.lat, fix.lon).context("failed to write GPS fix")?;
    out.flush().context("failed to flush stdout")
}
