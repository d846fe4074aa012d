//! Configuration parsing for the fire watch pipeline.
//!
//! This module owns translation of CLI arguments into a `WatchConfig` which the
//! detection loop, alerting and the HTTP server use without re-parsing flags.

use std::{path::PathBuf, time::Duration};

use anyhow::{Result, anyhow, bail};
use clap::Args;

use crate::{filter::FilterConfig, location::GeoPoint};

pub const DEFAULT_DASHBOARD_API: &str = "http://localhost:3000/api/local-fires";
pub const DEFAULT_STREAM_PORT: u16 = 5000;
pub const DEFAULT_TEMPORAL_FRAMES: u32 = 5;

#[derive(Clone, Debug)]
/// Canonical configuration shared by every stage of the pipeline.
pub struct WatchConfig {
    /// Device index, video file, stream URL, or directory of stills.
    pub source: String,
    /// TorchScript model path.
    pub model_path: PathBuf,
    /// Capture width handed to the frame source.
    pub width: i32,
    /// Capture height handed to the frame source.
    pub height: i32,
    /// Replay rate for image-sequence sources.
    pub sequence_fps: f32,
    /// Minimum detector confidence forwarded to filtering.
    pub confidence_threshold: f32,
    /// Square detector input size.
    pub detector_size: u32,
    pub filter: FilterConfig,
    /// Consecutive-evidence frames required before a fire is confirmed.
    pub temporal_frames: u32,
    /// Scale applied to annotated frames before they are published.
    pub display_scale: f32,
    pub jpeg_quality: u8,
    pub alerts: AlertOptions,
    pub location: LocationOptions,
    /// Port the HTTP server binds on all interfaces.
    pub port: u16,
    pub use_cpu: bool,
    pub telemetry: TelemetryOptions,
}

/// Where and how confirmed fires are reported.
#[derive(Clone, Debug)]
pub struct AlertOptions {
    /// Downstream dashboard endpoint; `None` disables the POST.
    pub dashboard_api: Option<String>,
    pub timeout: Duration,
    pub log_path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct LocationOptions {
    pub start: GeoPoint,
    /// Report `start` forever instead of random-walking from it.
    pub fixed: bool,
}

/// Optional telemetry knobs for tracing.
#[derive(Clone, Debug, Default)]
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing pipeline spans.
    pub chrome_trace_path: Option<PathBuf>,
    /// Lower the default log level to `debug`.
    pub verbose: bool,
}

/// CLI arguments accepted by the `watch` subcommand.
#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Camera index, video file, stream URL, or a directory of stills.
    #[arg(long = "source", value_name = "URI", default_value = "0")]
    pub source: String,
    /// TorchScript model path.
    #[arg(long = "model", value_name = "PATH", default_value = "best.torchscript")]
    pub model_path: PathBuf,
    /// Capture width in pixels.
    #[arg(long = "width", value_name = "PX", default_value_t = 1280)]
    pub width: i32,
    /// Capture height in pixels.
    #[arg(long = "height", value_name = "PX", default_value_t = 720)]
    pub height: i32,
    /// Frame rate used when replaying a directory of stills.
    #[arg(long = "fps", value_name = "FPS", default_value_t = 15.0)]
    pub fps: f32,
    /// Detector confidence threshold (0-1).
    #[arg(long = "confidence", value_name = "CONF", default_value_t = 0.25)]
    pub confidence: f32,
    /// Detector input size in pixels.
    #[arg(long = "imgsz", value_name = "PX", default_value_t = 640)]
    pub imgsz: u32,
    /// Smallest accepted box, as a fraction of the frame area.
    #[arg(long = "min-area-ratio", value_name = "RATIO", default_value_t = 0.002)]
    pub min_area_ratio: f32,
    /// Smallest accepted mean HSV saturation inside a box (0-255).
    #[arg(long = "min-saturation", value_name = "S", default_value_t = 60.0)]
    pub min_saturation: f32,
    /// Frames of sustained detection required to confirm a fire.
    #[arg(long = "temporal-frames", value_name = "N", default_value_t = DEFAULT_TEMPORAL_FRAMES)]
    pub temporal_frames: u32,
    /// Scale applied to streamed frames.
    #[arg(long = "display-scale", value_name = "SCALE", default_value_t = 0.5)]
    pub display_scale: f32,
    /// JPEG quality for the stream (1-100).
    #[arg(long = "jpeg-quality", value_name = "QUALITY", default_value_t = 85)]
    pub jpeg_quality: i32,
    /// Dashboard endpoint receiving alerts, or `none`.
    #[arg(long = "dashboard-api", value_name = "URL", default_value = DEFAULT_DASHBOARD_API)]
    pub dashboard_api: String,
    /// Timeout for the dashboard POST.
    #[arg(long = "alert-timeout-ms", value_name = "MS", default_value_t = 2_000)]
    pub alert_timeout_ms: u64,
    /// Append-only alert log.
    #[arg(long = "alert-log", value_name = "PATH", default_value = "fire_log.txt")]
    pub alert_log: PathBuf,
    /// HTTP port for the stream and status API.
    #[arg(long = "port", value_name = "PORT", default_value_t = DEFAULT_STREAM_PORT)]
    pub port: u16,
    /// Starting latitude of the simulated GPS.
    #[arg(long = "start-lat", value_name = "DEG", default_value_t = 12.9716)]
    pub start_lat: f64,
    /// Starting longitude of the simulated GPS.
    #[arg(long = "start-lon", value_name = "DEG", default_value_t = 77.5946)]
    pub start_lon: f64,
    /// Report the starting coordinates without simulated drift.
    #[arg(long = "fixed-location", action = clap::ArgAction::SetTrue)]
    pub fixed_location: bool,
    /// Force CPU inference.
    #[arg(long = "cpu", action = clap::ArgAction::SetTrue)]
    pub use_cpu: bool,
    /// Enable debug logging.
    #[arg(long = "verbose", action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
}

impl TryFrom<WatchArgs> for WatchConfig {
    type Error = anyhow::Error;

    fn try_from(args: WatchArgs) -> Result<Self> {
        if args.source.trim().is_empty() {
            bail!("--source must not be empty");
        }
        if args.width <= 0 || args.height <= 0 {
            bail!("Capture width and height must be positive integers");
        }
        if !(args.fps > 0.0) {
            bail!("--fps must be positive");
        }
        if !(0.0..=1.0).contains(&args.confidence) {
            bail!("--confidence must be between 0 and 1");
        }
        if args.imgsz < 32 {
            bail!("--imgsz must be at least 32");
        }
        if !(0.0..=1.0).contains(&args.min_area_ratio) {
            bail!("--min-area-ratio must be between 0 and 1");
        }
        if !(0.0..=255.0).contains(&args.min_saturation) {
            bail!("--min-saturation must be between 0 and 255");
        }
        if args.temporal_frames == 0 {
            bail!("--temporal-frames must be at least 1");
        }
        if !(args.display_scale > 0.0 && args.display_scale <= 4.0) {
            bail!("--display-scale must be in (0, 4]");
        }
        if !(1..=100).contains(&args.jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }
        if args.alert_timeout_ms == 0 {
            bail!("--alert-timeout-ms must be at least 1");
        }
        let start = GeoPoint::new(args.start_lat, args.start_lon)
            .ok_or_else(|| anyhow!("--start-lat/--start-lon are outside valid coordinates"))?;

        let dashboard_api = match args.dashboard_api.trim() {
            "" | "none" => None,
            url if url.starts_with("http://") || url.starts_with("https://") => {
                Some(url.to_string())
            }
            other => bail!("--dashboard-api must be an http(s) URL or `none`, got {other:?}"),
        };

        Ok(Self {
            source: args.source,
            model_path: args.model_path,
            width: args.width,
            height: args.height,
            sequence_fps: args.fps,
            confidence_threshold: args.confidence,
            detector_size: args.imgsz,
            filter: FilterConfig {
                min_area_ratio: args.min_area_ratio,
                min_saturation: args.min_saturation,
            },
            temporal_frames: args.temporal_frames,
            display_scale: args.display_scale,
            jpeg_quality: args.jpeg_quality as u8,
            alerts: AlertOptions {
                dashboard_api,
                timeout: Duration::from_millis(args.alert_timeout_ms),
                log_path: args.alert_log,
            },
            location: LocationOptions {
                start,
                fixed: args.fixed_location,
            },
            port: args.port,
            use_cpu: args.use_cpu,
            telemetry: TelemetryOptions {
                chrome_trace_path: args.chrome_trace,
                verbose: args.verbose,
            },
        })
    }
}

impl WatchConfig {
    /// JSON value reported as `video_source`: device indices as numbers, everything
    /// else verbatim.
    pub fn source_json(&self) -> serde_json::Value {
        match self.source.parse::<i64>() {
            Ok(index) => serde_json::Value::from(index),
            Err(_) => serde_json::Value::from(self.source.clone()),
        }
    }
}
