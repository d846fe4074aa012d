//! Detection loop: pulls frames, runs the detector, and drives the
//! filter → confirmation → status/alert → publisher chain one frame at a time.
//!
//! Per-frame failures never leave the iteration; only startup failures reach the
//! caller of [`run`].

use std::{
    sync::{
        Arc, Once,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use crossbeam_channel::RecvTimeoutError;
use ml_core::{Candidate, Detect, FrameView};
use tracing::{debug, info, warn};
use video_ingest::{Frame, FrameReceiver};

use crate::{
    alert::{AlertDispatcher, AlertLog, AlertSink, DispatchReceipt, FireAlert, HttpAlertSink, TerminalNotifier},
    annotation::annotate_frame,
    config::{AlertOptions, WatchConfig},
    confirmation::{TemporalConfirmation, Transition},
    filter::{DetectionFilter, DetectionSignal, FilterConfig},
    location::{FixedLocation, LocationProvider, SimulatedGps},
    publisher::FramePublisher,
    server::{HealthInfo, ServerState, spawn_stream_server},
    status::{StatusSnapshot, StatusStore},
};

const PROGRESS_EVERY: u64 = 100;
const RECV_POLL: Duration = Duration::from_millis(200);

/// Per-loop tuning taken from [`WatchConfig`].
#[derive(Clone, Copy, Debug)]
pub struct LoopSettings {
    pub confidence_threshold: f32,
    pub size_hint: u32,
    pub display_scale: f32,
    pub filter: FilterConfig,
    pub temporal_frames: u32,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            size_hint: 640,
            display_scale: 0.5,
            filter: FilterConfig::default(),
            temporal_frames: crate::config::DEFAULT_TEMPORAL_FRAMES,
        }
    }
}

impl From<&WatchConfig> for LoopSettings {
    fn from(config: &WatchConfig) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            size_hint: config.detector_size,
            display_scale: config.display_scale,
            filter: config.filter,
            temporal_frames: config.temporal_frames,
        }
    }
}

/// What happened to one frame.
pub struct FrameReport {
    pub frame_number: u64,
    pub signal: DetectionSignal,
    pub transition: Transition,
    /// Set on the frame that dispatched an alert.
    pub alert: Option<DispatchReceipt>,
}

pub struct DetectionLoop {
    detector: Box<dyn Detect>,
    filter: DetectionFilter,
    confirmation: TemporalConfirmation,
    status: StatusStore,
    alerts: AlertDispatcher,
    frames: FramePublisher,
    location: Arc<dyn LocationProvider>,
    settings: LoopSettings,
    processed: u64,
}

impl DetectionLoop {
    pub fn new(
        detector: Box<dyn Detect>,
        settings: LoopSettings,
        status: StatusStore,
        alerts: AlertDispatcher,
        frames: FramePublisher,
        location: Arc<dyn LocationProvider>,
    ) -> Self {
        Self {
            detector,
            filter: DetectionFilter::new(settings.filter),
            confirmation: TemporalConfirmation::new(settings.temporal_frames),
            status,
            alerts,
            frames,
            location,
            settings,
            processed: 0,
        }
    }

    pub fn confirmation(&self) -> &TemporalConfirmation {
        &self.confirmation
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Run one full iteration for `frame`.
    pub fn process_frame(&mut self, frame: &Frame) -> FrameReport {
        let started = Instant::now();
        self.processed += 1;
        let frame_number = self.processed;
        let span = tracing::debug_span!("frame", number = frame_number);
        let _guard = span.enter();

        let candidates = self.detect(frame);
        let signal = match self.filter.evaluate(frame, &candidates) {
            Ok(signal) => signal,
            Err(err) => {
                warn!("Frame {frame_number} rejected by filter: {err}");
                DetectionSignal::default()
            }
        };

        let transition = self.confirmation.observe(signal.fire_detected);
        let location = self.location.location();
        let confidence = signal.best.map_or(0.0, |best| best.confidence);
        self.status.write(StatusSnapshot::for_frame(
            transition.confirmed,
            location,
            confidence,
        ));

        let alert = if transition.should_alert {
            let receipt = self.alerts.dispatch(FireAlert::new(location, confidence));
            self.confirmation.mark_alerted();
            Some(receipt)
        } else {
            None
        };

        match annotate_frame(
            frame,
            &signal,
            transition.confirmed,
            frame_number,
            self.settings.display_scale,
        ) {
            Ok(image) => self.frames.publish(image, frame_number),
            Err(err) => warn!("Frame {frame_number} not published: {err:#}"),
        }

        metrics::counter!("firewatch_frames_total").increment(1);
        metrics::counter!("firewatch_candidates_total").increment(candidates.len() as u64);
        if signal.fire_detected {
            metrics::counter!("firewatch_detections_total").increment(1);
        }
        metrics::gauge!("firewatch_confirmation_counter").set(transition.counter as f64);
        metrics::histogram!("firewatch_frame_seconds").record(started.elapsed().as_secs_f64());

        if frame_number % PROGRESS_EVERY == 0 {
            info!(
                "Processed {frame_number} frames (confirmation {}/{})",
                transition.counter,
                self.confirmation.threshold()
            );
        }

        FrameReport {
            frame_number,
            signal,
            transition,
            alert,
        }
    }

    /// Consume frames until the source disconnects or `shutdown` is raised.
    /// Returns the number of frames processed.
    pub fn run(&mut self, frames: &FrameReceiver, shutdown: &AtomicBool) -> u64 {
        while !shutdown.load(Ordering::SeqCst) {
            match frames.recv_timeout(RECV_POLL) {
                Ok(Ok(frame)) => {
                    self.process_frame(&frame);
                }
                Ok(Err(err)) => warn!("Skipping frame: {err}"),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Frame source closed");
                    break;
                }
            }
        }
        self.processed
    }

    fn detect(&self, frame: &Frame) -> Vec<Candidate> {
        let view = FrameView {
            bgr: &frame.data,
            width: frame.width.max(0) as u32,
            height: frame.height.max(0) as u32,
        };
        match self.detector.detect(
            &view,
            self.settings.confidence_threshold,
            self.settings.size_hint,
        ) {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!("Detector failed on frame {}: {err:#}", self.processed);
                Vec::new()
            }
        }
    }
}

/// Start the stream server and run the detection loop until Ctrl+C or the source ends.
pub fn run(config: WatchConfig) -> Result<()> {
    static CTRL_HANDLER: Once = Once::new();

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler(move || {
            handler_shutdown.store(true, Ordering::SeqCst);
        }) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });

    if let Err(err) = crate::telemetry::init_metrics_recorder() {
        warn!("Metrics disabled: {err:#}");
    }

    let span = tracing::info_span!(
        "firewatch",
        source = %config.source,
        port = config.port,
        temporal_frames = config.temporal_frames,
        use_cpu = config.use_cpu
    );
    let _span_guard = span.enter();

    let detector = load_detector(&config)?;
    let receiver = video_ingest::open_source(
        &config.source,
        (config.width, config.height),
        config.sequence_fps,
    )
    .with_context(|| format!("Failed to open video source {}", config.source))?;

    let status = StatusStore::new();
    let frames = FramePublisher::new(config.jpeg_quality);
    let alerts = build_dispatcher(&config.alerts)?;
    let location: Arc<dyn LocationProvider> = if config.location.fixed {
        Arc::new(FixedLocation(config.location.start))
    } else {
        Arc::new(SimulatedGps::new(config.location.start))
    };

    let server = spawn_stream_server(
        ServerState {
            status: status.clone(),
            frames: frames.clone(),
            health: HealthInfo {
                model: detector.name().to_string(),
                port: config.port,
                video_source: config.source_json(),
            },
        },
        config.port,
    )?;

    let mut detection = DetectionLoop::new(
        detector,
        LoopSettings::from(&config),
        status,
        alerts,
        frames,
        location,
    );
    info!(
        "Fire detection running (temporal filter: {} frames)",
        config.temporal_frames
    );
    let processed = detection.run(&receiver, &shutdown);

    server.stop();
    info!("Stopped after {processed} frames");
    Ok(())
}

fn build_dispatcher(opts: &AlertOptions) -> Result<AlertDispatcher> {
    let sink: Option<Arc<dyn AlertSink>> = match opts.dashboard_api.as_deref() {
        Some(url) => {
            let sink = HttpAlertSink::new(url, opts.timeout)
                .context("Failed to build dashboard client")?;
            Some(Arc::new(sink))
        }
        None => {
            info!("Dashboard delivery disabled");
            None
        }
    };
    debug!("Alert log at {}", opts.log_path.display());
    Ok(AlertDispatcher::new(
        Arc::new(TerminalNotifier::default()),
        AlertLog::new(opts.log_path.clone()),
        sink,
    ))
}

#[cfg(feature = "with-tch")]
fn load_detector(config: &WatchConfig) -> Result<Box<dyn Detect>> {
    use ml_core::{detector::TorchDetector, tch::Device};

    let device = if config.use_cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available()
    };
    let detector = TorchDetector::new(&config.model_path, device)
        .with_context(|| format!("Failed to load model {}", config.model_path.display()))?;
    info!("Loaded {} on {:?}", detector.name(), detector.device());
    Ok(Box::new(detector))
}

#[cfg(not(feature = "with-tch"))]
fn load_detector(config: &WatchConfig) -> Result<Box<dyn Detect>> {
    anyhow::bail!(
        "cannot load {}: built without the `with-tch` feature",
        config.model_path.display()
    )
}
