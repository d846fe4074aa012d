//! Alert dispatch for confirmed fires: local notification, durable log line, and a
//! best-effort POST to the dashboard.
//!
//! Every action is independent. Failures are logged and counted, never retried; the
//! confirmation state machine decides when a new episode may dispatch again.

use std::{
    fs::OpenOptions,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::Duration,
};

use chrono::{DateTime, Local};
use reqwest::{StatusCode, blocking::Client};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{location::GeoPoint, telemetry};

/// A confirmed detection about to be reported.
#[derive(Clone, Debug, PartialEq)]
pub struct FireAlert {
    pub location: GeoPoint,
    pub confidence: f32,
    pub raised_at: DateTime<Local>,
}

impl FireAlert {
    pub fn new(location: GeoPoint, confidence: f32) -> Self {
        Self {
            location,
            confidence,
            raised_at: Local::now(),
        }
    }

    /// Line appended to the alert log, newline included.
    pub fn log_line(&self) -> String {
        format!(
            "{} - FIRE at {}, {}\n",
            self.raised_at.format("%a %b %e %H:%M:%S %Y"),
            self.location.lat,
            self.location.lon
        )
    }
}

/// JSON body POSTed to the dashboard.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlertReport {
    pub lat: f64,
    pub lon: f64,
    pub confidence: f64,
}

impl From<&FireAlert> for AlertReport {
    fn from(alert: &FireAlert) -> Self {
        Self {
            lat: alert.location.lat,
            lon: alert.location.lon,
            confidence: (alert.confidence as f64 * 1000.0).round() / 1000.0,
        }
    }
}

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("dashboard request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("dashboard answered {0}")]
    Status(StatusCode),
    #[error("failed to append to alert log {path:?}: {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Blocking local notification; always run off the detection thread.
pub trait Notifier: Send + Sync {
    fn notify(&self, alert: &FireAlert);
}

/// Logs a banner and rings the terminal bell three times.
pub struct TerminalNotifier {
    pub rings: u32,
    pub gap: Duration,
}

impl Default for TerminalNotifier {
    fn default() -> Self {
        Self {
            rings: 3,
            gap: Duration::from_millis(500),
        }
    }
}

impl Notifier for TerminalNotifier {
    fn notify(&self, alert: &FireAlert) {
        warn!(
            lat = alert.location.lat,
            lon = alert.location.lon,
            confidence = alert.confidence,
            "FIRE ALERT"
        );
        let mut stderr = io::stderr();
        for ring in 0..self.rings {
            let _ = stderr.write_all(b"\x07");
            let _ = stderr.flush();
            if ring + 1 < self.rings {
                thread::sleep(self.gap);
            }
        }
    }
}

/// Remote receiver of alert reports.
pub trait AlertSink: Send + Sync {
    fn deliver(&self, report: &AlertReport) -> Result<(), AlertError>;

    /// Human-readable target for log lines.
    fn describe(&self) -> String;
}

/// POSTs reports as JSON with a hard request timeout.
pub struct HttpAlertSink {
    client: Client,
    url: String,
}

impl HttpAlertSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AlertError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl AlertSink for HttpAlertSink {
    fn deliver(&self, report: &AlertReport) -> Result<(), AlertError> {
        let response = self.client.post(&self.url).json(report).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(AlertError::Status(status));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Append-only text log of dispatched alerts.
#[derive(Clone, Debug)]
pub struct AlertLog {
    path: PathBuf,
}

impl AlertLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, alert: &FireAlert) -> Result<(), AlertError> {
        let to_log_error = |source| AlertError::Log {
            path: self.path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(to_log_error)?;
        file.write_all(alert.log_line().as_bytes())
            .map_err(to_log_error)
    }
}

/// Detached work started by one dispatch. Dropping it leaves the threads running.
#[derive(Default)]
pub struct DispatchReceipt {
    pub logged: bool,
    pub notification: Option<thread::JoinHandle<()>>,
    pub delivery: Option<thread::JoinHandle<bool>>,
}

impl DispatchReceipt {
    /// Block until the detached work finishes; returns whether the POST succeeded
    /// (`None` when no sink was configured or it never started).
    pub fn wait(self) -> Option<bool> {
        if let Some(handle) = self.notification {
            let _ = handle.join();
        }
        self.delivery.and_then(|handle| handle.join().ok())
    }
}

pub struct AlertDispatcher {
    notifier: Arc<dyn Notifier>,
    log: AlertLog,
    sink: Option<Arc<dyn AlertSink>>,
}

impl AlertDispatcher {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        log: AlertLog,
        sink: Option<Arc<dyn AlertSink>>,
    ) -> Self {
        Self {
            notifier,
            log,
            sink,
        }
    }

    /// Fire every alert action once. Never blocks on the notification or the network.
    pub fn dispatch(&self, alert: FireAlert) -> DispatchReceipt {
        info!(
            "FIRE ALERT at {}, {} (confidence {:.2})",
            alert.location.lat, alert.location.lon, alert.confidence
        );
        metrics::counter!("firewatch_alerts_total").increment(1);

        let notification = {
            let notifier = self.notifier.clone();
            let alert = alert.clone();
            spawn_detached("alert-notify", move || notifier.notify(&alert))
        };

        let logged = match self.log.append(&alert) {
            Ok(()) => true,
            Err(err) => {
                error!("{err}");
                false
            }
        };

        let delivery = self.sink.clone().and_then(|sink| {
            let report = AlertReport::from(&alert);
            spawn_detached("alert-delivery", move || deliver(sink.as_ref(), &report))
        });

        DispatchReceipt {
            logged,
            notification,
            delivery,
        }
    }
}

fn deliver(sink: &dyn AlertSink, report: &AlertReport) -> bool {
    match sink.deliver(report) {
        Ok(()) => {
            info!(
                "Sent to dashboard: {}, {}, conf: {:.1}%",
                report.lat,
                report.lon,
                report.confidence * 100.0
            );
            true
        }
        Err(err) => {
            warn!("Dashboard {} unreachable: {err}", sink.describe());
            metrics::counter!("firewatch_alert_delivery_failures_total").increment(1);
            false
        }
    }
}

fn spawn_detached<F, T>(name: &str, f: F) -> Option<thread::JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match telemetry::spawn_thread(name, f) {
        Ok(handle) => Some(handle),
        Err(err) => {
            error!("failed to spawn {name} thread: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        reports: Mutex<Vec<AlertReport>>,
        fail: bool,
    }

    impl AlertSink for RecordingSink {
        fn deliver(&self, report: &AlertReport) -> Result<(), AlertError> {
            self.reports.lock().expect("lock").push(report.clone());
            if self.fail {
                Err(AlertError::Status(StatusCode::BAD_GATEWAY))
            } else {
                Ok(())
            }
        }

        fn describe(&self) -> String {
            "recording".into()
        }
    }

    #[derive(Default)]
    struct CountingNotifier(Mutex<u32>);

    impl Notifier for CountingNotifier {
        fn notify(&self, _alert: &FireAlert) {
            *self.0.lock().expect("lock") += 1;
        }
    }

    fn alert() -> FireAlert {
        FireAlert {
            location: GeoPoint {
                lat: 12.9716,
                lon: 77.5946,
            },
            confidence: 0.87654,
            raised_at: Local
                .with_ymd_and_hms(2026, 10, 3, 14, 3, 7)
                .single()
                .expect("valid time"),
        }
    }

    #[test]
    fn log_line_uses_ctime_layout() {
        assert_eq!(
            alert().log_line(),
            "Sat Oct  3 14:03:07 2026 - FIRE at 12.9716, 77.5946\n"
        );
    }

    #[test]
    fn report_rounds_confidence() {
        let report = AlertReport::from(&alert());
        assert_eq!(
            serde_json::to_value(&report).expect("serialise"),
            serde_json::json!({"lat": 12.9716, "lon": 77.5946, "confidence": 0.877})
        );
    }

    #[test]
    fn dispatch_runs_every_action_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = AlertLog::new(dir.path().join("fire_log.txt"));
        let sink = Arc::new(RecordingSink::default());
        let notifier = Arc::new(CountingNotifier::default());
        let dispatcher = AlertDispatcher::new(notifier.clone(), log.clone(), Some(sink.clone()));

        let receipt = dispatcher.dispatch(alert());
        assert!(receipt.logged);
        assert_eq!(receipt.wait(), Some(true));

        assert_eq!(*notifier.0.lock().expect("lock"), 1);
        assert_eq!(sink.reports.lock().expect("lock").len(), 1);
        let contents = std::fs::read_to_string(log.path()).expect("log");
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.ends_with("- FIRE at 12.9716, 77.5946\n"));
    }

    #[test]
    fn log_is_append_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = AlertLog::new(dir.path().join("fire_log.txt"));
        log.append(&alert()).expect("first");
        log.append(&alert()).expect("second");
        let contents = std::fs::read_to_string(log.path()).expect("log");
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn sink_failure_is_reported_not_retried() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let dispatcher = AlertDispatcher::new(
            Arc::new(CountingNotifier::default()),
            AlertLog::new(dir.path().join("fire_log.txt")),
            Some(sink.clone()),
        );

        let receipt = dispatcher.dispatch(alert());
        assert!(receipt.logged);
        assert_eq!(receipt.wait(), Some(false));
        assert_eq!(sink.reports.lock().expect("lock").len(), 1);
    }

    #[test]
    fn unwritable_log_does_not_stop_delivery() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = AlertDispatcher::new(
            Arc::new(CountingNotifier::default()),
            AlertLog::new(dir.path().join("missing").join("fire_log.txt")),
            Some(sink.clone()),
        );

        let receipt = dispatcher.dispatch(alert());
        assert!(!receipt.logged);
        assert_eq!(receipt.wait(), Some(true));
    }

    #[test]
    fn unreachable_dashboard_fails_within_timeout() {
        let sink = HttpAlertSink::new("http://127.0.0.1:9/api/local-fires", Duration::from_secs(2))
            .expect("client");
        let started = std::time::Instant::now();
        assert!(sink.deliver(&AlertReport::from(&alert())).is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    struct SlowNotifier(Mutex<u32>);

    impl Notifier for SlowNotifier {
        fn notify(&self, _alert: &FireAlert) {
            thread::sleep(Duration::from_secs(1));
            *self.0.lock().expect("lock") += 1;
        }
    }

    struct SlowSink(Mutex<Vec<AlertReport>>);

    impl AlertSink for SlowSink {
        fn deliver(&self, report: &AlertReport) -> Result<(), AlertError> {
            thread::sleep(Duration::from_secs(1));
            self.0.lock().expect("lock").push(report.clone());
            Ok(())
        }

        fn describe(&self) -> String {
            "slow".into()
        }
    }

    #[test]
    fn dispatch_returns_before_notification_and_delivery_finish() {
        let dir = tempfile::tempdir().expect("tempdir");
        let notifier = Arc::new(SlowNotifier(Mutex::new(0)));
        let sink = Arc::new(SlowSink(Mutex::new(Vec::new())));
        let dispatcher = AlertDispatcher::new(
            notifier.clone(),
            AlertLog::new(dir.path().join("fire_log.txt")),
            Some(sink.clone()),
        );

        let started = std::time::Instant::now();
        let receipt = dispatcher.dispatch(alert());
        assert!(started.elapsed() < Duration::from_millis(200));
        assert!(receipt.logged);
        assert!(sink.0.lock().expect("lock").is_empty());

        assert_eq!(receipt.wait(), Some(true));
        assert_eq!(*notifier.0.lock().expect("lock"), 1);
        assert_eq!(sink.0.lock().expect("lock").len(), 1);
    }
}
