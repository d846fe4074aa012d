//! Shared detection status read by the HTTP API and written once per frame.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::Serialize;

use crate::location::GeoPoint;

pub const LABEL_IDLE: &str = "No Fire";
pub const LABEL_MONITORING: &str = "✓ Monitoring";
pub const LABEL_CONFIRMED: &str = "🔥 Fire Detected!";

/// One consistent view of the pipeline's state, serialised as the status body.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub fire_detected: bool,
    pub location: GeoPoint,
    pub confidence: f32,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    #[serde(rename = "alert_status")]
    pub alert_label: String,
}

impl StatusSnapshot {
    /// Snapshot for a processed frame, stamped now.
    pub fn for_frame(confirmed: bool, location: GeoPoint, confidence: f32) -> Self {
        Self {
            fire_detected: confirmed,
            location,
            confidence: if confirmed { confidence } else { 0.0 },
            timestamp: now_seconds(),
            alert_label: if confirmed {
                LABEL_CONFIRMED
            } else {
                LABEL_MONITORING
            }
            .to_string(),
        }
    }

    pub fn idle() -> Self {
        Self {
            fire_detected: false,
            location: GeoPoint::unknown(),
            confidence: 0.0,
            timestamp: now_seconds(),
            alert_label: LABEL_IDLE.to_string(),
        }
    }
}

fn now_seconds() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Cheap-to-clone handle to the current [`StatusSnapshot`].
///
/// Writes replace the whole snapshot under one lock; reads copy it out. No I/O happens
/// while the lock is held.
#[derive(Clone)]
pub struct StatusStore {
    inner: Arc<Mutex<StatusSnapshot>>,
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StatusSnapshot::idle())),
        }
    }

    pub fn write(&self, snapshot: StatusSnapshot) {
        *self.lock() = snapshot;
    }

    pub fn read(&self) -> StatusSnapshot {
        self.lock().clone()
    }

    // Writes are a single assignment; a poisoned lock still holds a whole snapshot.
    fn lock(&self) -> MutexGuard<'_, StatusSnapshot> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn starts_idle() {
        let store = StatusStore::new();
        let snapshot = store.read();
        assert!(!snapshot.fire_detected);
        assert_eq!(snapshot.alert_label, LABEL_IDLE);
    }

    #[test]
    fn unconfirmed_frames_report_zero_confidence() {
        let snapshot = StatusSnapshot::for_frame(false, GeoPoint::unknown(), 0.8);
        assert_eq!(snapshot.confidence, 0.0);
        assert_eq!(snapshot.alert_label, LABEL_MONITORING);
    }

    #[test]
    fn serialises_as_the_status_body() {
        let snapshot = StatusSnapshot {
            fire_detected: true,
            location: GeoPoint {
                lat: 12.5,
                lon: 77.25,
            },
            confidence: 0.5,
            timestamp: 1_700_000_000.5,
            alert_label: LABEL_CONFIRMED.to_string(),
        };
        let value = serde_json::to_value(&snapshot).expect("serialise");
        assert_eq!(
            value,
            serde_json::json!({
                "fire_detected": true,
                "location": {"lat": 12.5, "lon": 77.25},
                "confidence": 0.5,
                "timestamp": 1_700_000_000.5,
                "alert_status": "🔥 Fire Detected!"
            })
        );
    }

    #[test]
    fn readers_never_observe_torn_writes() {
        let store = StatusStore::new();
        let writer = {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..5_000u32 {
                    let confirmed = i % 2 == 0;
                    let marker = i as f64;
                    store.write(StatusSnapshot::for_frame(
                        confirmed,
                        GeoPoint {
                            lat: marker,
                            lon: -marker,
                        },
                        if confirmed { 1.0 } else { 0.0 },
                    ));
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    for _ in 0..5_000 {
                        let s = store.read();
                        if s.alert_label == LABEL_IDLE {
                            continue;
                        }
                        assert_eq!(s.location.lat, -s.location.lon);
                        let even = (s.location.lat as u32) % 2 == 0;
                        assert_eq!(s.fire_detected, even);
                        assert_eq!(s.confidence == 1.0, even);
                        assert_eq!(s.alert_label == LABEL_CONFIRMED, even);
                    }
                })
            })
            .collect();
        writer.join().expect("writer");
        for reader in readers {
            reader.join().expect("reader");
        }
    }
}
