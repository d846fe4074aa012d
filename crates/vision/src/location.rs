//! Location capability: where the camera is when a frame is processed.

use std::sync::Mutex;

use rand::Rng;
use serde::Serialize;

/// Largest per-read drift of the simulated GPS, in degrees.
pub const GPS_JITTER_DEG: f64 = 0.0001;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Returns `None` for coordinates outside the WGS84 ranges.
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        ((-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon))
            .then_some(Self { lat, lon })
    }

    /// Origin used before the first frame has been processed.
    pub const fn unknown() -> Self {
        Self { lat: 0.0, lon: 0.0 }
    }
}

pub trait LocationProvider: Send + Sync {
    fn location(&self) -> GeoPoint;
}

/// Always reports the same coordinates.
pub struct FixedLocation(pub GeoPoint);

impl LocationProvider for FixedLocation {
    fn location(&self) -> GeoPoint {
        self.0
    }
}

/// Random-walk GPS stand-in for bench and drone-less runs.
pub struct SimulatedGps {
    position: Mutex<GeoPoint>,
}

impl SimulatedGps {
    pub fn new(start: GeoPoint) -> Self {
        Self {
            position: Mutex::new(start),
        }
    }
}

impl LocationProvider for SimulatedGps {
    fn location(&self) -> GeoPoint {
        let mut rng = rand::thread_rng();
        let mut guard = match self.position.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.lat = (guard.lat + rng.gen_range(-GPS_JITTER_DEG..=GPS_JITTER_DEG)).clamp(-90.0, 90.0);
        guard.lon =
            (guard.lon + rng.gen_range(-GPS_JITTER_DEG..=GPS_JITTER_DEG)).clamp(-180.0, 180.0);
        GeoPoint {
            lat: round6(guard.lat),
            lon: round6(guard.lon),
        }
    }
}

fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}
