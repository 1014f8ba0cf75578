//! Coordinate Model
//!
//! The position value that travels from the scheduler to every subscriber.
//! `Coordinate` is `Copy`: each delivery owns an independent value, so
//! formatting on the subscriber side never observes a later tick.

use std::fmt;
use serde::{Serialize, Deserialize};

/// Lower latitude bound (degrees).
pub const LAT_MIN: f64 = -90.0;
/// Upper latitude bound (degrees).
pub const LAT_MAX: f64 = 90.0;
/// Lower longitude bound (degrees).
pub const LON_MIN: f64 = -180.0;
/// Upper longitude bound (degrees).
pub const LON_MAX: f64 = 180.0;

/// Degrees subtracted from latitude and longitude on every tick.
pub const DEFAULT_STEP_DEGREES: f64 = 0.08;

/// Starting latitude of the shared position.
pub const INITIAL_LATITUDE: f64 = 51.477487;
/// Starting longitude of the shared position.
pub const INITIAL_LONGITUDE: f64 = -0.341004;
/// Starting altitude of the shared position.
pub const INITIAL_ALTITUDE: f64 = 1000.0;

/// A 3D position plus the unix time (seconds) it was computed at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude in degrees, kept within [-90, 90].
    #[serde(rename = "lat")]
    pub latitude: f64,
    /// Longitude in degrees, kept within [-180, 180].
    #[serde(rename = "lon")]
    pub longitude: f64,
    /// Altitude, unconstrained.
    #[serde(rename = "alt")]
    pub altitude: f64,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
}

impl Coordinate {
    /// Create a coordinate.
    pub const fn new(latitude: f64, longitude: f64, altitude: f64, timestamp: i64) -> Self {
        Self { latitude, longitude, altitude, timestamp }
    }

    /// The fixed starting point, stamped with `timestamp`.
    pub const fn initial(timestamp: i64) -> Self {
        Self::new(INITIAL_LATITUDE, INITIAL_LONGITUDE, INITIAL_ALTITUDE, timestamp)
    }

    /// Compute the next position: both angles move down by `step` and wrap
    /// independently at their domain edges. Altitude is carried over.
    pub fn advanced(&self, step: f64, timestamp: i64) -> Self {
        Self {
            latitude: wrap_around(self.latitude - step, LAT_MIN, LAT_MAX),
            longitude: wrap_around(self.longitude - step, LON_MIN, LON_MAX),
            altitude: self.altitude,
            timestamp,
        }
    }

    /// Whether latitude and longitude are inside their domains.
    pub fn in_bounds(&self) -> bool {
        (LAT_MIN..=LAT_MAX).contains(&self.latitude)
            && (LON_MIN..=LON_MAX).contains(&self.longitude)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:.6}, {:.6}, {:.1}) @ {}",
            self.latitude, self.longitude, self.altitude, self.timestamp
        )
    }
}

/// Boundary wrap: below `low` jumps to `high`, above `high` jumps to `low`.
///
/// This is not a modulo. A value that overshoots an edge lands exactly on
/// the opposite edge, and values inside `[low, high]` pass through untouched.
#[inline]
pub fn wrap_around(value: f64, low: f64, high: f64) -> f64 {
    if value < low {
        high
    } else if value > high {
        low
    } else {
        value
    }
}

/// Current unix time in whole seconds.
pub fn unix_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}
