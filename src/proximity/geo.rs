//! Great-circle distance

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::EARTH_RADIUS_M;

/// A WGS-84 coordinate in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Finite and inside the valid latitude/longitude ranges
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Haversine distance in meters
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        haversine_m(self, other)
    }
}

/// Haversine great-circle distance in meters on a spherical Earth
pub fn haversine_m(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// One self-position fix from the position source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub point: GeoPoint,
    pub timestamp: DateTime<Utc>,
}

impl Position {
    pub fn new(point: GeoPoint, timestamp: DateTime<Utc>) -> Self {
        Self { point, timestamp }
    }

    /// Fix taken now
    pub fn now(latitude: f64, longitude: f64) -> Self {
        Self::new(GeoPoint::new(latitude, longitude), Utc::now())
    }
}
