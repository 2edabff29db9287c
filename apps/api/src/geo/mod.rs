//! Geolocation: haversine distance and district centroid lookup.
//!
//! Pure functions only. A coordinate that is absent, non-finite or carries a
//! zero component is treated as "unknown" and yields [`UNRESOLVED_DISTANCE_KM`],
//! so callers filter such pairs with an ordinary radius comparison.

mod gazetteer;

use serde::{Deserialize, Serialize};

pub use gazetteer::{district_centroid, DistrictMatch};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Distance reported when either side of a pair has no usable coordinate.
pub const UNRESOLVED_DISTANCE_KM: f64 = f64::INFINITY;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Zero components are how upstream records encode "not geocoded".
    pub fn is_usable(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && self.lat != 0.0
            && self.lng != 0.0
            && self.lat.abs() <= 90.0
            && self.lng.abs() <= 180.0
    }

    /// Returns `Some(self)` only when the point is usable.
    pub fn usable(self) -> Option<Self> {
        self.is_usable().then_some(self)
    }
}

/// Great-circle distance in kilometres, rounded to two decimals.
pub fn distance_km(a: Option<GeoPoint>, b: Option<GeoPoint>) -> f64 {
    let (a, b) = match (a.and_then(GeoPoint::usable), b.and_then(GeoPoint::usable)) {
        (Some(a), Some(b)) => (a, b),
        _ => return UNRESOLVED_DISTANCE_KM,
    };

    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    ((EARTH_RADIUS_KM * c) * 100.0).round() / 100.0
}
