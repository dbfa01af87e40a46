//! Great-circle distances for tour locations.
//!
//! Locations are GeoJSON points stored as `{ "type": "Point",
//! "coordinates": [lng, lat] }`; request centers are `lat,lng`.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use thiserror::Error;

/// Rejected geo request parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeoError {
    #[error("Distance must be a non-negative number")]
    InvalidDistance,

    #[error("Unit must be either \"mi\" or \"km\"")]
    InvalidUnit,

    #[error("Please provide latitude and longitude in the format lat,lng")]
    MissingCoordinates,

    #[error("Latitude and longitude must be valid numbers")]
    InvalidCoordinates,
}

/// Unit for distances and radii.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceUnit {
    Miles,
    Kilometers,
}

impl DistanceUnit {
    /// Mean earth radius in this unit.
    pub fn earth_radius(self) -> f64 {
        match self {
            Self::Miles => 3963.2,
            Self::Kilometers => 6378.1,
        }
    }
}

impl FromStr for DistanceUnit {
    type Err = GeoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mi" => Ok(Self::Miles),
            "km" => Ok(Self::Kilometers),
            _ => Err(GeoError::InvalidUnit),
        }
    }
}

impl fmt::Display for DistanceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Miles => "mi",
            Self::Kilometers => "km",
        })
    }
}

/// A point in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl FromStr for LatLng {
    type Err = GeoError;

    /// Parse `lat,lng`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lat, lng) = s.split_once(',').ok_or(GeoError::MissingCoordinates)?;
        let lat: f64 = lat.trim().parse().map_err(|_| GeoError::InvalidCoordinates)?;
        let lng: f64 = lng.trim().parse().map_err(|_| GeoError::InvalidCoordinates)?;
        if !lat.is_finite() || !lng.is_finite() {
            return Err(GeoError::InvalidCoordinates);
        }
        Ok(Self { lat, lng })
    }
}

/// Parse a non-negative distance.
pub fn parse_distance(raw: &str) -> Result<f64, GeoError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or(GeoError::InvalidDistance)
}

/// Angle between two points on the unit sphere (haversine), in radians.
pub fn central_angle(a: LatLng, b: LatLng) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = lat2 - lat1;
    let dlng = (b.lng - a.lng).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * h.sqrt().min(1.0).asin()
}

/// Great-circle distance in the given unit.
pub fn distance(a: LatLng, b: LatLng, unit: DistanceUnit) -> f64 {
    central_angle(a, b) * unit.earth_radius()
}

/// Read a GeoJSON point (`coordinates: [lng, lat]`).
pub fn point_of(value: &Value) -> Option<LatLng> {
    let coordinates = value.get("coordinates")?.as_array()?;
    let lng = coordinates.first()?.as_f64()?;
    let lat = coordinates.get(1)?.as_f64()?;
    Some(LatLng { lat, lng })
}
