//! Point locations and nearest-within-radius queries.
//!
//! Proximity is answered in two stages: the store narrows candidates with an
//! indexed latitude/longitude [`BoundingBox`], then [`ProximityQuery::rank`]
//! computes exact great-circle distances, drops anything outside the radius
//! and orders the rest nearest first.

use crate::error::{ReliefError, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A validated WGS84 point. Serialized as a GeoJSON `Point`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GeoJsonPoint", into = "GeoJsonPoint")]
pub struct GeoPoint {
    longitude: f64,
    latitude: f64,
}

impl GeoPoint {
    pub fn new(longitude: f64, latitude: f64) -> Result<Self> {
        let coords = intake_registry::validate_coordinates(longitude, latitude)?;
        Ok(Self {
            longitude: coords.longitude,
            latitude: coords.latitude,
        })
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }
}

impl TryFrom<intake_registry::Coordinates> for GeoPoint {
    type Error = ReliefError;

    fn try_from(coords: intake_registry::Coordinates) -> Result<Self> {
        GeoPoint::new(coords.longitude, coords.latitude)
    }
}

#[derive(Serialize, Deserialize)]
struct GeoJsonPoint {
    #[serde(rename = "type")]
    kind: String,
    coordinates: [f64; 2],
}

impl TryFrom<GeoJsonPoint> for GeoPoint {
    type Error = ReliefError;

    fn try_from(point: GeoJsonPoint) -> Result<Self> {
        if point.kind != "Point" {
            return Err(ReliefError::Validation(format!(
                "unsupported geometry type '{}'",
                point.kind
            )));
        }
        GeoPoint::new(point.coordinates[0], point.coordinates[1])
    }
}

impl From<GeoPoint> for GeoJsonPoint {
    fn from(point: GeoPoint) -> Self {
        GeoJsonPoint {
            kind: "Point".into(),
            coordinates: [point.longitude, point.latitude],
        }
    }
}

/// Great-circle distance in kilometers (haversine, spherical earth).
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Rounds a distance to two decimals for presentation.
pub fn round_km(km: f64) -> f64 {
    (km * 100.0).round() / 100.0
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub min_longitude: f64,
    pub max_longitude: f64,
    pub min_latitude: f64,
    pub max_latitude: f64,
}

impl BoundingBox {
    const WORLD: BoundingBox = BoundingBox {
        min_longitude: -180.0,
        max_longitude: 180.0,
        min_latitude: -90.0,
        max_latitude: 90.0,
    };

    /// Smallest latitude/longitude box containing every point within
    /// `radius_m` of `center`. Boxes touching a pole or crossing the
    /// antimeridian widen to the full longitude range.
    pub fn around(center: GeoPoint, radius_m: f64) -> Self {
        let angular = radius_m / 1000.0 / EARTH_RADIUS_KM;
        if angular >= FRAC_PI_2 {
            return Self::WORLD;
        }

        let dlat = angular.to_degrees();
        let min_latitude = center.latitude - dlat;
        let max_latitude = center.latitude + dlat;
        if min_latitude <= -90.0 || max_latitude >= 90.0 {
            return BoundingBox {
                min_latitude: min_latitude.max(-90.0),
                max_latitude: max_latitude.min(90.0),
                ..Self::WORLD
            };
        }

        let ratio = angular.sin() / center.latitude.to_radians().cos();
        if ratio >= 1.0 {
            return BoundingBox {
                min_latitude,
                max_latitude,
                ..Self::WORLD
            };
        }
        let dlon = ratio.asin().to_degrees();
        let min_longitude = center.longitude - dlon;
        let max_longitude = center.longitude + dlon;
        if min_longitude < -180.0 || max_longitude > 180.0 {
            return BoundingBox {
                min_latitude,
                max_latitude,
                ..Self::WORLD
            };
        }

        BoundingBox {
            min_longitude,
            max_longitude,
            min_latitude,
            max_latitude,
        }
    }

    pub fn contains(&self, point: GeoPoint) -> bool {
        (self.min_longitude..=self.max_longitude).contains(&point.longitude)
            && (self.min_latitude..=self.max_latitude).contains(&point.latitude)
    }
}

/// Anything with a stable id and a point location.
pub trait Located {
    fn key(&self) -> &str;
    fn location(&self) -> GeoPoint;
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Nearby<T> {
    pub item: T,
    pub distance_km: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProximityQuery {
    center: GeoPoint,
    radius_m: f64,
}

impl ProximityQuery {
    pub fn new(center: GeoPoint, radius_km: f64) -> Result<Self> {
        if !radius_km.is_finite() || radius_km <= 0.0 {
            return Err(ReliefError::Validation(
                "radius must be a positive number of kilometers".into(),
            ));
        }
        Ok(Self {
            center,
            radius_m: radius_km * 1000.0,
        })
    }

    pub fn center(&self) -> GeoPoint {
        self.center
    }

    pub fn radius_m(&self) -> f64 {
        self.radius_m
    }

    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::around(self.center, self.radius_m)
    }

    pub fn distance_km(&self, point: GeoPoint) -> f64 {
        haversine_km(self.center, point)
    }

    /// Items within the radius, nearest first. Equal distances are ordered by
    /// key so that identical inputs always produce identical output.
    pub fn rank<T: Located>(&self, items: impl IntoIterator<Item = T>) -> Vec<Nearby<T>> {
        let mut hits = nearest_first(self.center, items);
        hits.retain(|hit| hit.distance_km * 1000.0 <= self.radius_m);
        hits
    }
}

/// Every item with its distance from `center`, nearest first, ties by key.
pub fn nearest_first<T: Located>(center: GeoPoint, items: impl IntoIterator<Item = T>) -> Vec<Nearby<T>> {
    let mut hits: Vec<Nearby<T>> = items
        .into_iter()
        .map(|item| Nearby {
            distance_km: haversine_km(center, item.location()),
            item,
        })
        .collect();

    hits.sort_by(|a, b| {
        a.distance_km
            .total_cmp(&b.distance_km)
            .then_with(|| a.item.key().cmp(b.item.key()))
    });
    hits
}
