//! Great-circle distance over GPS coordinate sequences.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A point in degrees, as stored in device and route documents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
}

impl Coordinate {
    /// Create a coordinate from latitude and longitude in degrees.
    #[must_use]
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Haversine distance between two points in meters.
#[must_use]
pub fn haversine(a: Coordinate, b: Coordinate) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_phi = (b.lat - a.lat).to_radians();
    let d_lambda = (b.lng - a.lng).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

/// Total length of a path in meters, summed over consecutive pairs.
///
/// Empty and single-point paths have length 0.
#[must_use]
pub fn path_distance(points: &[Coordinate]) -> f64 {
    points.windows(2).map(|pair| haversine(pair[0], pair[1])).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_single_point() {
        assert!(path_distance(&[]).abs() < f64::EPSILON);
        assert!(path_distance(&[Coordinate::new(59.35, 18.07)]).abs() < f64::EPSILON);
    }

    #[test]
    fn test_thousandth_degree_at_equator() {
        let d = path_distance(&[Coordinate::new(0.0, 0.0), Coordinate::new(0.001, 0.0)]);
        assert!((d - 111.19).abs() < 0.5, "got {d}");
    }

    #[test]
    fn test_symmetric_under_reversal() {
        let mut path = vec![
            Coordinate::new(59.3293, 18.0686),
            Coordinate::new(59.3326, 18.0649),
            Coordinate::new(59.3400, 18.0570),
            Coordinate::new(59.3472, 18.0728),
        ];
        let forward = path_distance(&path);
        path.reverse();
        let backward = path_distance(&path);
        assert!((forward - backward).abs() < 1e-6);
        assert!(forward > 0.0);
    }

    #[test]
    fn test_repeated_point_adds_nothing() {
        let p = Coordinate::new(48.8566, 2.3522);
        assert!(path_distance(&[p, p, p]).abs() < f64::EPSILON);
    }

    #[test]
    fn test_path_is_sum_of_legs() {
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(0.0, 0.01);
        let c = Coordinate::new(0.01, 0.01);
        let total = path_distance(&[a, b, c]);
        assert!((total - (haversine(a, b) + haversine(b, c))).abs() < 1e-9);
    }

    #[test]
    fn test_one_degree_longitude_at_equator() {
        let d = haversine(Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 1.0));
        assert!((d - 111_195.0).abs() < 1.0, "got {d}");
    }
}
