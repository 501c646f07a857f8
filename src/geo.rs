//! Spherical-earth helpers for position columns.

use std::sync::OnceLock;

use regex::Regex;

use crate::column::{LATITUDE_RANGE, LONGITUDE_RANGE};

/// Mean earth radius in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        (LATITUDE_RANGE.contains(lat) && LONGITUDE_RANGE.contains(lon)).then_some(Self { lat, lon })
    }
}

/// Great-circle distance in metres.
pub fn haversine_distance(from: GeoPoint, to: GeoPoint) -> f64 {
    let dlat = (to.lat - from.lat).to_radians();
    let dlon = (to.lon - from.lon).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + from.lat.to_radians().cos() * to.lat.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Maps any angle in degrees onto [0, 360).
pub fn normalize_heading(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// Compass heading of a vector given by its east and north components:
/// 0° is north, 90° east.
pub fn heading(east: f64, north: f64) -> f64 {
    normalize_heading(east.atan2(north).to_degrees())
}

/// Initial great-circle bearing from `from` towards `to`.
pub fn initial_bearing(from: GeoPoint, to: GeoPoint) -> f64 {
    let (lat1, lat2) = (from.lat.to_radians(), to.lat.to_radians());
    let dlon = (to.lon - from.lon).to_radians();
    let east = dlon.sin() * lat2.cos();
    let north = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    heading(east, north)
}

/// East and north displacement in metres between two nearby points.
pub fn local_displacement(from: GeoPoint, to: GeoPoint) -> (f64, f64) {
    let mean_lat = ((from.lat + to.lat) / 2.0).to_radians();
    let east = (to.lon - from.lon).to_radians() * EARTH_RADIUS_M * mean_lat.cos();
    let north = (to.lat - from.lat).to_radians() * EARTH_RADIUS_M;
    (east, north)
}

/// Moves `origin` by a small east/north offset in metres.
pub fn offset(origin: GeoPoint, east: f64, north: f64) -> GeoPoint {
    let lat = origin.lat + (north / EARTH_RADIUS_M).to_degrees();
    let lon = origin.lon + (east / (EARTH_RADIUS_M * origin.lat.to_radians().cos())).to_degrees();
    GeoPoint { lat, lon }
}

pub fn wkt_point_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^POINT \((-?\d+(?:\.\d+)?) (-?\d+(?:\.\d+)?)\)$")
            .expect("WKT point pattern is valid")
    })
}

/// Parses a strict `POINT (<lon> <lat>)` geometry.
pub fn parse_wkt_point(text: &str) -> Option<GeoPoint> {
    let captures = wkt_point_pattern().captures(text)?;
    let lon = captures[1].parse::<f64>().ok()?;
    let lat = captures[2].parse::<f64>().ok()?;
    GeoPoint::new(lat, lon)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint::new(lat, lon).unwrap()
    }

    #[test]
    fn wkt_point_decomposes_into_lon_lat() {
        let parsed = parse_wkt_point("POINT (8.700645 50.112865)").unwrap();
        assert_eq!(parsed.lon, 8.700645);
        assert_eq!(parsed.lat, 50.112865);
    }

    #[test]
    fn wkt_point_is_case_and_spacing_strict() {
        assert!(parse_wkt_point("Point (6.1 5.3)").is_none());
        assert!(parse_wkt_point("POINT(6.1 5.3)").is_none());
        assert!(parse_wkt_point("POINT (6.1  5.3)").is_none());
        assert!(parse_wkt_point("POINT (6.1 95.3)").is_none());
    }

    #[test]
    fn one_degree_of_latitude_is_about_111_km() {
        let distance = haversine_distance(point(0.0, 0.0), point(1.0, 0.0));
        assert!((distance - 111_195.0).abs() < 1.0, "{distance}");
    }

    #[test]
    fn bearings_follow_compass_convention() {
        let origin = point(50.0, 8.0);
        assert!((initial_bearing(origin, point(50.1, 8.0)) - 0.0).abs() < 1e-9);
        assert!((initial_bearing(origin, point(50.0, 8.1)) - 90.0).abs() < 0.1);
        assert!((initial_bearing(origin, point(49.9, 8.0)) - 180.0).abs() < 1e-9);
        assert!((heading(-1.0, 0.0) - 270.0).abs() < 1e-9);
        assert_eq!(normalize_heading(-0.0), 0.0);
        assert_eq!(normalize_heading(720.0), 0.0);
    }

    #[test]
    fn offset_round_trips_local_displacement() {
        let origin = point(50.0, 8.0);
        let moved = offset(origin, 120.0, -80.0);
        let (east, north) = local_displacement(origin, moved);
        assert!((east - 120.0).abs() < 0.5);
        assert!((north + 80.0).abs() < 1e-6);
    }
}
