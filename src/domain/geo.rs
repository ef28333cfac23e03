//! Coordinate math for corridor checks
//!
//! Distances use a local equirectangular projection: degrees are scaled to
//! meters with a fixed meters-per-degree constant and a cosine correction for
//! longitude at a single reference latitude. This is accurate for corridors of
//! a few hundred meters around routes of modest extent; error grows with route
//! length and distance from the reference latitude.

use serde::{Deserialize, Serialize};

/// Approximate meters per degree of latitude
pub const METERS_PER_DEGREE: f64 = 111_000.0;

/// Mean Earth radius used for great-circle distances
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Squared segment length (in projected meters) below which a segment is a point
const DEGENERATE_SEGMENT_SQ_M: f64 = 1e-8;

/// A (latitude, longitude) pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    #[inline]
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Both components finite (NaN and infinities rejected)
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }

    /// Linear interpolation in raw lat/lon space
    #[inline]
    pub fn lerp(self, other: Coordinate, t: f64) -> Coordinate {
        Coordinate::new(
            self.lat + t * (other.lat - self.lat),
            self.lon + t * (other.lon - self.lon),
        )
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6},{:.6}", self.lat, self.lon)
    }
}

#[inline]
pub fn meters_per_degree_latitude() -> f64 {
    METERS_PER_DEGREE
}

#[inline]
pub fn meters_per_degree_longitude(at_latitude: f64) -> f64 {
    METERS_PER_DEGREE * at_latitude.to_radians().cos()
}

/// Great-circle distance in meters
pub fn haversine_m(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

/// Sum of great-circle distances between consecutive points
pub fn path_length_m(points: &[Coordinate]) -> f64 {
    points.windows(2).map(|w| haversine_m(w[0], w[1])).sum()
}

/// Copy of `points` without invalid coordinates, order preserved
pub fn valid_points(points: &[Coordinate]) -> Vec<Coordinate> {
    points.iter().copied().filter(Coordinate::is_valid).collect()
}

/// Mean latitude of the given points, `None` when empty
pub fn average_latitude(points: &[Coordinate]) -> Option<f64> {
    if points.is_empty() {
        return None;
    }
    Some(points.iter().map(|p| p.lat).sum::<f64>() / points.len() as f64)
}

/// Shift a coordinate by a physical offset, scaled at `reference_lat`
pub fn offset_by_meters(origin: Coordinate, north_m: f64, east_m: f64, reference_lat: f64) -> Coordinate {
    Coordinate::new(
        origin.lat + north_m / meters_per_degree_latitude(),
        origin.lon + east_m / meters_per_degree_longitude(reference_lat),
    )
}

/// Flat meter space anchored at one reference latitude
#[derive(Debug, Clone, Copy)]
pub struct LocalProjection {
    meters_per_lat: f64,
    meters_per_lon: f64,
}

impl LocalProjection {
    pub fn at_latitude(reference_lat: f64) -> Self {
        Self {
            meters_per_lat: meters_per_degree_latitude(),
            meters_per_lon: meters_per_degree_longitude(reference_lat),
        }
    }

    /// Projection at the average latitude of `points` (equator if empty)
    pub fn for_points(points: &[Coordinate]) -> Self {
        Self::at_latitude(average_latitude(points).unwrap_or(0.0))
    }

    #[inline]
    fn project(&self, c: Coordinate) -> (f64, f64) {
        (c.lon * self.meters_per_lon, c.lat * self.meters_per_lat)
    }

    /// Distance in meters from `point` to the segment `start..end`
    pub fn segment_distance(&self, point: Coordinate, start: Coordinate, end: Coordinate) -> f64 {
        let (x, y) = self.project(point);
        let (x1, y1) = self.project(start);
        let (x2, y2) = self.project(end);

        let dx = x2 - x1;
        let dy = y2 - y1;
        let length_sq = dx * dx + dy * dy;

        if length_sq < DEGENERATE_SEGMENT_SQ_M {
            return ((x - x1).powi(2) + (y - y1).powi(2)).sqrt();
        }

        let t = (((x - x1) * dx + (y - y1) * dy) / length_sq).clamp(0.0, 1.0);
        let px = x1 + t * dx;
        let py = y1 + t * dy;

        ((x - px).powi(2) + (y - py).powi(2)).sqrt()
    }
}

/// Distance in meters from `point` to the segment `start..end`
///
/// Projected at the mean latitude of the two endpoints. Any invalid input
/// yields `f64::INFINITY`.
pub fn point_to_segment_distance(point: Coordinate, start: Coordinate, end: Coordinate) -> f64 {
    if !(point.is_valid() && start.is_valid() && end.is_valid()) {
        return f64::INFINITY;
    }
    LocalProjection::for_points(&[start, end]).segment_distance(point, start, end)
}

/// Minimum distance in meters from `point` to any segment of `polyline`
///
/// Invalid polyline points are dropped first. Returns `f64::INFINITY` when
/// fewer than two valid points remain or `point` itself is invalid.
pub fn min_distance_to_polyline(point: Coordinate, polyline: &[Coordinate]) -> f64 {
    if !point.is_valid() {
        return f64::INFINITY;
    }

    let points = valid_points(polyline);
    if points.len() < 2 {
        return f64::INFINITY;
    }

    let projection = LocalProjection::for_points(&points);
    points
        .windows(2)
        .map(|w| projection.segment_distance(point, w[0], w[1]))
        .fold(f64::INFINITY, f64::min)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE_M: f64 = 1e-6;

    fn north_of(c: Coordinate, meters: f64) -> Coordinate {
        offset_by_meters(c, meters, 0.0, c.lat)
    }

    #[test]
    fn test_meters_per_degree() {
        assert_eq!(meters_per_degree_latitude(), 111_000.0);
        assert!((meters_per_degree_longitude(0.0) - 111_000.0).abs() < 1e-9);
        assert!((meters_per_degree_longitude(60.0) - 55_500.0).abs() < 1e-6);
    }

    #[test]
    fn test_coordinate_validity() {
        assert!(Coordinate::new(12.0, 77.0).is_valid());
        assert!(!Coordinate::new(f64::NAN, 77.0).is_valid());
        assert!(!Coordinate::new(12.0, f64::INFINITY).is_valid());
        assert!(!Coordinate::new(f64::NEG_INFINITY, f64::NAN).is_valid());
    }

    #[test]
    fn test_point_on_segment_is_zero() {
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(0.0, 0.01);
        let mid = a.lerp(b, 0.5);

        assert!(point_to_segment_distance(a, a, b) < TOLERANCE_M);
        assert!(point_to_segment_distance(b, a, b) < TOLERANCE_M);
        assert!(point_to_segment_distance(mid, a, b) < TOLERANCE_M);
    }

    #[test]
    fn test_point_off_segment_is_positive() {
        let a = Coordinate::new(12.0, 77.0);
        let b = Coordinate::new(12.01, 77.01);
        let off = north_of(a.lerp(b, 0.3), 5.0);

        assert!(point_to_segment_distance(off, a, b) > TOLERANCE_M);
    }

    #[test]
    fn test_perpendicular_distance_in_meters() {
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(0.0, 0.01);
        let p = north_of(a.lerp(b, 0.5), 50.0);

        let d = point_to_segment_distance(p, a, b);
        assert!((d - 50.0).abs() < 1e-6, "expected 50m, got {d}");
    }

    #[test]
    fn test_projection_clamps_to_endpoints() {
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(0.0, 0.01);
        // 0.001 degrees of longitude past the end at the equator
        let beyond = Coordinate::new(0.0, 0.011);

        let d = point_to_segment_distance(beyond, a, b);
        assert!((d - 111.0).abs() < 1e-6, "expected 111m to endpoint, got {d}");
    }

    #[test]
    fn test_degenerate_segment_uses_start() {
        let a = Coordinate::new(0.0, 0.0);
        let p = north_of(a, 30.0);

        let d = point_to_segment_distance(p, a, a);
        assert!((d - 30.0).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_inputs_are_infinite() {
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(0.0, 0.01);
        let nan = Coordinate::new(f64::NAN, 0.0);

        assert!(point_to_segment_distance(nan, a, b).is_infinite());
        assert!(point_to_segment_distance(a, nan, b).is_infinite());
        assert!(min_distance_to_polyline(nan, &[a, b]).is_infinite());
    }

    #[test]
    fn test_polyline_needs_two_points() {
        let a = Coordinate::new(0.0, 0.0);
        assert!(min_distance_to_polyline(a, &[]).is_infinite());
        assert!(min_distance_to_polyline(a, &[a]).is_infinite());
        assert!(min_distance_to_polyline(a, &[a, Coordinate::new(f64::NAN, 1.0)]).is_infinite());
    }

    #[test]
    fn test_two_point_polyline_matches_segment() {
        let a = Coordinate::new(12.2958, 76.6394);
        let b = Coordinate::new(13.0827, 80.2707);
        let p = Coordinate::new(12.8, 78.1);

        let seg = point_to_segment_distance(p, a, b);
        let poly = min_distance_to_polyline(p, &[a, b]);
        assert_eq!(seg, poly);
    }

    #[test]
    fn test_polyline_takes_nearest_segment() {
        // L-shaped route: east then north
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(0.0, 0.01);
        let c = Coordinate::new(0.01, 0.01);
        let near_second_leg = Coordinate::new(0.005, 0.0101);

        let d = min_distance_to_polyline(near_second_leg, &[a, b, c]);
        // projection is anchored at the mean latitude of all three points
        let expected = 0.0001 * meters_per_degree_longitude(0.01 / 3.0);
        assert!((d - expected).abs() < 1e-6, "expected {expected}, got {d}");
    }

    #[test]
    fn test_polyline_skips_invalid_points() {
        let a = Coordinate::new(0.0, 0.0);
        let bad = Coordinate::new(f64::NAN, f64::NAN);
        let b = Coordinate::new(0.0, 0.01);
        let p = north_of(a.lerp(b, 0.5), 20.0);

        let d = min_distance_to_polyline(p, &[a, bad, b]);
        assert!((d - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_haversine() {
        let mysore = Coordinate::new(12.2958, 76.6394);
        assert_eq!(haversine_m(mysore, mysore), 0.0);

        // One degree of latitude on the mean sphere
        let d = haversine_m(Coordinate::new(0.0, 0.0), Coordinate::new(1.0, 0.0));
        let expected = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;
        assert!((d - expected).abs() < 1e-6);
    }

    #[test]
    fn test_path_length() {
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(1.0, 0.0);
        let c = Coordinate::new(2.0, 0.0);
        let total = path_length_m(&[a, b, c]);
        assert!((total - haversine_m(a, c)).abs() < 1e-6);
        assert_eq!(path_length_m(&[a]), 0.0);
    }

    #[test]
    fn test_average_latitude() {
        assert_eq!(average_latitude(&[]), None);
        let avg = average_latitude(&[Coordinate::new(10.0, 0.0), Coordinate::new(20.0, 5.0)]);
        assert_eq!(avg, Some(15.0));
    }
}
