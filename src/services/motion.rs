//! Simulated movement along a route polyline
//!
//! Coarse point-to-point stepping: each tick moves an entity toward the
//! polyline vertex after its nearest one. Leftover distance is not carried
//! into the following segment within the same tick.

use crate::domain::geo::{average_latitude, haversine_m, offset_by_meters, Coordinate};
use std::time::Duration;

/// Distances below this are treated as "already there"
const ARRIVED_M: f64 = 1e-9;

/// Index of the polyline point nearest to `position`, first on ties
pub fn nearest_vertex(position: Coordinate, polyline: &[Coordinate]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, p) in polyline.iter().enumerate() {
        let d = haversine_m(position, *p);
        match best {
            Some((_, best_d)) if d >= best_d => {}
            _ => best = Some((i, d)),
        }
    }
    best.map(|(i, _)| i)
}

/// Move `current` up to `distance_m` meters along `polyline`
///
/// An entity with no position starts at the first point. The step heads for
/// the vertex after the nearest one and stops there if it is closer than
/// `distance_m`. At the last vertex the entity stays put.
///
/// The step starts from the current position and divides by the distance
/// still remaining to the target vertex, not from the nearest vertex by the
/// full segment length. An entity pushed off the path therefore walks back
/// toward the route over several ticks instead of snapping onto a vertex on
/// the next one; after a scripted deviation it stays off route until it
/// re-enters the corridor. From a vertex both rules give the same point.
///
/// Returns the new position, or None if nothing moved.
pub fn advance_along_route(
    current: Option<Coordinate>,
    polyline: &[Coordinate],
    distance_m: f64,
) -> Option<Coordinate> {
    let first = *polyline.first()?;
    let start = current.filter(Coordinate::is_valid).unwrap_or(first);
    let placed = current.is_none();

    let closest = nearest_vertex(start, polyline)?;
    let next = (closest + 1).min(polyline.len() - 1);
    if next == closest {
        return placed.then_some(start);
    }

    let target = polyline[next];
    let remaining = haversine_m(start, target);
    if remaining < ARRIVED_M {
        return Some(target);
    }
    if distance_m.is_nan() || distance_m <= 0.0 {
        return placed.then_some(start);
    }

    let fraction = (distance_m / remaining).min(1.0);
    Some(start.lerp(target, fraction))
}

/// One-shot lateral drift applied to a simulated entity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScriptedDeviation {
    /// Time after monitoring start at which the drift happens
    pub after: Duration,
    /// Eastward offset in meters
    pub offset_m: f64,
    applied: bool,
}

impl ScriptedDeviation {
    pub fn new(after: Duration, offset_m: f64) -> Self {
        Self { after, offset_m, applied: false }
    }

    pub fn is_applied(&self) -> bool {
        self.applied
    }

    /// Shift `position` east if the drift is due and has not happened yet
    ///
    /// `reference_polyline` fixes the latitude used for the meter/degree scale.
    pub fn apply(
        &mut self,
        elapsed: Duration,
        position: Coordinate,
        reference_polyline: &[Coordinate],
    ) -> Option<Coordinate> {
        if self.applied || elapsed < self.after {
            return None;
        }
        self.applied = true;
        let reference_lat = average_latitude(reference_polyline).unwrap_or(position.lat);
        Some(offset_by_meters(position, 0.0, self.offset_m, reference_lat))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::geo::{meters_per_degree_longitude, min_distance_to_polyline, EARTH_RADIUS_M};

    /// Longitude delta at the equator spanning `meters` of great-circle distance
    fn equator_degrees(meters: f64) -> f64 {
        (meters / EARTH_RADIUS_M).to_degrees()
    }

    #[test]
    fn test_nearest_vertex_first_on_tie() {
        let p = Coordinate::new(0.0, 0.0);
        let polyline = vec![Coordinate::new(0.0, 0.01), Coordinate::new(0.0, -0.01), Coordinate::new(0.0, 0.01)];
        assert_eq!(nearest_vertex(p, &polyline), Some(0));
        assert_eq!(nearest_vertex(p, &[]), None);
    }

    #[test]
    fn test_advance_ten_percent_of_segment() {
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(0.0, equator_degrees(300.0));
        let polyline = vec![a, b];

        let moved = advance_along_route(Some(a), &polyline, 30.0 * 1.0).unwrap();
        let expected = a.lerp(b, 0.1);
        assert!((moved.lat - expected.lat).abs() < 1e-12);
        assert!((moved.lon - expected.lon).abs() < 1e-12);
    }

    #[test]
    fn test_off_path_entity_walks_back_gradually() {
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(0.0, 0.01);
        let polyline = vec![a, b];
        // 400 m north of a point near the start, nearest vertex is `a`
        let drifted = offset_by_meters(Coordinate::new(0.0, 0.002), 400.0, 0.0, 0.0);

        let moved = advance_along_route(Some(drifted), &polyline, 30.0).unwrap();

        // Heads straight for `b` from where it is, no snap onto `a`
        assert!((haversine_m(drifted, moved) - 30.0).abs() < 1e-3);
        assert!(moved.lat > 0.0 && moved.lat < drifted.lat);
        assert!(moved.lon > drifted.lon);
        assert!(min_distance_to_polyline(moved, &polyline) > 300.0);
    }

    #[test]
    fn test_advance_clamps_at_next_vertex() {
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(0.0, 0.001);
        let c = Coordinate::new(0.0, 0.002);

        let moved = advance_along_route(Some(a), &[a, b, c], 10_000.0).unwrap();
        assert_eq!(moved, b);
    }

    #[test]
    fn test_advance_stays_at_last_point() {
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(0.0, 0.001);
        assert_eq!(advance_along_route(Some(b), &[a, b], 30.0), None);
    }

    #[test]
    fn test_advance_places_unpositioned_entity() {
        let a = Coordinate::new(10.0, 76.0);
        let b = Coordinate::new(10.0, 76.1);
        assert_eq!(advance_along_route(None, &[a, b], 0.0), Some(a));
        assert_eq!(advance_along_route(None, &[a], 30.0), Some(a));
        assert_eq!(advance_along_route(None, &[], 30.0), None);
    }

    #[test]
    fn test_scripted_deviation_fires_once() {
        let polyline = vec![Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 0.01)];
        let mut deviation = ScriptedDeviation::new(Duration::from_secs(10), 400.0);
        let p = Coordinate::new(0.0, 0.005);

        assert_eq!(deviation.apply(Duration::from_secs(9), p, &polyline), None);

        let shifted = deviation.apply(Duration::from_secs(10), p, &polyline).unwrap();
        assert!((shifted.lon - p.lon - 400.0 / meters_per_degree_longitude(0.0)).abs() < 1e-12);
        assert_eq!(shifted.lat, p.lat);
        assert!(deviation.is_applied());

        assert_eq!(deviation.apply(Duration::from_secs(20), shifted, &polyline), None);
    }

    #[test]
    fn test_scripted_deviation_leaves_corridor() {
        // North-south route so an eastward drift is perpendicular
        let polyline = vec![Coordinate::new(9.9, 76.3), Coordinate::new(8.5, 76.9)];
        let mut deviation = ScriptedDeviation::new(Duration::ZERO, 400.0);
        let start = polyline[0];

        let shifted = deviation.apply(Duration::from_secs(1), start, &polyline).unwrap();
        assert!(min_distance_to_polyline(shifted, &polyline) > 150.0);
    }
}
