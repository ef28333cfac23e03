//! Buffered corridor polygon around a route polyline
//!
//! Both sides of the polyline are offset by half the corridor width. Offsets
//! are computed in raw lat/lon space and converted to degrees with a single
//! scale taken at the average latitude of the whole route. Interior vertices
//! use a simple miter: the two adjacent segment offsets are averaged. Shallow
//! bends close cleanly; sharp reversals make the polygon self-intersect.

use crate::domain::geo::{average_latitude, meters_per_degree_latitude, meters_per_degree_longitude, valid_points, Coordinate};
use crate::domain::types::{RouteColor, RouteId};
use serde::Serialize;

/// Raw-degree segment length below which consecutive points are merged
const MIN_SEGMENT_DEG: f64 = 1e-6;

/// Fill opacity for rendered corridors
pub const CORRIDOR_FILL_ALPHA: f64 = 0.4;

/// Closed corridor polygon for one route
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorridorOverlay {
    pub route_id: RouteId,
    pub corridor_width_m: f64,
    pub color: RouteColor,
    /// Left side in route order, right side reversed, closed on the first point.
    /// Empty when the route has no usable geometry.
    pub polygon: Vec<Coordinate>,
}

impl CorridorOverlay {
    pub fn new(route_id: RouteId, polyline: &[Coordinate], corridor_width_m: f64, color: RouteColor) -> Self {
        Self {
            route_id,
            corridor_width_m,
            color,
            polygon: build_corridor(polyline, corridor_width_m),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.polygon.is_empty()
    }
}

/// Drop consecutive points closer than `MIN_SEGMENT_DEG`
fn distinct_points(points: &[Coordinate]) -> Vec<Coordinate> {
    let mut out: Vec<Coordinate> = Vec::with_capacity(points.len());
    for &p in points {
        match out.last() {
            Some(last) if (p.lon - last.lon).hypot(p.lat - last.lat) < MIN_SEGMENT_DEG => {}
            _ => out.push(p),
        }
    }
    out
}

/// Build the corridor polygon for `polyline` with full width `width_m`
///
/// Returns an empty vector when fewer than two distinct valid points exist,
/// or when fewer than three valid polygon points survive.
pub fn build_corridor(polyline: &[Coordinate], width_m: f64) -> Vec<Coordinate> {
    let route = distinct_points(&valid_points(polyline));
    if route.len() < 2 || !width_m.is_finite() {
        return Vec::new();
    }

    let Some(avg_lat) = average_latitude(&route) else {
        return Vec::new();
    };
    let half_lat = (width_m / 2.0) / meters_per_degree_latitude();
    let half_lon = (width_m / 2.0) / meters_per_degree_longitude(avg_lat);

    // Left-hand offset (dlat, dlon) of each segment
    let offsets: Vec<(f64, f64)> = route
        .windows(2)
        .map(|w| {
            let dx = w[1].lon - w[0].lon;
            let dy = w[1].lat - w[0].lat;
            let length = dx.hypot(dy);
            (dx / length * half_lat, -dy / length * half_lon)
        })
        .collect();

    let mut left = Vec::with_capacity(route.len());
    let mut right = Vec::with_capacity(route.len());

    for (i, p) in route.iter().enumerate() {
        let (off_lat, off_lon) = if i == 0 {
            offsets[0]
        } else if i == route.len() - 1 {
            offsets[i - 1]
        } else {
            let (a_lat, a_lon) = offsets[i - 1];
            let (b_lat, b_lon) = offsets[i];
            ((a_lat + b_lat) / 2.0, (a_lon + b_lon) / 2.0)
        };
        left.push(Coordinate::new(p.lat + off_lat, p.lon + off_lon));
        right.push(Coordinate::new(p.lat - off_lat, p.lon - off_lon));
    }

    let mut polygon = left;
    polygon.extend(right.into_iter().rev());
    polygon.retain(Coordinate::is_valid);
    if polygon.len() < 3 {
        return Vec::new();
    }
    polygon.push(polygon[0]);
    polygon
}
