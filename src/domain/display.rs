//! Display-facing view of the monitor state
//!
//! The core never produces rendering types. Display layers receive a flat list
//! of tagged items and a suggested map region.

use crate::domain::geo::Coordinate;
use crate::domain::types::{EntityId, EntityStatus, RouteColor, RouteId};
use serde::Serialize;

/// Default view over southern India
pub const DEFAULT_REGION_CENTER: Coordinate = Coordinate::new(12.9716, 77.5946);
pub const DEFAULT_REGION_SPAN_DEG: f64 = 5.0;

/// Minimum span when fitting content, degrees
const MIN_FIT_SPAN_DEG: f64 = 0.5;
/// Padding factor applied to the fitted extent
const FIT_PADDING: f64 = 1.5;

/// One drawable thing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisplayItem {
    RouteOverlay {
        route_id: RouteId,
        polygon: Vec<Coordinate>,
        color: RouteColor,
        fill_alpha: f64,
    },
    RoutePath {
        route_id: RouteId,
        path: Vec<Coordinate>,
        color: RouteColor,
    },
    EntityMarker {
        entity_id: EntityId,
        name: String,
        position: Coordinate,
        status: EntityStatus,
        color: &'static str,
    },
}

/// Visible map area
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MapRegion {
    pub center: Coordinate,
    pub lat_span: f64,
    pub lon_span: f64,
}

impl Default for MapRegion {
    fn default() -> Self {
        Self {
            center: DEFAULT_REGION_CENTER,
            lat_span: DEFAULT_REGION_SPAN_DEG,
            lon_span: DEFAULT_REGION_SPAN_DEG,
        }
    }
}

impl MapRegion {
    /// Region covering all valid `points`, or the default region if none
    pub fn fit<I>(points: I) -> Self
    where
        I: IntoIterator<Item = Coordinate>,
    {
        let mut bounds: Option<(f64, f64, f64, f64)> = None;
        for p in points.into_iter().filter(Coordinate::is_valid) {
            bounds = Some(match bounds {
                None => (p.lat, p.lat, p.lon, p.lon),
                Some((min_lat, max_lat, min_lon, max_lon)) => (
                    min_lat.min(p.lat),
                    max_lat.max(p.lat),
                    min_lon.min(p.lon),
                    max_lon.max(p.lon),
                ),
            });
        }

        let Some((min_lat, max_lat, min_lon, max_lon)) = bounds else {
            return Self::default();
        };

        Self {
            center: Coordinate::new((min_lat + max_lat) / 2.0, (min_lon + max_lon) / 2.0),
            lat_span: ((max_lat - min_lat) * FIT_PADDING).max(MIN_FIT_SPAN_DEG),
            lon_span: ((max_lon - min_lon) * FIT_PADDING).max(MIN_FIT_SPAN_DEG),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_empty_is_default() {
        assert_eq!(MapRegion::fit(Vec::new()), MapRegion::default());
        assert_eq!(MapRegion::fit(vec![Coordinate::new(f64::NAN, 1.0)]), MapRegion::default());
    }

    #[test]
    fn test_fit_pads_extent() {
        let region = MapRegion::fit(vec![Coordinate::new(10.0, 76.0), Coordinate::new(14.0, 80.0)]);
        assert_eq!(region.center, Coordinate::new(12.0, 78.0));
        assert_eq!(region.lat_span, 6.0);
        assert_eq!(region.lon_span, 6.0);
    }

    #[test]
    fn test_fit_enforces_minimum_span() {
        let region = MapRegion::fit(vec![Coordinate::new(12.0, 77.0)]);
        assert_eq!(region.lat_span, 0.5);
        assert_eq!(region.lon_span, 0.5);
    }

    #[test]
    fn test_display_item_tagging() {
        let item = DisplayItem::EntityMarker {
            entity_id: EntityId::new(),
            name: "Vehicle 1".to_string(),
            position: Coordinate::new(1.0, 2.0),
            status: EntityStatus::OffRoute,
            color: EntityStatus::OffRoute.color_name(),
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["kind"], "entity_marker");
        assert_eq!(json["status"], "off_route");
        assert_eq!(json["color"], "red");
    }
}
