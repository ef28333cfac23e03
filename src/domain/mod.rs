//! Domain models - geometry, corridor polygons, and the route/entity model
//!
//! - `geo` - Coordinate validity, degree/meter conversion, segment and polyline distances
//! - `corridor` - Buffered corridor polygon around a route polyline
//! - `types` - Route, waypoint, tracked entity, position fix, off-route alert
//! - `display` - Tagged display items and map region fitting

pub mod corridor;
pub mod display;
pub mod geo;
pub mod types;

// Re-export commonly used types at module level
pub use corridor::CorridorOverlay;
pub use geo::Coordinate;
pub use types::{EntityId, EntityStatus, PositionSource, Route, RouteId, TrackedEntity};
