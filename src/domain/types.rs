//! Route and tracked-entity model

use crate::domain::geo::{valid_points, Coordinate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Newtype wrapper for tracked entity IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct EntityId(pub Uuid);

impl EntityId {
    /// Fresh time-sortable id
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype wrapper for route IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct RouteId(pub Uuid);

impl RouteId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RouteId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RouteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Display colour of a route and its corridor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteColor {
    #[default]
    Blue,
    Red,
    Green,
    Purple,
}

impl RouteColor {
    pub const PALETTE: [RouteColor; 4] =
        [RouteColor::Blue, RouteColor::Red, RouteColor::Green, RouteColor::Purple];

    /// Palette colour for the n-th route, cycling
    pub fn for_index(index: usize) -> Self {
        Self::PALETTE[index % Self::PALETTE.len()]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteColor::Blue => "blue",
            RouteColor::Red => "red",
            RouteColor::Green => "green",
            RouteColor::Purple => "purple",
        }
    }
}

/// Ordered anchor point of a route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub id: Uuid,
    pub coordinate: Coordinate,
    /// Position along the route; lower comes first
    pub order: i32,
    pub name: Option<String>,
}

impl Waypoint {
    pub fn new(coordinate: Coordinate, order: i32) -> Self {
        Self { id: Uuid::now_v7(), coordinate, order, name: None }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }
}

/// Where a route's polyline came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LegSource {
    Routed,
    StraightLine,
}

/// Path returned by the routing collaborator (or its fallback)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteLeg {
    pub polyline: Vec<Coordinate>,
    pub distance_m: f64,
    pub source: LegSource,
}

/// A route with its corridor
#[derive(Debug, Clone, Serialize)]
pub struct Route {
    pub id: RouteId,
    pub name: String,
    /// Sorted by `order`
    pub waypoints: Vec<Waypoint>,
    /// Dense path from the routing collaborator; empty until populated
    pub polyline: Vec<Coordinate>,
    /// Full corridor width in meters
    pub corridor_width_m: f64,
    pub assigned: Vec<EntityId>,
    pub distance_m: Option<f64>,
    pub color: RouteColor,
}

impl Route {
    #[inline]
    pub fn half_width_m(&self) -> f64 {
        self.corridor_width_m / 2.0
    }

    /// Straight line through the valid waypoints in route order
    pub fn waypoint_line(&self) -> Vec<Coordinate> {
        self.waypoints.iter().map(|w| w.coordinate).filter(Coordinate::is_valid).collect()
    }

    /// True once a polyline with at least two valid points has been stored
    pub fn is_populated(&self) -> bool {
        self.polyline.iter().filter(|c| c.is_valid()).count() >= 2
    }

    /// Path used for distance checks and corridor building
    ///
    /// The stored polyline once populated, otherwise the waypoint line.
    /// Invalid coordinates are never returned.
    pub fn effective_polyline(&self) -> Vec<Coordinate> {
        if self.is_populated() {
            valid_points(&self.polyline)
        } else {
            self.waypoint_line()
        }
    }
}

/// On/off-route classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    OnRoute,
    OffRoute,
    #[default]
    Unknown,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::OnRoute => "on_route",
            EntityStatus::OffRoute => "off_route",
            EntityStatus::Unknown => "unknown",
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            EntityStatus::OnRoute => "On Route",
            EntityStatus::OffRoute => "Off Route",
            EntityStatus::Unknown => "Unknown",
        }
    }

    /// Marker colour for map display
    pub fn color_name(&self) -> &'static str {
        match self {
            EntityStatus::OnRoute => "green",
            EntityStatus::OffRoute => "red",
            EntityStatus::Unknown => "gray",
        }
    }
}

/// How an entity's position is advanced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSource {
    /// Moved along its route by the monitor on every tick
    #[default]
    Simulated,
    /// Moved only by fixes from the position feed
    Live,
}

/// A vehicle being monitored
#[derive(Debug, Clone, Serialize)]
pub struct TrackedEntity {
    pub id: EntityId,
    pub name: String,
    pub position: Option<Coordinate>,
    pub route_id: Option<RouteId>,
    pub status: EntityStatus,
    pub last_updated: DateTime<Utc>,
    pub deviation_m: Option<f64>,
    pub source: PositionSource,
}

impl TrackedEntity {
    pub fn new(name: &str, source: PositionSource) -> Self {
        Self::with_id(EntityId::new(), name, source)
    }

    pub fn with_id(id: EntityId, name: &str, source: PositionSource) -> Self {
        Self {
            id,
            name: name.to_string(),
            position: None,
            route_id: None,
            status: EntityStatus::Unknown,
            last_updated: Utc::now(),
            deviation_m: None,
            source,
        }
    }
}

/// A position update from the live feed
#[derive(Debug, Clone, PartialEq)]
pub struct PositionFix {
    pub entity_id: EntityId,
    pub coordinate: Coordinate,
    pub timestamp: DateTime<Utc>,
}

/// Raised once per off-route episode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OffRouteAlert {
    pub entity_id: EntityId,
    pub route_id: Option<RouteId>,
    pub name: String,
    pub deviation_m: f64,
    pub raised_at: DateTime<Utc>,
}

impl OffRouteAlert {
    pub fn title(&self) -> &'static str {
        "Vehicle Off Route"
    }

    pub fn body(&self) -> String {
        format!(
            "{} is off its assigned route! Deviation: {:.0} meters",
            self.name, self.deviation_m
        )
    }
}
