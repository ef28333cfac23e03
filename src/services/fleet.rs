//! Route and entity registry with per-route corridor overlays

use crate::domain::corridor::CorridorOverlay;
use crate::domain::geo::valid_points;
use crate::domain::types::{EntityId, Route, RouteColor, RouteId, RouteLeg, TrackedEntity, Waypoint};
use anyhow::{bail, Context};
use rustc_hash::FxHashMap;
use std::collections::hash_map::Entry;
use tracing::{debug, info};

/// Routes, the entities bound to them, and their overlays
#[derive(Debug, Default)]
pub struct Fleet {
    routes: Vec<Route>,
    entities: Vec<TrackedEntity>,
    overlays: FxHashMap<RouteId, CorridorOverlay>,
}

impl Fleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route; its polyline stays empty until populated
    ///
    /// Waypoints are sorted by `order`. The overlay is built at once from the
    /// straight waypoint line so the corridor is visible before routing
    /// resolves.
    pub fn create_route(
        &mut self,
        name: &str,
        mut waypoints: Vec<Waypoint>,
        corridor_width_m: f64,
        color: RouteColor,
    ) -> anyhow::Result<RouteId> {
        if waypoints.len() < 2 {
            bail!("route '{}' needs at least 2 waypoints, got {}", name, waypoints.len());
        }
        if !corridor_width_m.is_finite() || corridor_width_m < 0.0 {
            bail!("route '{}' has invalid corridor width {}", name, corridor_width_m);
        }
        waypoints.sort_by_key(|w| w.order);

        let route = Route {
            id: RouteId::new(),
            name: name.to_string(),
            waypoints,
            polyline: Vec::new(),
            corridor_width_m,
            assigned: Vec::new(),
            distance_m: None,
            color,
        };
        let id = route.id;

        self.rebuild_overlay(&route);
        info!(
            route_id = %id,
            name = %route.name,
            waypoints = route.waypoints.len(),
            corridor_width_m = %corridor_width_m,
            "route_created"
        );
        self.routes.push(route);
        Ok(id)
    }

    /// Add an entity; returns its id
    pub fn add_entity(&mut self, entity: TrackedEntity) -> EntityId {
        let id = entity.id;
        debug!(entity_id = %id, name = %entity.name, "entity_added");
        self.entities.push(entity);
        id
    }

    /// Bind an entity to a route, removing it from any previous route
    pub fn assign(&mut self, entity_id: EntityId, route_id: RouteId) -> anyhow::Result<()> {
        if self.route(route_id).is_none() {
            bail!("unknown route {}", route_id);
        }
        let entity = self
            .entities
            .iter_mut()
            .find(|e| e.id == entity_id)
            .with_context(|| format!("unknown entity {}", entity_id))?;

        let previous = entity.route_id.replace(route_id);
        if let Some(prev) = previous.filter(|p| *p != route_id) {
            if let Some(old) = self.routes.iter_mut().find(|r| r.id == prev) {
                old.assigned.retain(|id| *id != entity_id);
            }
        }
        if let Some(route) = self.routes.iter_mut().find(|r| r.id == route_id) {
            if !route.assigned.contains(&entity_id) {
                route.assigned.push(entity_id);
            }
        }
        Ok(())
    }

    /// Store a populated path for a route and rebuild its overlay
    ///
    /// A leg with fewer than two valid points is rejected so the route keeps
    /// whatever geometry it had.
    pub fn set_route_geometry(&mut self, route_id: RouteId, leg: RouteLeg) -> anyhow::Result<&CorridorOverlay> {
        let polyline = valid_points(&leg.polyline);
        if polyline.len() < 2 {
            bail!("route {} geometry has {} valid points", route_id, polyline.len());
        }

        let route = self
            .routes
            .iter_mut()
            .find(|r| r.id == route_id)
            .with_context(|| format!("unknown route {}", route_id))?;
        route.polyline = polyline;
        route.distance_m = Some(leg.distance_m);

        let overlay = CorridorOverlay::new(route.id, &route.polyline, route.corridor_width_m, route.color);
        debug!(
            route_id = %route_id,
            points = route.polyline.len(),
            polygon_points = overlay.polygon.len(),
            "overlay_rebuilt"
        );
        let slot = match self.overlays.entry(route_id) {
            Entry::Occupied(mut e) => {
                e.insert(overlay);
                e.into_mut()
            }
            Entry::Vacant(e) => e.insert(overlay),
        };
        Ok(slot)
    }

    fn rebuild_overlay(&mut self, route: &Route) {
        let overlay =
            CorridorOverlay::new(route.id, &route.effective_polyline(), route.corridor_width_m, route.color);
        self.overlays.insert(route.id, overlay);
    }

    pub fn route(&self, id: RouteId) -> Option<&Route> {
        self.routes.iter().find(|r| r.id == id)
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn entity(&self, id: EntityId) -> Option<&TrackedEntity> {
        self.entities.iter().find(|e| e.id == id)
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut TrackedEntity> {
        self.entities.iter_mut().find(|e| e.id == id)
    }

    pub fn entities(&self) -> &[TrackedEntity] {
        &self.entities
    }

    /// Entity by index together with its route, for in-place updates
    pub(crate) fn entity_with_route(&mut self, index: usize) -> Option<(&mut TrackedEntity, Option<&Route>)> {
        let entity = self.entities.get_mut(index)?;
        let route = entity.route_id.and_then(|id| self.routes.iter().find(|r| r.id == id));
        Some((entity, route))
    }

    pub fn overlay(&self, route_id: RouteId) -> Option<&CorridorOverlay> {
        self.overlays.get(&route_id)
    }

    /// Overlays in route creation order
    pub fn overlays(&self) -> impl Iterator<Item = &CorridorOverlay> {
        self.routes.iter().filter_map(|r| self.overlays.get(&r.id))
    }
}
