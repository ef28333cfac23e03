//! Corridor monitor: the owned state behind the monitoring loop
//!
//! The Monitor coordinates:
//! - Fleet state (routes, entities, corridor overlays)
//! - Simulated motion for entities without a live feed
//! - Status classification and once-per-episode off-route alerts
//! - Change notifications to subscribers
//!
//! All mutation goes through `&mut self`; callers share it as a
//! `SharedMonitor` so ticks and live fixes are serialized.

mod handlers;

use crate::domain::corridor::{CorridorOverlay, CORRIDOR_FILL_ALPHA};
use crate::domain::display::{DisplayItem, MapRegion};
use crate::domain::geo::Coordinate;
use crate::domain::types::{
    EntityId, EntityStatus, OffRouteAlert, PositionSource, RouteColor, RouteId, RouteLeg, TrackedEntity,
    Waypoint,
};
use crate::infra::config::Config;
use crate::infra::metrics::{Metrics, StatusCounts};
use crate::services::fleet::Fleet;
use crate::services::motion::ScriptedDeviation;
use crate::services::status::{AlertSink, StatusMonitor};
use anyhow::Context;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Eastward drift used when a scripted deviation gives no offset
const DEFAULT_DEVIATION_OFFSET_M: f64 = 400.0;

/// Monitor handle shared by the scheduler, the feed and display consumers
pub type SharedMonitor = Arc<Mutex<Monitor>>;

/// Read-only view of one tracked entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub name: String,
    pub position: Option<Coordinate>,
    pub route_id: Option<RouteId>,
    pub status: EntityStatus,
    pub deviation_m: Option<f64>,
    pub last_updated: DateTime<Utc>,
    pub source: PositionSource,
}

impl From<&TrackedEntity> for EntitySnapshot {
    fn from(entity: &TrackedEntity) -> Self {
        Self {
            id: entity.id,
            name: entity.name.clone(),
            position: entity.position,
            route_id: entity.route_id,
            status: entity.status,
            deviation_m: entity.deviation_m,
            last_updated: entity.last_updated,
            source: entity.source,
        }
    }
}

/// Change notifications for subscribers
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// Position moved (simulated step or live fix)
    EntityUpdated(EntitySnapshot),
    StatusChanged {
        entity_id: EntityId,
        name: String,
        from: EntityStatus,
        to: EntityStatus,
        deviation_m: Option<f64>,
        at: DateTime<Utc>,
    },
    OverlayRebuilt { route_id: RouteId },
    AlertRaised(OffRouteAlert),
}

/// Tunables taken from `[monitor]`
#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    pub sim_speed_mps: f64,
    pub event_capacity: usize,
}

impl MonitorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self { sim_speed_mps: config.sim_speed_mps(), event_capacity: config.event_capacity() }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self { sim_speed_mps: 30.0, event_capacity: 256 }
    }
}

/// Work done by one tick
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub moved: usize,
    pub transitions: usize,
    pub alerts: usize,
}

/// Owned monitor state
pub struct Monitor {
    pub(crate) fleet: Fleet,
    pub(crate) status: StatusMonitor,
    /// Pending or applied scripted drifts by entity
    pub(crate) deviations: FxHashMap<EntityId, ScriptedDeviation>,
    pub(crate) settings: MonitorSettings,
    pub(crate) sink: Arc<dyn AlertSink>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) events: broadcast::Sender<MonitorEvent>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) last_tick_at: Option<DateTime<Utc>>,
}

impl Monitor {
    /// Create an empty monitor
    pub fn new(settings: MonitorSettings, sink: Arc<dyn AlertSink>, metrics: Arc<Metrics>) -> Self {
        let (events, _rx) = broadcast::channel(settings.event_capacity.max(1));
        Self {
            fleet: Fleet::new(),
            status: StatusMonitor::new(),
            deviations: FxHashMap::default(),
            settings,
            sink,
            metrics,
            events,
            started_at: None,
            last_tick_at: None,
        }
    }

    /// Create a monitor populated with the configured routes and entities
    ///
    /// Routes start with straight-line geometry; call `set_route_geometry`
    /// once the routing service answers.
    pub fn from_config(config: &Config, sink: Arc<dyn AlertSink>, metrics: Arc<Metrics>) -> anyhow::Result<Self> {
        let mut monitor = Self::new(MonitorSettings::from_config(config), sink, metrics);

        for (index, route_cfg) in config.routes().iter().enumerate() {
            let waypoints = route_cfg
                .waypoints
                .iter()
                .enumerate()
                .map(|(order, w)| {
                    let waypoint = Waypoint::new(Coordinate::new(w.lat, w.lon), order as i32);
                    match &w.name {
                        Some(name) => waypoint.with_name(name),
                        None => waypoint,
                    }
                })
                .collect();
            let color = route_cfg.color.unwrap_or_else(|| RouteColor::for_index(index));
            let route_id = monitor
                .create_route(&route_cfg.name, waypoints, route_cfg.corridor_width_m, color)
                .with_context(|| format!("invalid route '{}' in {}", route_cfg.name, config.config_file()))?;

            for entity_cfg in &route_cfg.entities {
                let id = entity_cfg.id.map(EntityId).unwrap_or_else(EntityId::new);
                let entity = TrackedEntity::with_id(id, &entity_cfg.name, entity_cfg.source);
                let entity_id = monitor.add_entity(entity);
                monitor.assign(entity_id, route_id)?;

                if let Some(after_secs) = entity_cfg.deviate_after_secs {
                    let offset_m = entity_cfg.deviation_offset_m.unwrap_or(DEFAULT_DEVIATION_OFFSET_M);
                    monitor.script_deviation(entity_id, ScriptedDeviation::new(Duration::from_secs(after_secs), offset_m));
                }
            }
        }

        info!(
            routes = monitor.fleet.routes().len(),
            entities = monitor.fleet.entities().len(),
            "monitor_configured"
        );
        Ok(monitor)
    }

    /// Wrap in the shared handle
    pub fn into_shared(self) -> SharedMonitor {
        Arc::new(Mutex::new(self))
    }

    /// Register for change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    pub fn create_route(
        &mut self,
        name: &str,
        waypoints: Vec<Waypoint>,
        corridor_width_m: f64,
        color: RouteColor,
    ) -> anyhow::Result<RouteId> {
        let route_id = self.fleet.create_route(name, waypoints, corridor_width_m, color)?;
        self.emit(MonitorEvent::OverlayRebuilt { route_id });
        Ok(route_id)
    }

    pub fn add_entity(&mut self, entity: TrackedEntity) -> EntityId {
        self.fleet.add_entity(entity)
    }

    pub fn assign(&mut self, entity_id: EntityId, route_id: RouteId) -> anyhow::Result<()> {
        self.fleet.assign(entity_id, route_id)
    }

    /// Schedule a one-shot drift for a simulated entity
    pub fn script_deviation(&mut self, entity_id: EntityId, deviation: ScriptedDeviation) {
        self.deviations.insert(entity_id, deviation);
    }

    /// Store a resolved route path and rebuild its corridor
    pub fn set_route_geometry(&mut self, route_id: RouteId, leg: RouteLeg) -> anyhow::Result<()> {
        let source = leg.source;
        let polygon_points = self.fleet.set_route_geometry(route_id, leg)?.polygon.len();
        info!(route_id = %route_id, source = ?source, polygon_points, "route_geometry_set");
        self.emit(MonitorEvent::OverlayRebuilt { route_id });
        Ok(())
    }

    /// Mark the start of monitoring; elapsed time is measured from here
    pub fn begin(&mut self, now: DateTime<Utc>) {
        self.started_at = Some(now);
        self.last_tick_at = Some(now);
        debug!(started_at = %now, "monitor_begin");
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Advance simulated entities by the time since the previous tick, then
    /// re-evaluate every entity
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickSummary {
        let tick_start = Instant::now();
        if self.started_at.is_none() {
            self.begin(now);
        }

        let elapsed = self.last_tick_at.map(|last| to_std(now - last)).unwrap_or_default();
        let since_start = self.started_at.map(|start| to_std(now - start)).unwrap_or_default();
        self.last_tick_at = Some(now);

        let distance_m = self.settings.sim_speed_mps * elapsed.as_secs_f64();
        let mut summary = TickSummary::default();

        for index in 0..self.fleet.entities().len() {
            let simulated = self.fleet.entities()[index].source == PositionSource::Simulated;
            if simulated && self.advance_entity(index, distance_m, since_start, now) {
                summary.moved += 1;
            }
            let (transitioned, alerted) = self.evaluate_entity(index, now);
            summary.transitions += usize::from(transitioned);
            summary.alerts += usize::from(alerted);
        }

        self.metrics.record_tick(tick_start.elapsed().as_micros() as u64);
        debug!(
            elapsed_ms = elapsed.as_millis() as u64,
            moved = summary.moved,
            transitions = summary.transitions,
            alerts = summary.alerts,
            "monitor_tick"
        );
        summary
    }

    pub fn fleet(&self) -> &Fleet {
        &self.fleet
    }

    pub fn entity(&self, id: EntityId) -> Option<&TrackedEntity> {
        self.fleet.entity(id)
    }

    pub fn snapshot(&self) -> Vec<EntitySnapshot> {
        self.fleet.entities().iter().map(EntitySnapshot::from).collect()
    }

    pub fn overlays(&self) -> Vec<CorridorOverlay> {
        self.fleet.overlays().cloned().collect()
    }

    /// Current path of every route, in creation order
    pub fn route_polylines(&self) -> Vec<(RouteId, Vec<Coordinate>)> {
        self.fleet.routes().iter().map(|r| (r.id, r.effective_polyline())).collect()
    }

    /// Flat list for a map renderer: corridors, then paths, then markers
    pub fn display_items(&self) -> Vec<DisplayItem> {
        let mut items = Vec::new();
        for overlay in self.fleet.overlays().filter(|o| !o.is_empty()) {
            items.push(DisplayItem::RouteOverlay {
                route_id: overlay.route_id,
                polygon: overlay.polygon.clone(),
                color: overlay.color,
                fill_alpha: CORRIDOR_FILL_ALPHA,
            });
        }
        for route in self.fleet.routes() {
            items.push(DisplayItem::RoutePath {
                route_id: route.id,
                path: route.effective_polyline(),
                color: route.color,
            });
        }
        for entity in self.fleet.entities() {
            let Some(position) = entity.position else { continue };
            items.push(DisplayItem::EntityMarker {
                entity_id: entity.id,
                name: entity.name.clone(),
                position,
                status: entity.status,
                color: entity.status.color_name(),
            });
        }
        items
    }

    /// Region framing every route and every positioned entity
    pub fn map_region(&self) -> MapRegion {
        let paths = self.fleet.routes().iter().flat_map(|r| r.effective_polyline());
        let positions = self.fleet.entities().iter().filter_map(|e| e.position);
        MapRegion::fit(paths.chain(positions))
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts { total: self.fleet.entities().len(), ..Default::default() };
        for entity in self.fleet.entities() {
            match entity.status {
                EntityStatus::OnRoute => counts.on_route += 1,
                EntityStatus::OffRoute => counts.off_route += 1,
                EntityStatus::Unknown => counts.unknown += 1,
            }
        }
        counts
    }

    /// Most recent entity to leave its corridor, until it returns
    pub fn last_off_route(&self) -> Option<&TrackedEntity> {
        self.status.last_off_route().and_then(|id| self.fleet.entity(id))
    }

    pub(crate) fn emit(&self, event: MonitorEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Negative deltas (clock went backwards) count as zero
fn to_std(delta: chrono::TimeDelta) -> Duration {
    delta.to_std().unwrap_or(Duration::ZERO)
}
