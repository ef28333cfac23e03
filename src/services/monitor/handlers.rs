//! Per-entity update steps for the Monitor
//!
//! Motion, live fixes and status evaluation each touch one entity at a time.
//! Evaluation raises at most one alert per off-route episode.

use super::{EntitySnapshot, Monitor, MonitorEvent};
use crate::domain::types::{OffRouteAlert, PositionFix};
use crate::services::motion::advance_along_route;
use crate::services::status::{assess, AlertDecision};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info, warn};

impl Monitor {
    /// Move one simulated entity; returns true if its position changed
    ///
    /// A due scripted deviation replaces normal motion for that tick.
    pub(crate) fn advance_entity(
        &mut self,
        index: usize,
        distance_m: f64,
        since_start: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        let Some((entity, route)) = self.fleet.entity_with_route(index) else {
            return false;
        };
        let Some(route) = route else {
            return false;
        };
        let polyline = route.effective_polyline();

        let drifted = match (entity.position, self.deviations.get_mut(&entity.id)) {
            (Some(position), Some(deviation)) => deviation.apply(since_start, position, &polyline),
            _ => None,
        };
        if let Some(position) = drifted {
            info!(
                entity_id = %entity.id,
                name = %entity.name,
                lat = position.lat,
                lon = position.lon,
                "scripted_deviation_applied"
            );
        }

        let Some(position) = drifted.or_else(|| advance_along_route(entity.position, &polyline, distance_m)) else {
            return false;
        };
        entity.position = Some(position);
        entity.last_updated = now;
        let snapshot = EntitySnapshot::from(&*entity);

        self.emit(MonitorEvent::EntityUpdated(snapshot));
        true
    }

    /// Apply a live position fix; returns false if it was ignored
    ///
    /// Fixes with non-finite coordinates or for unknown entities are dropped.
    /// Accepted fixes are evaluated immediately.
    pub fn apply_fix(&mut self, fix: PositionFix) -> bool {
        if !fix.coordinate.is_valid() {
            self.metrics.record_fix_ignored();
            debug!(entity_id = %fix.entity_id, "fix_ignored_invalid_coordinate");
            return false;
        }
        let Some(index) = self.fleet.entities().iter().position(|e| e.id == fix.entity_id) else {
            self.metrics.record_fix_ignored();
            debug!(entity_id = %fix.entity_id, "fix_ignored_unknown_entity");
            return false;
        };

        let snapshot = {
            let Some((entity, _)) = self.fleet.entity_with_route(index) else {
                return false;
            };
            entity.position = Some(fix.coordinate);
            entity.last_updated = fix.timestamp;
            EntitySnapshot::from(&*entity)
        };
        self.emit(MonitorEvent::EntityUpdated(snapshot));
        self.metrics.record_fix_applied();

        self.evaluate_entity(index, fix.timestamp);
        true
    }

    /// Reclassify one entity and handle any status transition
    ///
    /// Returns (status changed, alert raised).
    pub(crate) fn evaluate_entity(&mut self, index: usize, now: DateTime<Utc>) -> (bool, bool) {
        let Some((entity, route)) = self.fleet.entity_with_route(index) else {
            return (false, false);
        };
        let assessment = assess(entity.position, route);
        let previous = entity.status;
        entity.status = assessment.status;
        entity.deviation_m = assessment.deviation_m;

        if previous == assessment.status {
            return (false, false);
        }

        let entity_id = entity.id;
        let route_id = entity.route_id;
        let name = entity.name.clone();

        self.metrics.record_status_transition();
        info!(
            entity_id = %entity_id,
            name = %name,
            from = previous.as_str(),
            to = assessment.status.as_str(),
            deviation_m = ?assessment.deviation_m.map(|d| d.round()),
            "status_changed"
        );
        self.emit(MonitorEvent::StatusChanged {
            entity_id,
            name: name.clone(),
            from: previous,
            to: assessment.status,
            deviation_m: assessment.deviation_m,
            at: now,
        });

        let decision = self.status.observe(entity_id, previous, assessment.status);
        if decision != AlertDecision::Raise {
            return (true, false);
        }

        let alert = OffRouteAlert {
            entity_id,
            route_id,
            name,
            deviation_m: assessment.deviation_m.unwrap_or(f64::INFINITY),
            raised_at: now,
        };
        self.raise_alert(alert);
        (true, true)
    }

    /// Deliver to the sink once; failures are logged and counted, never retried
    fn raise_alert(&self, alert: OffRouteAlert) {
        self.metrics.record_off_route_deviation(alert.deviation_m);
        match self.sink.notify_off_route(&alert) {
            Ok(()) => {
                self.metrics.record_alert_sent();
                warn!(
                    entity_id = %alert.entity_id,
                    name = %alert.name,
                    deviation_m = format!("{:.0}", alert.deviation_m),
                    "entity_off_route"
                );
            }
            Err(e) => {
                self.metrics.record_alert_failed();
                warn!(entity_id = %alert.entity_id, error = %e, "alert_delivery_failed");
            }
        }
        self.emit(MonitorEvent::AlertRaised(alert));
    }
}
