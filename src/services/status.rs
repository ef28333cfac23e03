//! On/off-route classification and alert de-duplication
//!
//! `assess` is pure. `StatusMonitor` remembers, per entity, whether an alert
//! has already been raised for the current off-route episode so that a
//! single drift produces a single alert.

use crate::domain::geo::{min_distance_to_polyline, Coordinate};
use crate::domain::types::{EntityId, EntityStatus, OffRouteAlert, Route};
use rustc_hash::FxHashMap;
use tracing::{info, warn};

/// Result of checking one position against one route
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assessment {
    pub status: EntityStatus,
    /// Meters to the nearest segment; None when status is Unknown
    pub deviation_m: Option<f64>,
}

impl Assessment {
    const UNKNOWN: Assessment = Assessment { status: EntityStatus::Unknown, deviation_m: None };
}

/// Classify `position` against the corridor of `route`
///
/// Unknown when either side is missing, the position is not finite, or the
/// route has fewer than two usable points. Exactly half the corridor width
/// counts as on route.
pub fn assess(position: Option<Coordinate>, route: Option<&Route>) -> Assessment {
    let (Some(position), Some(route)) = (position, route) else {
        return Assessment::UNKNOWN;
    };
    if !position.is_valid() {
        return Assessment::UNKNOWN;
    }

    let polyline = route.effective_polyline();
    if polyline.len() < 2 {
        return Assessment::UNKNOWN;
    }

    let distance = min_distance_to_polyline(position, &polyline);
    if !distance.is_finite() {
        return Assessment::UNKNOWN;
    }

    let status = if distance <= route.half_width_m() {
        EntityStatus::OnRoute
    } else {
        EntityStatus::OffRoute
    };
    Assessment { status, deviation_m: Some(distance) }
}

/// What to do after a status transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertDecision {
    /// First off-route observation of this episode
    Raise,
    /// Entity returned to its corridor; the next drift alerts again
    Clear,
    None,
}

/// Receives off-route alerts
pub trait AlertSink: Send + Sync {
    fn notify_off_route(&self, alert: &OffRouteAlert) -> anyhow::Result<()>;
}

/// Sink that only logs, used when no outbound channel is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn notify_off_route(&self, alert: &OffRouteAlert) -> anyhow::Result<()> {
        warn!(
            entity_id = %alert.entity_id,
            deviation_m = format!("{:.0}", alert.deviation_m),
            title = alert.title(),
            body = %alert.body(),
            "off_route_alert"
        );
        Ok(())
    }
}

/// Per-entity alert bookkeeping
#[derive(Debug, Default)]
pub struct StatusMonitor {
    alerted: FxHashMap<EntityId, bool>,
    last_off_route: Option<EntityId>,
}

impl StatusMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transition from `previous` to `current` for `entity_id`
    ///
    /// Only a change into OffRoute can raise, and only if this episode has
    /// not alerted yet. Returning to OnRoute clears the flag. Transitions
    /// into Unknown leave the flag untouched.
    pub fn observe(&mut self, entity_id: EntityId, previous: EntityStatus, current: EntityStatus) -> AlertDecision {
        if previous == current {
            return AlertDecision::None;
        }

        match current {
            EntityStatus::OffRoute => {
                self.last_off_route = Some(entity_id);
                let flag = self.alerted.entry(entity_id).or_insert(false);
                if *flag {
                    AlertDecision::None
                } else {
                    *flag = true;
                    AlertDecision::Raise
                }
            }
            EntityStatus::OnRoute if previous == EntityStatus::OffRoute => {
                self.alerted.insert(entity_id, false);
                if self.last_off_route == Some(entity_id) {
                    self.last_off_route = None;
                }
                info!(entity_id = %entity_id, "entity_returned_to_route");
                AlertDecision::Clear
            }
            _ => AlertDecision::None,
        }
    }

    /// Most recent entity to go off route, until it returns
    pub fn last_off_route(&self) -> Option<EntityId> {
        self.last_off_route
    }

    pub fn has_alerted(&self, entity_id: EntityId) -> bool {
        self.alerted.get(&entity_id).copied().unwrap_or(false)
    }

    /// Forget an entity entirely
    pub fn remove(&mut self, entity_id: EntityId) {
        self.alerted.remove(&entity_id);
        if self.last_off_route == Some(entity_id) {
            self.last_off_route = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::geo::offset_by_meters;
    use crate::domain::types::{RouteColor, RouteId, Waypoint};

    fn equator_route(width_m: f64) -> Route {
        Route {
            id: RouteId::new(),
            name: "equator".to_string(),
            waypoints: vec![
                Waypoint::new(Coordinate::new(0.0, 0.0), 0),
                Waypoint::new(Coordinate::new(0.0, 0.01), 1),
            ],
            polyline: Vec::new(),
            corridor_width_m: width_m,
            assigned: Vec::new(),
            distance_m: None,
            color: RouteColor::Blue,
        }
    }

    #[test]
    fn test_assess_on_and_off_route() {
        let route = equator_route(200.0);
        let near = offset_by_meters(Coordinate::new(0.0, 0.005), 50.0, 0.0, 0.0);
        let far = offset_by_meters(Coordinate::new(0.0, 0.005), 150.0, 0.0, 0.0);

        let on = assess(Some(near), Some(&route));
        assert_eq!(on.status, EntityStatus::OnRoute);
        assert!((on.deviation_m.unwrap() - 50.0).abs() < 1e-6);

        let off = assess(Some(far), Some(&route));
        assert_eq!(off.status, EntityStatus::OffRoute);
        assert!((off.deviation_m.unwrap() - 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_assess_unknown_cases() {
        let route = equator_route(200.0);
        assert_eq!(assess(None, Some(&route)), Assessment::UNKNOWN);
        assert_eq!(assess(Some(Coordinate::new(0.0, 0.0)), None), Assessment::UNKNOWN);
        assert_eq!(assess(Some(Coordinate::new(f64::NAN, 0.0)), Some(&route)), Assessment::UNKNOWN);

        let mut single = equator_route(200.0);
        single.waypoints.truncate(1);
        assert_eq!(assess(Some(Coordinate::new(0.0, 0.0)), Some(&single)), Assessment::UNKNOWN);
    }

    #[test]
    fn test_assess_zero_width_only_on_line() {
        let route = equator_route(0.0);
        let on_line = assess(Some(Coordinate::new(0.0, 0.005)), Some(&route));
        assert_eq!(on_line.status, EntityStatus::OnRoute);

        let beside = offset_by_meters(Coordinate::new(0.0, 0.005), 1.0, 0.0, 0.0);
        assert_eq!(assess(Some(beside), Some(&route)).status, EntityStatus::OffRoute);
    }

    #[test]
    fn test_alert_raised_once_per_episode() {
        use EntityStatus::*;
        let mut monitor = StatusMonitor::new();
        let id = EntityId::new();

        let sequence = [OnRoute, OffRoute, OffRoute, OffRoute, OnRoute, OffRoute];
        let mut previous = Unknown;
        let mut raised = Vec::new();
        for (i, status) in sequence.into_iter().enumerate() {
            if monitor.observe(id, previous, status) == AlertDecision::Raise {
                raised.push(i);
            }
            previous = status;
        }

        assert_eq!(raised, vec![1, 5]);
    }

    #[test]
    fn test_unknown_does_not_clear_flag() {
        use EntityStatus::*;
        let mut monitor = StatusMonitor::new();
        let id = EntityId::new();

        assert_eq!(monitor.observe(id, OnRoute, OffRoute), AlertDecision::Raise);
        assert_eq!(monitor.observe(id, OffRoute, Unknown), AlertDecision::None);
        assert!(monitor.has_alerted(id));
        assert_eq!(monitor.observe(id, Unknown, OffRoute), AlertDecision::None);
    }

    #[test]
    fn test_last_off_route_tracking() {
        use EntityStatus::*;
        let mut monitor = StatusMonitor::new();
        let a = EntityId::new();
        let b = EntityId::new();

        monitor.observe(a, OnRoute, OffRoute);
        assert_eq!(monitor.last_off_route(), Some(a));
        monitor.observe(b, OnRoute, OffRoute);
        assert_eq!(monitor.last_off_route(), Some(b));

        // a returning does not clear b
        assert_eq!(monitor.observe(a, OffRoute, OnRoute), AlertDecision::Clear);
        assert_eq!(monitor.last_off_route(), Some(b));

        monitor.observe(b, OffRoute, OnRoute);
        assert_eq!(monitor.last_off_route(), None);
    }
}
