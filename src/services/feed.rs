//! Applies live position fixes to the monitor
//!
//! Fixes arrive on a channel from the MQTT subscriber and are applied under
//! the monitor lock, the same lock the tick task takes. Fixes received
//! without location authorization are discarded.

use crate::domain::types::PositionFix;
use crate::infra::metrics::Metrics;
use crate::services::monitor::SharedMonitor;
use crate::services::permission::AuthorizationStatus;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// Apply one fix if authorized; returns true if the monitor accepted it
pub fn handle_fix(
    monitor: &SharedMonitor,
    fix: PositionFix,
    authorization: AuthorizationStatus,
    metrics: &Metrics,
) -> bool {
    if !authorization.is_authorized() {
        metrics.record_fix_ignored();
        debug!(entity_id = %fix.entity_id, authorization = authorization.as_str(), "fix_ignored_unauthorized");
        return false;
    }
    monitor.lock().apply_fix(fix)
}

/// Consume fixes until the channel closes or shutdown is signalled
pub async fn run_position_feed(
    monitor: SharedMonitor,
    mut fix_rx: mpsc::Receiver<PositionFix>,
    auth_rx: watch::Receiver<AuthorizationStatus>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("position_feed_forwarder_started");
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("position_feed_forwarder_shutdown");
                    return;
                }
            }
            fix = fix_rx.recv() => {
                let Some(fix) = fix else {
                    debug!("position_channel_closed");
                    return;
                };
                let authorization = *auth_rx.borrow();
                handle_fix(&monitor, fix, authorization, &metrics);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::geo::Coordinate;
    use crate::domain::types::{EntityStatus, PositionSource, RouteColor, TrackedEntity, Waypoint};
    use crate::services::monitor::{Monitor, MonitorSettings};
    use crate::services::status::LogAlertSink;
    use chrono::Utc;
    use std::time::Duration;

    fn monitor_with_live_entity(metrics: Arc<Metrics>) -> (SharedMonitor, crate::domain::types::EntityId) {
        let mut monitor = Monitor::new(MonitorSettings::default(), Arc::new(LogAlertSink), metrics);
        let waypoints = vec![
            Waypoint::new(Coordinate::new(0.0, 0.0), 0),
            Waypoint::new(Coordinate::new(0.0, 0.01), 1),
        ];
        let route_id = monitor.create_route("equator", waypoints, 200.0, RouteColor::Blue).unwrap();
        let id = monitor.add_entity(TrackedEntity::new("Live 1", PositionSource::Live));
        monitor.assign(id, route_id).unwrap();
        (monitor.into_shared(), id)
    }

    #[test]
    fn test_unauthorized_fix_is_dropped() {
        let metrics = Arc::new(Metrics::new());
        let (monitor, id) = monitor_with_live_entity(metrics.clone());
        let fix = PositionFix { entity_id: id, coordinate: Coordinate::new(0.0, 0.005), timestamp: Utc::now() };

        assert!(!handle_fix(&monitor, fix.clone(), AuthorizationStatus::Denied, &metrics));
        assert!(monitor.lock().entity(id).unwrap().position.is_none());

        assert!(handle_fix(&monitor, fix, AuthorizationStatus::AuthorizedWhenInUse, &metrics));
        assert_eq!(monitor.lock().entity(id).unwrap().status, EntityStatus::OnRoute);
        assert_eq!(metrics.fixes_ignored(), 1);
        assert_eq!(metrics.fixes_applied(), 1);
    }

    #[tokio::test]
    async fn test_forwarder_applies_until_closed() {
        let metrics = Arc::new(Metrics::new());
        let (monitor, id) = monitor_with_live_entity(metrics.clone());
        let (fix_tx, fix_rx) = mpsc::channel(8);
        let (_auth_tx, auth_rx) = watch::channel(AuthorizationStatus::AuthorizedAlways);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run_position_feed(monitor.clone(), fix_rx, auth_rx, metrics.clone(), shutdown_rx));

        fix_tx
            .send(PositionFix { entity_id: id, coordinate: Coordinate::new(0.01, 0.005), timestamp: Utc::now() })
            .await
            .unwrap();
        drop(fix_tx);

        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert_eq!(monitor.lock().entity(id).unwrap().status, EntityStatus::OffRoute);
    }
}
