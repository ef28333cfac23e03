//! Location authorization state
//!
//! The platform reports authorization changes. Live fixes are only applied
//! while authorized; simulated monitoring never waits on it.

use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Location permission as reported by the host platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    #[default]
    NotDetermined,
    Restricted,
    Denied,
    AuthorizedWhenInUse,
    AuthorizedAlways,
}

impl AuthorizationStatus {
    pub fn is_authorized(&self) -> bool {
        matches!(self, AuthorizationStatus::AuthorizedWhenInUse | AuthorizationStatus::AuthorizedAlways)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorizationStatus::NotDetermined => "not_determined",
            AuthorizationStatus::Restricted => "restricted",
            AuthorizationStatus::Denied => "denied",
            AuthorizationStatus::AuthorizedWhenInUse => "authorized_when_in_use",
            AuthorizationStatus::AuthorizedAlways => "authorized_always",
        }
    }
}

/// Current authorization, observable by the feed and the permission watcher
pub struct PermissionState {
    tx: watch::Sender<AuthorizationStatus>,
}

impl PermissionState {
    pub fn new(initial: AuthorizationStatus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn current(&self) -> AuthorizationStatus {
        *self.tx.borrow()
    }

    /// Record a platform callback. Returns true if the status changed.
    pub fn set(&self, status: AuthorizationStatus) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            info!(status = status.as_str(), "location_authorization_changed");
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthorizationStatus> {
        self.tx.subscribe()
    }
}

/// Follow authorization changes for the live feed until shutdown
///
/// Only the live feed is gated; the monitoring loop runs for simulated
/// entities whatever the authorization. Returns how many times the feed
/// gate opened or closed.
pub async fn run_permission_watcher(
    mut auth_rx: watch::Receiver<AuthorizationStatus>,
    mut shutdown: watch::Receiver<bool>,
) -> usize {
    let mut feed_open = auth_rx.borrow_and_update().is_authorized();
    let mut gate_changes = 0;
    info!(feed_open, "live_feed_gate_initial");

    loop {
        tokio::select! {
            changed = auth_rx.changed() => {
                if changed.is_err() {
                    warn!("authorization_channel_closed");
                    break;
                }
                let status = *auth_rx.borrow_and_update();
                if status.is_authorized() != feed_open {
                    feed_open = status.is_authorized();
                    gate_changes += 1;
                    info!(status = status.as_str(), feed_open, "live_feed_gate_changed");
                } else {
                    debug!(status = status.as_str(), feed_open, "authorization_changed_gate_unchanged");
                }
            }
            _ = shutdown.changed() => {
                debug!("permission_watcher_shutdown");
                break;
            }
        }
    }
    gate_changes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_authorized() {
        assert!(AuthorizationStatus::AuthorizedAlways.is_authorized());
        assert!(AuthorizationStatus::AuthorizedWhenInUse.is_authorized());
        assert!(!AuthorizationStatus::Denied.is_authorized());
        assert!(!AuthorizationStatus::Restricted.is_authorized());
        assert!(!AuthorizationStatus::NotDetermined.is_authorized());
    }

    #[test]
    fn test_set_reports_change_once() {
        let state = PermissionState::new(AuthorizationStatus::NotDetermined);
        let mut rx = state.subscribe();

        assert!(state.set(AuthorizationStatus::AuthorizedWhenInUse));
        assert!(!state.set(AuthorizationStatus::AuthorizedWhenInUse));
        assert_eq!(state.current(), AuthorizationStatus::AuthorizedWhenInUse);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), AuthorizationStatus::AuthorizedWhenInUse);
    }

    #[test]
    fn test_deserialize_snake_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            status: AuthorizationStatus,
        }
        let w: Wrapper = toml::from_str("status = \"authorized_always\"").unwrap();
        assert_eq!(w.status, AuthorizationStatus::AuthorizedAlways);
    }

    #[tokio::test]
    async fn test_watcher_counts_gate_changes() {
        let state = PermissionState::new(AuthorizationStatus::NotDetermined);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let watcher = tokio::spawn(run_permission_watcher(state.subscribe(), shutdown_rx));

        state.set(AuthorizationStatus::Denied);
        tokio::task::yield_now().await;
        state.set(AuthorizationStatus::AuthorizedWhenInUse);
        tokio::task::yield_now().await;
        state.set(AuthorizationStatus::AuthorizedAlways);
        tokio::task::yield_now().await;
        state.set(AuthorizationStatus::Restricted);
        tokio::task::yield_now().await;

        shutdown_tx.send(true).unwrap();
        assert_eq!(watcher.await.unwrap(), 2);
    }
}
