//! Typed channel for outbound alert and status messages
//!
//! Producers never block: messages are queued with `try_send` on a bounded
//! channel and the MQTT publisher drains it.

use crate::domain::types::{EntityId, EntityStatus, OffRouteAlert, RouteId};
use crate::services::status::AlertSink;
use anyhow::anyhow;
use serde::Serialize;
use tokio::sync::mpsc;

/// Messages that can be sent to the MQTT publisher
#[derive(Debug)]
pub enum OutboundMessage {
    /// One per off-route episode
    OffRoute(OffRoutePayload),
    /// Every status transition, for live dashboards
    StatusChange(StatusChangePayload),
}

/// Payload for off-route alerts
#[derive(Debug, Clone, Serialize)]
pub struct OffRoutePayload {
    pub site: String,
    /// Timestamp (epoch ms)
    pub ts: i64,
    pub entity_id: EntityId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_id: Option<RouteId>,
    pub name: String,
    pub deviation_m: f64,
    pub title: String,
    pub body: String,
}

impl OffRoutePayload {
    pub fn from_alert(alert: &OffRouteAlert, site: String) -> Self {
        Self {
            site,
            ts: alert.raised_at.timestamp_millis(),
            entity_id: alert.entity_id,
            route_id: alert.route_id,
            name: alert.name.clone(),
            deviation_m: alert.deviation_m,
            title: alert.title().to_string(),
            body: alert.body(),
        }
    }
}

/// Payload for status transitions
#[derive(Debug, Clone, Serialize)]
pub struct StatusChangePayload {
    /// Injected by the sender
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    /// Timestamp (epoch ms)
    pub ts: i64,
    pub entity_id: EntityId,
    pub name: String,
    pub from: EntityStatus,
    pub to: EntityStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deviation_m: Option<f64>,
}

/// Sender handle for outbound messages
///
/// Clone this to share across multiple producers.
/// Non-blocking - if the channel is full, messages are dropped.
#[derive(Clone)]
pub struct AlertSender {
    tx: mpsc::Sender<OutboundMessage>,
    site_id: String,
}

impl AlertSender {
    pub fn new(tx: mpsc::Sender<OutboundMessage>, site_id: String) -> Self {
        Self { tx, site_id }
    }

    /// Queue an off-route alert; fails if the queue is full or closed
    pub fn send_off_route(&self, alert: &OffRouteAlert) -> anyhow::Result<()> {
        let payload = OffRoutePayload::from_alert(alert, self.site_id.clone());
        self.tx
            .try_send(OutboundMessage::OffRoute(payload))
            .map_err(|e| anyhow!("alert queue rejected message: {}", e))
    }

    /// Queue a status transition
    /// Injects site_id into the payload
    pub fn send_status_change(&self, mut payload: StatusChangePayload) -> anyhow::Result<()> {
        payload.site = Some(self.site_id.clone());
        self.tx
            .try_send(OutboundMessage::StatusChange(payload))
            .map_err(|e| anyhow!("status queue rejected message: {}", e))
    }
}

impl AlertSink for AlertSender {
    fn notify_off_route(&self, alert: &OffRouteAlert) -> anyhow::Result<()> {
        self.send_off_route(alert)
    }
}

/// Create a new outbound channel pair
///
/// Returns (sender, receiver) where sender can be cloned and shared.
pub fn create_alert_channel(
    buffer_size: usize,
    site_id: String,
) -> (AlertSender, mpsc::Receiver<OutboundMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    (AlertSender::new(tx, site_id), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn alert() -> OffRouteAlert {
        OffRouteAlert {
            entity_id: EntityId::new(),
            route_id: Some(RouteId::new()),
            name: "Vehicle 3".to_string(),
            deviation_m: 398.7,
            raised_at: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        }
    }

    #[test]
    fn test_off_route_payload_json() {
        let (sender, mut rx) = create_alert_channel(4, "depot-1".to_string());
        sender.send_off_route(&alert()).unwrap();

        let Ok(OutboundMessage::OffRoute(payload)) = rx.try_recv() else {
            panic!("expected off-route message");
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["site"], "depot-1");
        assert_eq!(json["ts"], 1_700_000_000_000i64);
        assert_eq!(json["title"], "Vehicle Off Route");
        assert_eq!(json["body"], "Vehicle 3 is off its assigned route! Deviation: 399 meters");
    }

    #[test]
    fn test_status_change_injects_site() {
        let (sender, mut rx) = create_alert_channel(4, "depot-1".to_string());
        let payload = StatusChangePayload {
            site: None,
            ts: 0,
            entity_id: EntityId::new(),
            name: "Vehicle 1".to_string(),
            from: EntityStatus::Unknown,
            to: EntityStatus::OnRoute,
            deviation_m: Some(12.0),
        };
        sender.send_status_change(payload).unwrap();

        let Ok(OutboundMessage::StatusChange(received)) = rx.try_recv() else {
            panic!("expected status message");
        };
        assert_eq!(received.site.as_deref(), Some("depot-1"));
        let json = serde_json::to_value(&received).unwrap();
        assert_eq!(json["from"], "unknown");
        assert_eq!(json["to"], "on_route");
    }

    #[test]
    fn test_full_channel_is_error() {
        let (sender, _rx) = create_alert_channel(1, "s".to_string());
        assert!(sender.notify_off_route(&alert()).is_ok());
        assert!(sender.notify_off_route(&alert()).is_err());
    }

    #[test]
    fn test_closed_channel_is_error() {
        let (sender, rx) = create_alert_channel(4, "s".to_string());
        drop(rx);
        assert!(sender.notify_off_route(&alert()).is_err());
    }
}
