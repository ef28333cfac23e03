//! I/O - external collaborators
//!
//! - `routing` - Directions service client and straight-line fallback
//! - `alert_channel` - Bounded outbound queue for alerts and status changes
//! - `mqtt_alerts` - MQTT publisher draining the outbound queue
//! - `mqtt_feed` - MQTT subscriber for live position fixes

pub mod alert_channel;
pub mod mqtt_alerts;
pub mod mqtt_feed;
pub mod routing;

pub use alert_channel::{create_alert_channel, AlertSender, OutboundMessage, StatusChangePayload};
pub use routing::{populate_route, OsrmClient, RouteProvider, StraightLineProvider};
