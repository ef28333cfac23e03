//! MQTT subscriber for live position fixes
//!
//! Expected payload:
//! `{"entity_id": "<uuid>", "lat": 9.93, "lon": 76.26, "ts": "2026-01-05T16:41:30.048+00:00"}`
//! `ts` may also be epoch milliseconds (integer or float, truncated), or
//! omitted (receive time is used).

use crate::domain::geo::Coordinate;
use crate::domain::types::{EntityId, PositionFix};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use chrono::{DateTime, TimeZone, Utc};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Deserializer};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Timestamp that can be either ISO 8601 string or epoch milliseconds
#[derive(Debug, Clone, Default)]
enum TimestampValue {
    #[default]
    None,
    IsoString(String),
    EpochMs(i64),
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<TimestampValue, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct TimestampVisitor;

    impl<'de> Visitor<'de> for TimestampVisitor {
        type Value = TimestampValue;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or integer timestamp")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<TimestampValue, E> {
            Ok(TimestampValue::IsoString(value.to_string()))
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<TimestampValue, E> {
            Ok(TimestampValue::EpochMs(i64::try_from(value).unwrap_or(i64::MAX)))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<TimestampValue, E> {
            Ok(TimestampValue::EpochMs(value))
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<TimestampValue, E> {
            if value.is_finite() {
                Ok(TimestampValue::EpochMs(value.trunc() as i64))
            } else {
                Ok(TimestampValue::None)
            }
        }

        fn visit_unit<E: de::Error>(self) -> Result<TimestampValue, E> {
            Ok(TimestampValue::None)
        }
    }

    deserializer.deserialize_any(TimestampVisitor)
}

#[derive(Debug, Deserialize)]
struct PositionMessage {
    entity_id: Uuid,
    lat: f64,
    lon: f64,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    ts: TimestampValue,
}

/// Parse RFC 3339 timestamp to epoch milliseconds
fn parse_iso_time(time_str: &str) -> Option<i64> {
    OffsetDateTime::parse(time_str, &Rfc3339)
        .ok()
        .map(|dt| (dt.unix_timestamp_nanos() / 1_000_000) as i64)
}

fn resolve_timestamp(ts: &TimestampValue, received_at: DateTime<Utc>) -> DateTime<Utc> {
    let epoch_ms = match ts {
        TimestampValue::EpochMs(ms) => Some(*ms),
        TimestampValue::IsoString(s) => parse_iso_time(s),
        TimestampValue::None => None,
    };
    epoch_ms
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or(received_at)
}

/// Parse one feed message; None if malformed
///
/// Coordinates are passed through unchecked; the monitor rejects invalid ones.
pub fn parse_position_message(json_str: &str, received_at: DateTime<Utc>) -> Option<PositionFix> {
    let message: PositionMessage = match serde_json::from_str(json_str) {
        Ok(m) => m,
        Err(e) => {
            debug!(error = %e, "position_message_parse_failed");
            return None;
        }
    };

    Some(PositionFix {
        entity_id: EntityId(message.entity_id),
        coordinate: Coordinate::new(message.lat, message.lon),
        timestamp: resolve_timestamp(&message.ts, received_at),
    })
}

/// Subscribe to the positions topic and forward fixes to `fix_tx`
///
/// Fixes are sent via try_send so the MQTT eventloop never blocks.
/// Dropped fixes are counted in metrics and logged (rate-limited).
pub async fn start_position_feed(
    config: &Config,
    fix_tx: mpsc::Sender<PositionFix>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let client_id = format!("corridor-feed-{}", std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(config.positions_topic(), QoS::AtMostOnce).await?;

    info!(
        topic = %config.positions_topic(),
        host = %config.mqtt_host(),
        port = %config.mqtt_port(),
        "position_feed_subscribed"
    );

    // Rate-limit drop warnings to 1 per second
    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("position_feed_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let json_str = match std::str::from_utf8(&publish.payload) {
                            Ok(s) => s,
                            Err(e) => {
                                warn!(error = %e, "position_payload_invalid_utf8");
                                continue;
                            }
                        };

                        let Some(fix) = parse_position_message(json_str, Utc::now()) else {
                            metrics.record_fix_ignored();
                            continue;
                        };

                        if let Err(e) = fix_tx.try_send(fix) {
                            match e {
                                TrySendError::Full(_) => {
                                    metrics.record_fix_dropped();
                                    if last_drop_warn.elapsed() > Duration::from_secs(1) {
                                        warn!("position_fix_dropped: channel full");
                                        last_drop_warn = Instant::now();
                                    }
                                }
                                TrySendError::Closed(_) => {
                                    warn!("position_channel_closed");
                                    return Ok(());
                                }
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("position_feed_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "position_feed_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01890a5d-ac96-774b-bcce-b302099a8057";

    #[test]
    fn test_parse_iso_timestamp() {
        let json = format!(r#"{{"entity_id": "{ID}", "lat": 9.93, "lon": 76.26, "ts": "2026-01-05T16:41:30.048+00:00"}}"#);
        let fix = parse_position_message(&json, Utc::now()).unwrap();

        assert_eq!(fix.entity_id.0.to_string(), ID);
        assert_eq!(fix.coordinate, Coordinate::new(9.93, 76.26));
        assert_eq!(fix.timestamp.timestamp_millis(), 1_767_631_290_048);
    }

    #[test]
    fn test_parse_epoch_ms_timestamp() {
        let json = format!(r#"{{"entity_id": "{ID}", "lat": 1.0, "lon": 2.0, "ts": 1700000000000}}"#);
        let fix = parse_position_message(&json, Utc::now()).unwrap();
        assert_eq!(fix.timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_parse_float_epoch_ms_timestamp() {
        let json = format!(r#"{{"entity_id": "{ID}", "lat": 1.0, "lon": 2.0, "ts": 1700000000123.9}}"#);
        let fix = parse_position_message(&json, Utc::now()).unwrap();
        assert_eq!(fix.timestamp.timestamp_millis(), 1_700_000_000_123);
        assert_eq!(fix.coordinate, Coordinate::new(1.0, 2.0));
    }

    #[test]
    fn test_missing_or_bad_timestamp_uses_receive_time() {
        let received = Utc.timestamp_millis_opt(1_600_000_000_000).unwrap();

        let json = format!(r#"{{"entity_id": "{ID}", "lat": 1.0, "lon": 2.0}}"#);
        assert_eq!(parse_position_message(&json, received).unwrap().timestamp, received);

        let json = format!(r#"{{"entity_id": "{ID}", "lat": 1.0, "lon": 2.0, "ts": "yesterday"}}"#);
        assert_eq!(parse_position_message(&json, received).unwrap().timestamp, received);
    }

    #[test]
    fn test_parse_malformed() {
        assert!(parse_position_message("not json", Utc::now()).is_none());
        assert!(parse_position_message(r#"{"entity_id": "nope", "lat": 1.0, "lon": 2.0}"#, Utc::now()).is_none());
        let json = format!(r#"{{"entity_id": "{ID}", "lat": 1.0}}"#);
        assert!(parse_position_message(&json, Utc::now()).is_none());
    }

    #[test]
    fn test_parse_iso_time() {
        let ms = parse_iso_time("2026-01-05T16:41:30.048+00:00").unwrap();
        assert!(ms > 1_767_000_000_000, "timestamp should be in 2026");
        assert!(parse_iso_time("not a timestamp").is_none());
        assert!(parse_iso_time("").is_none());
    }
}
