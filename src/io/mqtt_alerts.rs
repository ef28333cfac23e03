//! MQTT publisher for alerts and status transitions
//!
//! - `<alerts topic>` - Off-route alerts (QoS 1)
//! - `<status topic>` - Status transitions (QoS 0)

use crate::infra::config::Config;
use crate::io::alert_channel::OutboundMessage;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// MQTT publisher actor
///
/// Receives messages from the alert channel and publishes to MQTT topics.
pub struct MqttPublisher {
    client: AsyncClient,
    rx: mpsc::Receiver<OutboundMessage>,
    alerts_topic: String,
    status_topic: String,
}

impl MqttPublisher {
    /// Connects to the broker at the configured MQTT host/port.
    pub fn new(config: &Config, rx: mpsc::Receiver<OutboundMessage>) -> Self {
        let client_id = format!("corridor-alerts-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_alerts_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("mqtt_alerts_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_alerts_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            rx,
            alerts_topic: config.alerts_topic().to_string(),
            status_topic: config.status_topic().to_string(),
        }
    }

    /// Run until shutdown, then drain whatever is still queued
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(alerts = %self.alerts_topic, status = %self.status_topic, "mqtt_alerts_started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("mqtt_alerts_shutdown");
                        while let Ok(msg) = self.rx.try_recv() {
                            self.publish_message(msg).await;
                        }
                        return;
                    }
                }
                msg = self.rx.recv() => {
                    match msg {
                        Some(msg) => self.publish_message(msg).await,
                        None => {
                            debug!("mqtt_alerts_channel_closed");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn publish_message(&self, msg: OutboundMessage) {
        match msg {
            OutboundMessage::OffRoute(payload) => {
                // at-least-once; a missed alert is not recoverable downstream
                let json = match serde_json::to_string(&payload) {
                    Ok(json) => json,
                    Err(e) => {
                        error!(error = %e, "mqtt_alert_serialize_failed");
                        return;
                    }
                };
                if let Err(e) =
                    self.client.publish(&self.alerts_topic, QoS::AtLeastOnce, false, json.as_bytes()).await
                {
                    error!(error = %e, entity_id = %payload.entity_id, "mqtt_alert_publish_failed");
                }
            }
            OutboundMessage::StatusChange(payload) => {
                if let Ok(json) = serde_json::to_string(&payload) {
                    if let Err(e) =
                        self.client.publish(&self.status_topic, QoS::AtMostOnce, false, json.as_bytes()).await
                    {
                        debug!(error = %e, "mqtt_status_publish_failed");
                    }
                }
            }
        }
    }
}
