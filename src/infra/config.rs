//! Configuration loading from TOML files
//!
//! The binary picks the file from `--config`, then `CONFIG_FILE`, then
//! `config/dev.toml`. A file that cannot be read or parsed falls back to the
//! built-in demo fleet.

use crate::domain::types::{PositionSource, RouteColor};
use crate::services::permission::AuthorizationStatus;
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SiteConfig {
    /// Fleet identifier included in outbound payloads
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "fleet".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Topic carrying live position fixes
    #[serde(default = "default_positions_topic")]
    pub positions_topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Subscribe to the position feed
    #[serde(default = "default_true")]
    pub feed_enabled: bool,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_positions_topic() -> String {
    "fleet/positions".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            positions_topic: default_positions_topic(),
            username: None,
            password: None,
            feed_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    /// Publish alerts over MQTT; when false alerts are only logged
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Topic for off-route alerts (QoS 1)
    #[serde(default = "default_alerts_topic")]
    pub topic: String,
    /// Topic for status transitions (QoS 0)
    #[serde(default = "default_status_topic")]
    pub status_topic: String,
}

fn default_alerts_topic() -> String {
    "fleet/alerts".to_string()
}

fn default_status_topic() -> String {
    "fleet/status".to_string()
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self { enabled: true, topic: default_alerts_topic(), status_topic: default_status_topic() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Speed of simulated entities, meters per second
    #[serde(default = "default_sim_speed_mps")]
    pub sim_speed_mps: f64,
    /// Capacity of the monitor event broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_tick_interval_secs() -> u64 {
    7
}

fn default_sim_speed_mps() -> f64 {
    30.0
}

fn default_event_capacity() -> usize {
    256
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            sim_speed_mps: default_sim_speed_mps(),
            event_capacity: default_event_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    /// Query the directions service; when false routes use straight lines
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_routing_base_url")]
    pub base_url: String,
    #[serde(default = "default_routing_profile")]
    pub profile: String,
    #[serde(default = "default_routing_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_routing_base_url() -> String {
    "https://router.project-osrm.org".to_string()
}

fn default_routing_profile() -> String {
    "driving".to_string()
}

fn default_routing_timeout_ms() -> u64 {
    5000
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_routing_base_url(),
            profile: default_routing_profile(),
            timeout_ms: default_routing_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationConfig {
    /// Initial location authorization reported by the platform
    #[serde(default = "default_authorization")]
    pub authorization: AuthorizationStatus,
}

fn default_authorization() -> AuthorizationStatus {
    AuthorizationStatus::NotDetermined
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self { authorization: default_authorization() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

fn default_metrics_interval_secs() -> u64 {
    10
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WaypointConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EntityConfig {
    pub name: String,
    /// Stable id for live-fed entities; generated when absent
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub source: PositionSource,
    /// Scripted drift: seconds after monitoring start
    #[serde(default)]
    pub deviate_after_secs: Option<u64>,
    /// Scripted drift: eastward offset in meters
    #[serde(default)]
    pub deviation_offset_m: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RouteConfig {
    pub name: String,
    pub corridor_width_m: f64,
    /// Palette colour by position when absent
    #[serde(default)]
    pub color: Option<RouteColor>,
    pub waypoints: Vec<WaypointConfig>,
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub location: LocationConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    positions_topic: String,
    feed_enabled: bool,
    alerts_enabled: bool,
    alerts_topic: String,
    status_topic: String,
    tick_interval_secs: u64,
    sim_speed_mps: f64,
    event_capacity: usize,
    routing_enabled: bool,
    routing_base_url: String,
    routing_profile: String,
    routing_timeout_ms: u64,
    authorization: AuthorizationStatus,
    metrics_interval_secs: u64,
    routes: Vec<RouteConfig>,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: default_site_id(),
            mqtt_host: default_mqtt_host(),
            mqtt_port: default_mqtt_port(),
            mqtt_username: None,
            mqtt_password: None,
            positions_topic: default_positions_topic(),
            feed_enabled: true,
            alerts_enabled: true,
            alerts_topic: default_alerts_topic(),
            status_topic: default_status_topic(),
            tick_interval_secs: default_tick_interval_secs(),
            sim_speed_mps: default_sim_speed_mps(),
            event_capacity: default_event_capacity(),
            routing_enabled: true,
            routing_base_url: default_routing_base_url(),
            routing_profile: default_routing_profile(),
            routing_timeout_ms: default_routing_timeout_ms(),
            authorization: default_authorization(),
            metrics_interval_secs: default_metrics_interval_secs(),
            routes: Self::demo_routes(),
            config_file: "default".to_string(),
        }
    }
}

fn waypoint(name: &str, lat: f64, lon: f64) -> WaypointConfig {
    WaypointConfig { name: Some(name.to_string()), lat, lon }
}

fn simulated(name: &str) -> EntityConfig {
    EntityConfig {
        name: name.to_string(),
        id: None,
        source: PositionSource::Simulated,
        deviate_after_secs: None,
        deviation_offset_m: None,
    }
}

impl Config {
    /// Built-in demo fleet: four intercity routes, one vehicle each
    fn demo_routes() -> Vec<RouteConfig> {
        vec![
            RouteConfig {
                name: "Mysore to Chennai".to_string(),
                corridor_width_m: 500.0,
                color: Some(RouteColor::Blue),
                waypoints: vec![waypoint("Mysore", 12.2958, 76.6394), waypoint("Chennai", 13.0827, 80.2707)],
                entities: vec![simulated("Vehicle 1")],
            },
            RouteConfig {
                name: "Bangalore to Hyderabad".to_string(),
                corridor_width_m: 400.0,
                color: Some(RouteColor::Red),
                waypoints: vec![
                    waypoint("Bangalore", 12.9716, 77.5946),
                    waypoint("Hyderabad", 17.3850, 78.4867),
                ],
                entities: vec![simulated("Vehicle 2")],
            },
            RouteConfig {
                name: "Kochi to Trivandrum".to_string(),
                corridor_width_m: 300.0,
                color: Some(RouteColor::Green),
                waypoints: vec![waypoint("Kochi", 9.9312, 76.2673), waypoint("Trivandrum", 8.5241, 76.9366)],
                entities: vec![EntityConfig {
                    deviate_after_secs: Some(10),
                    deviation_offset_m: Some(400.0),
                    ..simulated("Vehicle 3")
                }],
            },
            RouteConfig {
                name: "Coimbatore to Madurai".to_string(),
                corridor_width_m: 350.0,
                color: Some(RouteColor::Purple),
                waypoints: vec![
                    waypoint("Coimbatore", 11.0168, 76.9558),
                    waypoint("Madurai", 9.9252, 78.1198),
                ],
                entities: vec![simulated("Vehicle 4")],
            },
        ]
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str, source: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig =
            toml::from_str(content).with_context(|| format!("Failed to parse config file {}", source))?;

        let routes =
            if toml_config.routes.is_empty() { Self::demo_routes() } else { toml_config.routes };

        Ok(Self {
            site_id: toml_config.site.id,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            positions_topic: toml_config.mqtt.positions_topic,
            feed_enabled: toml_config.mqtt.feed_enabled,
            alerts_enabled: toml_config.alerts.enabled,
            alerts_topic: toml_config.alerts.topic,
            status_topic: toml_config.alerts.status_topic,
            tick_interval_secs: toml_config.monitor.tick_interval_secs,
            sim_speed_mps: toml_config.monitor.sim_speed_mps,
            event_capacity: toml_config.monitor.event_capacity,
            routing_enabled: toml_config.routing.enabled,
            routing_base_url: toml_config.routing.base_url,
            routing_profile: toml_config.routing.profile,
            routing_timeout_ms: toml_config.routing.timeout_ms,
            authorization: toml_config.location.authorization,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            routes,
            config_file: source.to_string(),
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        Self::from_toml_str(&content, &path.display().to_string())
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path, error = format!("{:#}", e), "config_fallback_to_defaults");
                Self::default()
            }
        }
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn positions_topic(&self) -> &str {
        &self.positions_topic
    }

    pub fn feed_enabled(&self) -> bool {
        self.feed_enabled
    }

    pub fn alerts_enabled(&self) -> bool {
        self.alerts_enabled
    }

    pub fn alerts_topic(&self) -> &str {
        &self.alerts_topic
    }

    pub fn status_topic(&self) -> &str {
        &self.status_topic
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn sim_speed_mps(&self) -> f64 {
        self.sim_speed_mps
    }

    pub fn event_capacity(&self) -> usize {
        self.event_capacity.max(1)
    }

    pub fn routing_enabled(&self) -> bool {
        self.routing_enabled
    }

    pub fn routing_base_url(&self) -> &str {
        &self.routing_base_url
    }

    pub fn routing_profile(&self) -> &str {
        &self.routing_profile
    }

    pub fn routing_timeout(&self) -> Duration {
        Duration::from_millis(self.routing_timeout_ms)
    }

    pub fn authorization(&self) -> AuthorizationStatus {
        self.authorization
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs.max(1)
    }

    pub fn routes(&self) -> &[RouteConfig] {
        &self.routes
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to replace the route table
    #[cfg(test)]
    pub fn with_routes(mut self, routes: Vec<RouteConfig>) -> Self {
        self.routes = routes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.mqtt_host(), "localhost");
        assert_eq!(config.mqtt_port(), 1883);
        assert_eq!(config.positions_topic(), "fleet/positions");
        assert_eq!(config.tick_interval(), Duration::from_secs(7));
        assert_eq!(config.sim_speed_mps(), 30.0);
        assert_eq!(config.authorization(), AuthorizationStatus::NotDetermined);
        assert_eq!(config.routes().len(), 4);
    }

    #[test]
    fn test_demo_routes() {
        let config = Config::default();
        let kochi = &config.routes()[2];
        assert_eq!(kochi.name, "Kochi to Trivandrum");
        assert_eq!(kochi.corridor_width_m, 300.0);
        assert_eq!(kochi.entities[0].deviate_after_secs, Some(10));
        assert_eq!(kochi.entities[0].deviation_offset_m, Some(400.0));
        assert!(config.routes().iter().all(|r| r.waypoints.len() == 2));
    }

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config = Config::from_toml_str("[site]\nid = \"depot\"\n", "inline").unwrap();
        assert_eq!(config.site_id(), "depot");
        assert_eq!(config.alerts_topic(), "fleet/alerts");
        assert_eq!(config.routing_timeout(), Duration::from_millis(5000));
        assert_eq!(config.routes().len(), 4);
        assert_eq!(config.config_file(), "inline");
    }

    #[test]
    fn test_invalid_toml_is_error() {
        assert!(Config::from_toml_str("[monitor\n", "broken").is_err());
    }

    #[test]
    fn test_zero_intervals_are_clamped() {
        let config = Config::from_toml_str(
            "[monitor]\ntick_interval_secs = 0\n[metrics]\ninterval_secs = 0\n",
            "inline",
        )
        .unwrap();
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.metrics_interval_secs(), 1);
    }
}
