//! Corridor monitor - route-deviation monitoring for vehicle fleets
//!
//! Builds a buffered corridor around each configured route, moves simulated
//! vehicles along their routes, applies live GPS fixes from MQTT, and raises
//! one alert per off-route episode.
//!
//! Module structure:
//! - `domain/` - Geometry, corridor polygons, route/entity model
//! - `io/` - External interfaces (routing service, MQTT feed and alerts)
//! - `services/` - Monitor, motion, status, scheduler, permission
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use fleet_corridor::infra::{Config, Metrics};
use fleet_corridor::io::{
    create_alert_channel, populate_route, AlertSender, OsrmClient, RouteProvider, StatusChangePayload,
    StraightLineProvider,
};
use fleet_corridor::io::mqtt_alerts::MqttPublisher;
use fleet_corridor::domain::types::LegSource;
use fleet_corridor::services::scheduler::start_monitor_loop;
use fleet_corridor::services::{AlertSink, LogAlertSink, Monitor, MonitorEvent, PermissionState, SharedMonitor};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Corridor monitor - geofence corridors and route-deviation alerts
#[derive(Parser, Debug)]
#[command(name = "corridor-monitor", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides; default INFO
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), git_hash = env!("GIT_HASH"), "corridor-monitor starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        site_id = %config.site_id(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        tick_interval_ms = config.tick_interval().as_millis() as u64,
        sim_speed_mps = config.sim_speed_mps(),
        routing_enabled = config.routing_enabled(),
        feed_enabled = config.feed_enabled(),
        alerts_enabled = config.alerts_enabled(),
        authorization = config.authorization().as_str(),
        routes = config.routes().len(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Outbound alerts: MQTT when enabled, log-only otherwise
    let alert_sender: Option<AlertSender> = if config.alerts_enabled() {
        let (sender, alert_rx) = create_alert_channel(256, config.site_id().to_string());
        let publisher = MqttPublisher::new(&config, alert_rx);
        let publisher_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        });
        Some(sender)
    } else {
        None
    };
    let sink: Arc<dyn AlertSink> = match &alert_sender {
        Some(sender) => Arc::new(sender.clone()),
        None => Arc::new(LogAlertSink),
    };

    let monitor: SharedMonitor = Monitor::from_config(&config, sink, metrics.clone())?.into_shared();
    let region = monitor.lock().map_region();
    info!(
        center = %region.center,
        lat_span = region.lat_span,
        lon_span = region.lon_span,
        "map_region"
    );

    // Forward status transitions to the status topic
    if let Some(sender) = alert_sender {
        let events = monitor.lock().subscribe();
        tokio::spawn(forward_status_changes(events, sender));
    }

    // Resolve route geometry in the background; straight lines until then
    let provider: Arc<dyn RouteProvider> = if config.routing_enabled() {
        match OsrmClient::new(config.routing_base_url(), config.routing_profile(), config.routing_timeout()) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                warn!(error = %e, "routing_client_unavailable");
                Arc::new(StraightLineProvider)
            }
        }
    } else {
        Arc::new(StraightLineProvider)
    };
    let routes = monitor.lock().fleet().routes().to_vec();
    for route in routes {
        let monitor = monitor.clone();
        let provider = provider.clone();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let leg = populate_route(&route, provider.as_ref()).await;
            if leg.source == LegSource::StraightLine {
                metrics.record_routing_fallback();
            }
            if let Err(e) = monitor.lock().set_route_geometry(route.id, leg) {
                warn!(route_id = %route.id, error = %e, "route_geometry_rejected");
            }
        });
    }

    // Simulated monitoring runs regardless of location access
    let mut monitor_loop = start_monitor_loop(monitor.clone(), &config);

    // Location access only gates the live feed
    let permission = PermissionState::new(config.authorization());
    tokio::spawn(fleet_corridor::services::permission::run_permission_watcher(
        permission.subscribe(),
        shutdown_rx.clone(),
    ));

    // Live position feed
    if config.feed_enabled() {
        let (fix_tx, fix_rx) = mpsc::channel(1000);
        let feed_config = config.clone();
        let feed_metrics = metrics.clone();
        let feed_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) =
                fleet_corridor::io::mqtt_feed::start_position_feed(&feed_config, fix_tx, feed_metrics, feed_shutdown)
                    .await
            {
                tracing::error!(error = %e, "position feed error");
            }
        });
        tokio::spawn(fleet_corridor::services::feed::run_position_feed(
            monitor.clone(),
            fix_rx,
            permission.subscribe(),
            metrics.clone(),
            shutdown_rx.clone(),
        ));
    }

    // Periodic metrics report
    let report_monitor = monitor.clone();
    let report_metrics = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            let counts = report_monitor.lock().status_counts();
            report_metrics.report(counts).log();
        }
    });

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);
    monitor_loop.stop();

    info!("corridor-monitor shutdown complete");
    Ok(())
}

/// Publish every status transition; drops when the outbound queue is full
async fn forward_status_changes(mut events: broadcast::Receiver<MonitorEvent>, sender: AlertSender) {
    loop {
        match events.recv().await {
            Ok(MonitorEvent::StatusChanged { entity_id, name, from, to, deviation_m, at }) => {
                let payload = StatusChangePayload {
                    site: None,
                    ts: at.timestamp_millis(),
                    entity_id,
                    name,
                    from,
                    to,
                    deviation_m,
                };
                if let Err(e) = sender.send_status_change(payload) {
                    warn!(error = %e, "status_change_dropped");
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "status_forwarder_lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
