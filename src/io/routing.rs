//! Route polyline providers
//!
//! `OsrmClient` asks an OSRM-compatible directions service for a driving
//! path between the first and last waypoint. `populate_route` wraps any
//! provider and falls back to the straight waypoint line on failure, so a
//! route never ends up without geometry.

use crate::domain::geo::{path_length_m, valid_points, Coordinate};
use crate::domain::types::{LegSource, Route, RouteLeg};
use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// External directions collaborator
#[async_trait]
pub trait RouteProvider: Send + Sync {
    async fn compute_route(&self, start: Coordinate, end: Coordinate) -> anyhow::Result<RouteLeg>;
}

/// Straight line through `points` with summed great-circle distance
pub fn straight_line_leg(points: &[Coordinate]) -> RouteLeg {
    let polyline = valid_points(points);
    let distance_m = path_length_m(&polyline);
    RouteLeg { polyline, distance_m, source: LegSource::StraightLine }
}

/// Provider that never calls out; used when routing is disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct StraightLineProvider;

#[async_trait]
impl RouteProvider for StraightLineProvider {
    async fn compute_route(&self, start: Coordinate, end: Coordinate) -> anyhow::Result<RouteLeg> {
        Ok(straight_line_leg(&[start, end]))
    }
}

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    distance: f64,
    geometry: OsrmGeometry,
}

#[derive(Debug, Deserialize)]
struct OsrmGeometry {
    /// GeoJSON order: [lon, lat]
    coordinates: Vec<[f64; 2]>,
}

/// Parse an OSRM `route` response body into a leg
pub fn parse_osrm_response(body: &str) -> anyhow::Result<RouteLeg> {
    let response: OsrmResponse = serde_json::from_str(body).context("invalid OSRM response")?;
    if response.code != "Ok" {
        bail!(
            "OSRM returned {}: {}",
            response.code,
            response.message.as_deref().unwrap_or("no message")
        );
    }
    let route = response.routes.into_iter().next().context("OSRM response has no routes")?;

    let polyline: Vec<Coordinate> = route
        .geometry
        .coordinates
        .iter()
        .map(|[lon, lat]| Coordinate::new(*lat, *lon))
        .filter(Coordinate::is_valid)
        .collect();
    if polyline.len() < 2 {
        bail!("OSRM geometry has {} valid points", polyline.len());
    }

    Ok(RouteLeg { polyline, distance_m: route.distance, source: LegSource::Routed })
}

/// HTTP client for an OSRM `route/v1` endpoint
pub struct OsrmClient {
    client: reqwest::Client,
    base_url: String,
    profile: String,
}

impl OsrmClient {
    pub fn new(base_url: &str, profile: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build routing HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            profile: profile.to_string(),
        })
    }

    fn route_url(&self, start: Coordinate, end: Coordinate) -> String {
        format!(
            "{}/route/v1/{}/{},{};{},{}?overview=full&geometries=geojson",
            self.base_url, self.profile, start.lon, start.lat, end.lon, end.lat
        )
    }
}

#[async_trait]
impl RouteProvider for OsrmClient {
    async fn compute_route(&self, start: Coordinate, end: Coordinate) -> anyhow::Result<RouteLeg> {
        let url = self.route_url(start, end);
        debug!(url = %url, "routing_request");

        let response = self.client.get(&url).send().await.context("routing request failed")?;
        let status = response.status();
        let body = response.text().await.context("failed to read routing response")?;
        if !status.is_success() {
            bail!("routing service returned HTTP {}", status);
        }
        parse_osrm_response(&body)
    }
}

/// Resolve a path for `route` between its first and last waypoint
///
/// Never fails: provider errors and degenerate results fall back to the
/// straight line through the waypoints.
pub async fn populate_route(route: &Route, provider: &dyn RouteProvider) -> RouteLeg {
    let waypoints = route.waypoint_line();
    let (Some(&start), Some(&end)) = (waypoints.first(), waypoints.last()) else {
        warn!(route_id = %route.id, "route_has_no_valid_waypoints");
        return straight_line_leg(&waypoints);
    };

    match provider.compute_route(start, end).await {
        Ok(leg) if valid_points(&leg.polyline).len() >= 2 => leg,
        Ok(leg) => {
            warn!(
                route_id = %route.id,
                points = leg.polyline.len(),
                "routing_degenerate_result_using_straight_line"
            );
            straight_line_leg(&waypoints)
        }
        Err(e) => {
            warn!(route_id = %route.id, name = %route.name, error = %e, "routing_failed_using_straight_line");
            straight_line_leg(&waypoints)
        }
    }
}
