//! Road network fetch (spec.md §4.4 "Graph build").
//!
//! Queries the public Overpass API for any-type way edges within a bounding
//! box and reduces the response to the fields the graph builder needs.

use crate::error::AppError;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OsmEdge {
    pub polyline: Vec<(f64, f64)>, // (lat, lon), in traversal order
    pub highway: Vec<String>,
    pub maxspeed_kph: Option<f64>,
    pub has_cycleway: bool,
    pub explicitly_accessible: bool,
    pub oneway: bool,
    pub leisure_park: bool,
}

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    elements: Vec<OverpassElement>,
}

#[derive(Debug, Deserialize)]
struct OverpassElement {
    #[serde(default)]
    r#type: String,
    #[serde(default)]
    geometry: Vec<OverpassLatLon>,
    #[serde(default)]
    tags: std::collections::HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct OverpassLatLon {
    lat: f64,
    lon: f64,
}

pub struct OsmClient {
    http: Client,
    base_url: String,
}

impl OsmClient {
    pub fn new() -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("AERIS/1.0 Pollution-Aware Navigation Backend")
            .build()
            .expect("failed to build osm HTTP client");
        Self { http, base_url: "https://overpass-api.de/api/interpreter".to_string() }
    }

    /// Fetches any-type way edges within `(south, west, north, east)`.
    pub async fn fetch_road_network(&self, bbox: (f64, f64, f64, f64)) -> Result<Vec<OsmEdge>, AppError> {
        let (west, south, east, north) = bbox;
        let query = format!(
            "[out:json][timeout:25];way[\"highway\"]({south},{west},{north},{east});out geom tags;"
        );

        let response = self
            .http
            .post(&self.base_url)
            .form(&[("data", query.as_str())])
            .send()
            .await
            .map_err(|e| AppError::upstream_transient("osm", e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::upstream_fatal("osm", format!("status {}", response.status())));
        }

        let parsed: OverpassResponse = response
            .json()
            .await
            .map_err(|e| AppError::upstream_fatal("osm", e.to_string()))?;

        let edges = parsed
            .elements
            .into_iter()
            .filter(|e| e.r#type == "way" && e.geometry.len() >= 2)
            .map(|e| {
                let polyline = e.geometry.iter().map(|p| (p.lat, p.lon)).collect();
                let highway = e
                    .tags
                    .get("highway")
                    .map(|h| h.split(';').map(str::to_string).collect())
                    .unwrap_or_default();
                let maxspeed_kph = e.tags.get("maxspeed").and_then(|v| v.trim().split_whitespace().next()).and_then(|v| v.parse().ok());
                let has_cycleway = e.tags.contains_key("cycleway");
                let explicitly_accessible = e
                    .tags
                    .get("foot")
                    .map(|v| v == "yes" || v == "designated")
                    .unwrap_or(false);
                let oneway = e.tags.get("oneway").map(|v| v == "yes").unwrap_or(false);
                let leisure_park = e.tags.get("leisure").map(|v| v == "park").unwrap_or(false);

                OsmEdge {
                    polyline,
                    highway,
                    maxspeed_kph,
                    has_cycleway,
                    explicitly_accessible,
                    oneway,
                    leisure_park,
                }
            })
            .collect();

        Ok(edges)
    }
}

impl Default for OsmClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Highway-type default speed table (spec.md §4.4), used when no explicit
/// `maxspeed` tag is present.
pub fn default_speed_kph(highway: &str) -> f64 {
    match highway {
        "motorway" | "motorway_link" => 100.0,
        "trunk" | "trunk_link" => 80.0,
        "primary" | "primary_link" => 60.0,
        "secondary" | "secondary_link" => 50.0,
        "tertiary" | "tertiary_link" => 40.0,
        "residential" | "unclassified" => 30.0,
        "service" => 20.0,
        "path" | "foot" | "footway" | "pedestrian" => 5.0,
        _ => 30.0,
    }
}
