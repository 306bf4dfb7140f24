//! Route engine (spec.md §4.4): builds a bounded road-network graph per
//! request and returns up to `alternatives + 1` pollution-aware routes.

pub mod graph;
pub mod osm;

use crate::config::Config;
use crate::domain::ActivityMode;
use crate::error::{AppError, AppResult};
use crate::raster::{self, RasterGrid};
use geojson::{Geometry, Value as GeoJsonValue};
use graph::RoadGraph;
use osm::OsmClient;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteResult {
    pub nodes: Vec<(f64, f64)>,
    pub geometry: Geometry,
    pub exposure: f64,
    pub distance_km: f64,
    pub time_min: f64,
    pub cost: f64,
}

pub struct RouteRequest {
    pub start_lat: f64,
    pub start_lon: f64,
    pub end_lat: f64,
    pub end_lon: f64,
    pub mode: ActivityMode,
    pub alternatives: u8,
}

pub struct RouteEngine {
    osm: OsmClient,
    buffer_km: f64,
    route_optimization_enabled: bool,
}

impl RouteEngine {
    pub fn new(config: &Config) -> Self {
        Self {
            osm: OsmClient::new(),
            buffer_km: config.route_osm_buffer_km,
            route_optimization_enabled: config.route_optimization_enabled,
        }
    }

    pub async fn optimize(&self, request: &RouteRequest, upes_output_base: &str) -> AppResult<Vec<RouteResult>> {
        if !self.route_optimization_enabled {
            return Err(AppError::feature_disabled("route optimization is disabled"));
        }

        let bbox = expand_bbox(
            request.start_lat,
            request.start_lon,
            request.end_lat,
            request.end_lon,
            self.buffer_km,
        );

        let edges = self.osm.fetch_road_network(bbox).await?;
        if edges.is_empty() {
            return Ok(Vec::new());
        }

        let upes_raster = load_current_upes(upes_output_base);
        let road_graph = graph::build_graph(&edges, request.mode, upes_raster.as_ref());

        let Some(start_node) = graph::nearest_node(&road_graph, request.start_lat, request.start_lon) else {
            return Ok(Vec::new());
        };
        let Some(end_node) = graph::nearest_node(&road_graph, request.end_lat, request.end_lon) else {
            return Ok(Vec::new());
        };

        let paths = if request.alternatives == 0 {
            graph::dijkstra_path(&road_graph, start_node, end_node, &Default::default(), &Default::default())
                .into_iter()
                .collect()
        } else {
            let k = (request.alternatives as usize) + 1;
            graph::k_shortest_simple_paths(&road_graph, start_node, end_node, k)
        };

        if paths.is_empty() {
            return Ok(Vec::new());
        }

        Ok(paths.into_iter().map(|(path, _cost)| aggregate_path(&road_graph, &path)).collect())
    }
}

/// Axis-aligned envelope of start/end expanded by `buffer_km` on every side.
fn expand_bbox(start_lat: f64, start_lon: f64, end_lat: f64, end_lon: f64, buffer_km: f64) -> (f64, f64, f64, f64) {
    let deg_lat = buffer_km / 111.0;
    let mean_lat = (start_lat + end_lat) / 2.0;
    let deg_lon = buffer_km / (111.0 * mean_lat.to_radians().cos().max(0.1));

    let west = start_lon.min(end_lon) - deg_lon;
    let east = start_lon.max(end_lon) + deg_lon;
    let south = start_lat.min(end_lat) - deg_lat;
    let north = start_lat.max(end_lat) + deg_lat;
    (west, south, east, north)
}

fn load_current_upes(upes_output_base: &str) -> Option<RasterGrid> {
    let path = raster::latest_final_score_path(std::path::Path::new(upes_output_base))?;
    raster::read_geotiff(&path).ok()
}

/// Concatenates edge polylines (dropping duplicated junction points) and
/// sums distance/time/exposure/cost across the path's hops, picking the
/// min-weight edge between each adjacent node pair.
fn aggregate_path(graph: &RoadGraph, path: &[petgraph::graph::NodeIndex]) -> RouteResult {
    let mut coordinates: Vec<(f64, f64)> = Vec::new();
    let mut distance_km = 0.0;
    let mut time_min = 0.0;
    let mut exposure = 0.0;
    let mut cost = 0.0;

    for pair in path.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if let Some(edge) = graph::min_weight_edge(graph, a, b) {
            let km = edge.length_m / 1000.0;
            distance_km += km;
            time_min += 60.0 * edge.time_h;
            exposure += edge.mean_upes * km;
            cost += edge.weight;

            for (lat, lon) in &edge.polyline {
                if coordinates.last() != Some(&(*lat, *lon)) {
                    coordinates.push((*lat, *lon));
                }
            }
        }
    }

    let line_coords: Vec<Vec<f64>> = coordinates.iter().map(|(lat, lon)| vec![*lon, *lat]).collect();
    let geometry = Geometry::new(GeoJsonValue::LineString(line_coords));

    RouteResult { nodes: coordinates, geometry, exposure, distance_km, time_min, cost }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_expansion_covers_both_endpoints() {
        let (west, south, east, north) = expand_bbox(34.0, -118.2, 34.1, -118.1, 3.0);
        assert!(west < -118.2);
        assert!(east > -118.1);
        assert!(south < 34.0);
        assert!(north > 34.1);
    }
}
