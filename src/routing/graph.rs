//! Weighted road graph build and pathfinding (spec.md §4.4).

use super::osm::{default_speed_kph, OsmEdge};
use crate::domain::{clamp, mode_weights, ActivityMode};
use crate::raster::{self, RasterGrid};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{BinaryHeap, HashMap, HashSet};

const EDGE_SAMPLE_STEP_M: f64 = 50.0;
const FALLBACK_UPES: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct EdgeMetrics {
    pub length_m: f64,
    pub speed_kph: f64,
    pub time_h: f64,
    pub mean_upes: f64,
    pub modifier: f64,
    pub weight: f64,
    pub polyline: Vec<(f64, f64)>, // (lat, lon)
}

pub type RoadGraph = DiGraph<(f64, f64), EdgeMetrics>;

/// Builds the weighted directed multigraph from fetched OSM edges. Node
/// identity is the rounded (lat, lon) of each polyline endpoint, which
/// coincides for edges sharing an intersection in Overpass's `out geom`
/// output.
pub fn build_graph(edges: &[OsmEdge], mode: ActivityMode, upes: Option<&RasterGrid>) -> RoadGraph {
    let mut graph: RoadGraph = DiGraph::new();
    let mut node_index: HashMap<(i64, i64), NodeIndex> = HashMap::new();

    let mut node_for = |graph: &mut RoadGraph, lat: f64, lon: f64| -> NodeIndex {
        let key = (quantize(lat), quantize(lon));
        *node_index.entry(key).or_insert_with(|| graph.add_node((lat, lon)))
    };

    for edge in edges {
        if edge.polyline.len() < 2 {
            continue;
        }
        let (start_lat, start_lon) = edge.polyline[0];
        let (end_lat, end_lon) = *edge.polyline.last().unwrap();

        let from = node_for(&mut graph, start_lat, start_lon);
        let to = node_for(&mut graph, end_lat, end_lon);

        let metrics = edge_metrics(edge, mode, upes);
        graph.add_edge(from, to, metrics.clone());

        if !edge.oneway {
            let mut reversed = metrics;
            reversed.polyline.reverse();
            graph.add_edge(to, from, reversed);
        }
    }

    graph
}

fn quantize(value: f64) -> i64 {
    (value * 1_000_000.0).round() as i64
}

fn edge_metrics(edge: &OsmEdge, mode: ActivityMode, upes: Option<&RasterGrid>) -> EdgeMetrics {
    let length_m = polyline_length_m(&edge.polyline);
    let speed_kph = edge
        .maxspeed_kph
        .unwrap_or_else(|| default_speed_kph(edge.highway.first().map(String::as_str).unwrap_or("unclassified")));
    let time_h = (length_m / 1000.0) / speed_kph.max(5.0);

    let mean_upes = sample_mean_upes(&edge.polyline, upes);
    let modifier = clamp(mode_modifier(edge, mode), 0.1, 5.0);

    let (alpha, beta, gamma) = mode_weights(mode);
    let weight = modifier * (alpha * mean_upes + beta * (length_m / 1000.0) + gamma * time_h);

    EdgeMetrics { length_m, speed_kph, time_h, mean_upes, modifier, weight, polyline: edge.polyline.clone() }
}

fn polyline_length_m(polyline: &[(f64, f64)]) -> f64 {
    polyline
        .windows(2)
        .map(|pair| raster::haversine_m(pair[0].0, pair[0].1, pair[1].0, pair[1].1))
        .sum()
}

fn sample_mean_upes(polyline: &[(f64, f64)], upes: Option<&RasterGrid>) -> f64 {
    let Some(grid) = upes else { return FALLBACK_UPES };

    let mut samples = Vec::new();
    for pair in polyline.windows(2) {
        let ((lat1, lon1), (lat2, lon2)) = (pair[0], pair[1]);
        if let Some((mean, _max)) = raster::sample_upes_along_line(grid, lat1, lon1, lat2, lon2, EDGE_SAMPLE_STEP_M) {
            samples.push(mean);
        }
    }

    if samples.is_empty() {
        FALLBACK_UPES
    } else {
        samples.iter().sum::<f64>() / samples.len() as f64
    }
}

/// `mode_modifier(edge, mode)` from spec.md §4.4's penalty/bonus table.
/// `highway` list's first element governs if it's a list.
fn mode_modifier(edge: &OsmEdge, mode: ActivityMode) -> f64 {
    let highway = edge.highway.first().map(String::as_str).unwrap_or("");
    let is_motorway_or_trunk = matches!(highway, "motorway" | "motorway_link" | "trunk" | "trunk_link");
    let is_path_like = matches!(highway, "path" | "footway" | "pedestrian");

    match mode {
        ActivityMode::Commute => {
            if is_path_like && !edge.explicitly_accessible {
                1.2
            } else {
                1.0
            }
        }
        ActivityMode::Jogger => {
            if is_motorway_or_trunk {
                2.0
            } else if is_path_like || edge.leisure_park {
                0.5
            } else {
                1.0
            }
        }
        ActivityMode::Cyclist => {
            if matches!(highway, "motorway" | "trunk") {
                1.5
            } else if edge.has_cycleway {
                0.7
            } else {
                1.0
            }
        }
    }
}

/// Nearest node to `(lat, lon)` by Euclidean distance in (lon, lat).
pub fn nearest_node(graph: &RoadGraph, lat: f64, lon: f64) -> Option<NodeIndex> {
    graph
        .node_indices()
        .min_by(|&a, &b| {
            let da = euclidean_sq(graph[a], (lat, lon));
            let db = euclidean_sq(graph[b], (lat, lon));
            da.partial_cmp(&db).unwrap()
        })
}

fn euclidean_sq(node: (f64, f64), target: (f64, f64)) -> f64 {
    let (node_lat, node_lon) = node;
    let (target_lat, target_lon) = target;
    (node_lon - target_lon).powi(2) + (node_lat - target_lat).powi(2)
}

#[derive(Debug, Clone, PartialEq)]
struct HeapEntry {
    cost: f64,
    node: NodeIndex,
}

impl Eq for HeapEntry {}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.cost.partial_cmp(&self.cost).unwrap_or(std::cmp::Ordering::Equal)
    }
}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Dijkstra shortest path on `graph` from `start` to `end`, optionally
/// excluding `removed_nodes`/`removed_edges` (used by Yen's spur search).
pub fn dijkstra_path(
    graph: &RoadGraph,
    start: NodeIndex,
    end: NodeIndex,
    removed_nodes: &HashSet<NodeIndex>,
    removed_edges: &HashSet<(NodeIndex, NodeIndex)>,
) -> Option<(Vec<NodeIndex>, f64)> {
    let mut dist: HashMap<NodeIndex, f64> = HashMap::new();
    let mut prev: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut heap = BinaryHeap::new();

    dist.insert(start, 0.0);
    heap.push(HeapEntry { cost: 0.0, node: start });

    while let Some(HeapEntry { cost, node }) = heap.pop() {
        if node == end {
            break;
        }
        if cost > *dist.get(&node).unwrap_or(&f64::INFINITY) {
            continue;
        }

        for edge_ref in graph.edges(node) {
            let target = edge_ref.target();
            if removed_nodes.contains(&target) || removed_edges.contains(&(node, target)) {
                continue;
            }
            let next_cost = cost + min_parallel_weight(graph, node, target);
            if next_cost < *dist.get(&target).unwrap_or(&f64::INFINITY) {
                dist.insert(target, next_cost);
                prev.insert(target, node);
                heap.push(HeapEntry { cost: next_cost, node: target });
            }
        }
    }

    let total = *dist.get(&end)?;
    let mut path = vec![end];
    let mut current = end;
    while current != start {
        current = *prev.get(&current)?;
        path.push(current);
    }
    path.reverse();
    Some((path, total))
}

/// Minimum `weight` among parallel edges from `a` to `b`, the collapsing
/// rule the underlying simple digraph uses for pathfinding.
pub fn min_parallel_weight(graph: &RoadGraph, a: NodeIndex, b: NodeIndex) -> f64 {
    graph
        .edges_connecting(a, b)
        .map(|e| e.weight().weight)
        .fold(f64::INFINITY, f64::min)
}

/// The parallel edge achieving [`min_parallel_weight`] between `a` and `b`,
/// used to reconstruct geometry/metrics from the original multigraph.
pub fn min_weight_edge<'a>(graph: &'a RoadGraph, a: NodeIndex, b: NodeIndex) -> Option<&'a EdgeMetrics> {
    graph
        .edges_connecting(a, b)
        .min_by(|x, y| x.weight().weight.partial_cmp(&y.weight().weight).unwrap())
        .map(|e| e.weight())
}

/// Yen's algorithm: up to `k` loopless paths from `start` to `end`, ordered
/// shortest-first, each expressed as a node sequence.
pub fn k_shortest_simple_paths(
    graph: &RoadGraph,
    start: NodeIndex,
    end: NodeIndex,
    k: usize,
) -> Vec<(Vec<NodeIndex>, f64)> {
    let Some(first) = dijkstra_path(graph, start, end, &HashSet::new(), &HashSet::new()) else {
        return Vec::new();
    };

    let mut accepted = vec![first];
    let mut candidates: Vec<(Vec<NodeIndex>, f64)> = Vec::new();

    while accepted.len() < k {
        let prev_path = accepted.last().unwrap().0.clone();

        for i in 0..prev_path.len().saturating_sub(1) {
            let spur_node = prev_path[i];
            let root_path = &prev_path[..=i];

            let mut removed_edges = HashSet::new();
            for (path, _) in &accepted {
                if path.len() > i && &path[..=i] == root_path {
                    removed_edges.insert((path[i], path[i + 1]));
                }
            }

            let removed_nodes: HashSet<NodeIndex> = root_path[..i].iter().copied().collect();

            if let Some((spur_path, spur_cost)) =
                dijkstra_path(graph, spur_node, end, &removed_nodes, &removed_edges)
            {
                let mut total_path = root_path[..i].to_vec();
                total_path.extend(spur_path);

                let root_cost: f64 = root_path[..i]
                    .windows(2)
                    .map(|pair| min_parallel_weight(graph, pair[0], pair[1]))
                    .sum();
                let total_cost = root_cost + spur_cost;

                if !accepted.iter().any(|(p, _)| p == &total_path)
                    && !candidates.iter().any(|(p, _)| p == &total_path)
                {
                    candidates.push((total_path, total_cost));
                }
            }
        }

        if candidates.is_empty() {
            break;
        }

        candidates.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        accepted.push(candidates.remove(0));
    }

    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::osm::OsmEdge;

    fn edge(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> OsmEdge {
        OsmEdge {
            polyline: vec![(lat1, lon1), (lat2, lon2)],
            highway: vec!["residential".to_string()],
            maxspeed_kph: None,
            has_cycleway: false,
            explicitly_accessible: false,
            oneway: false,
            leisure_park: false,
        }
    }

    #[test]
    fn build_graph_dedups_shared_endpoints() {
        let edges = vec![edge(34.0, -118.0, 34.01, -118.0), edge(34.01, -118.0, 34.02, -118.0)];
        let graph = build_graph(&edges, ActivityMode::Commute, None);
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 4); // both directions, both edges
    }

    #[test]
    fn dijkstra_finds_direct_path() {
        let edges = vec![edge(34.0, -118.0, 34.01, -118.0)];
        let graph = build_graph(&edges, ActivityMode::Commute, None);
        let start = nearest_node(&graph, 34.0, -118.0).unwrap();
        let end = nearest_node(&graph, 34.01, -118.0).unwrap();
        let (path, _cost) = dijkstra_path(&graph, start, end, &Default::default(), &Default::default()).unwrap();
        assert_eq!(path.len(), 2);
    }

    #[test]
    fn k_shortest_paths_returns_at_most_k() {
        let edges = vec![
            edge(34.0, -118.0, 34.01, -118.0),
            edge(34.01, -118.0, 34.02, -118.0),
            edge(34.0, -118.0, 34.02, -118.0),
        ];
        let graph = build_graph(&edges, ActivityMode::Commute, None);
        let start = nearest_node(&graph, 34.0, -118.0).unwrap();
        let end = nearest_node(&graph, 34.02, -118.0).unwrap();
        let paths = k_shortest_simple_paths(&graph, start, end, 3);
        assert!(paths.len() <= 3);
        assert!(!paths.is_empty());
    }
}
