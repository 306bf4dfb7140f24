//! Raster -> row-record normalizer (spec.md §4.2).
//!
//! Turns one downloaded GeoTIFF into the lazy sequence of
//! `pollution_grid` candidate rows the ingestion worker bulk-inserts.

use crate::domain::{classify_pollution_level, GasType};
use crate::raster::RasterGrid;
use chrono::{DateTime, Utc};

pub const DEFAULT_MAX_CELLS: usize = 5000;
pub const DEFAULT_CHUNK_SIZE: usize = 2000;

/// One candidate `pollution_grid` row, still in-memory.
#[derive(Debug, Clone)]
pub struct GridCellRow {
    pub timestamp: DateTime<Utc>,
    pub gas_type: GasType,
    pub geom_wkt: String,
    pub pollution_value: f64,
    pub severity_level: u8,
}

/// Picks a stride such that `ceil(width/stride) * ceil(height/stride) <= max_cells`,
/// by growing the stride until the projected count fits.
fn subsample_stride(width: usize, height: usize, max_cells: usize) -> usize {
    let total = width * height;
    if total <= max_cells || max_cells == 0 {
        return 1;
    }

    let mut stride = 1usize;
    loop {
        let cols = (width + stride - 1) / stride;
        let rows = (height + stride - 1) / stride;
        if cols * rows <= max_cells {
            return stride;
        }
        stride += 1;
    }
}

/// Closed WGS84 ring (5 points, first == last) for the half-pixel
/// axis-aligned bounding box around a pixel center.
fn half_pixel_ring_wkt(center_lon: f64, center_lat: f64, pixel_w: f64, pixel_h: f64) -> String {
    let half_w = pixel_w.abs() / 2.0;
    let half_h = pixel_h.abs() / 2.0;
    let (west, east) = (center_lon - half_w, center_lon + half_w);
    let (south, north) = (center_lat - half_h, center_lat + half_h);

    format!(
        "POLYGON(({west} {south}, {east} {south}, {east} {north}, {west} {north}, {west} {south}))"
    )
}

/// Reads `raster`, classifies, and returns the full row set (caller chunks
/// it via [`chunk_rows`]). `max_cells` bounds the emitted count via stride
/// subsampling, not truncation — the whole raster is represented, just at
/// coarser resolution when it would otherwise exceed the budget.
pub fn normalize(
    raster: &RasterGrid,
    gas: GasType,
    timestamp: DateTime<Utc>,
    max_cells: usize,
) -> Vec<GridCellRow> {
    let stride = subsample_stride(raster.width, raster.height, max_cells);
    let pixel_w = raster.transform[1];
    let pixel_h = raster.transform[5];

    let mut rows = Vec::new();
    let mut row_idx = 0usize;
    while row_idx < raster.height {
        let mut col_idx = 0usize;
        while col_idx < raster.width {
            if let Some(value) = raster.get(row_idx, col_idx) {
                if value.is_finite() {
                    let (lon, lat) = raster.pixel_center(row_idx, col_idx);
                    let severity = classify_pollution_level(value, gas);
                    rows.push(GridCellRow {
                        timestamp,
                        gas_type: gas,
                        geom_wkt: half_pixel_ring_wkt(lon, lat, pixel_w, pixel_h),
                        pollution_value: value,
                        severity_level: severity,
                    });
                }
            }
            col_idx += stride;
        }
        row_idx += stride;
    }
    rows
}

/// Splits `rows` into chunks of `chunk_size`, the unit the ingestion worker
/// bulk-inserts within a single transaction each.
pub fn chunk_rows(rows: Vec<GridCellRow>, chunk_size: usize) -> Vec<Vec<GridCellRow>> {
    if chunk_size == 0 {
        return vec![rows];
    }
    rows.chunks(chunk_size).map(|c| c.to_vec()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::RasterGrid;

    fn grid(width: usize, height: usize) -> RasterGrid {
        let transform = [-10.0, 0.1, 0.0, 10.0, 0.0, -0.1];
        let mut g = RasterGrid::new(width, height, transform, Some(-9999.0));
        for row in 0..height {
            for col in 0..width {
                g.set(row, col, 1e16);
            }
        }
        g
    }

    #[test]
    fn stride_bounds_cell_count() {
        let stride = subsample_stride(200, 200, 5000);
        let cols = (200 + stride - 1) / stride;
        let rows = (200 + stride - 1) / stride;
        assert!(cols * rows <= 5000);
    }

    #[test]
    fn no_stride_needed_when_within_budget() {
        assert_eq!(subsample_stride(10, 10, 5000), 1);
    }

    #[test]
    fn skips_nodata_pixels() {
        let mut g = grid(3, 3);
        g.set(1, 1, -9999.0);
        let rows = normalize(&g, GasType::NO2, Utc::now(), 5000);
        assert_eq!(rows.len(), 8);
    }

    #[test]
    fn ring_is_closed_with_five_points() {
        let wkt = half_pixel_ring_wkt(0.0, 0.0, 0.1, 0.1);
        let coords: Vec<&str> = wkt.trim_start_matches("POLYGON((").trim_end_matches("))").split(", ").collect();
        assert_eq!(coords.len(), 5);
        assert_eq!(coords.first(), coords.last());
    }

    #[test]
    fn chunking_respects_size() {
        let rows = normalize(&grid(20, 20), GasType::O3, Utc::now(), 5000);
        let chunks = chunk_rows(rows, 50);
        assert!(chunks.iter().all(|c| c.len() <= 50));
    }
}
