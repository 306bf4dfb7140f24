//! Shared raster I/O and sampling.
//!
//! GeoTIFF read/write is the one piece of the pipeline every other engine
//! depends on: the normalizer reads satellite rasters, the UPES engine
//! writes satellite/final score rasters (and reads the previous final score
//! for EMA smoothing), and both the route engine and the alert scorer
//! sample the current final-score raster along a polyline with the same
//! stepping sampler, per spec.md §4.4/§4.5/§8.

use anyhow::{Context, Result};
use gdal::raster::Buffer;
use gdal::{Dataset, DriverManager};
use geo::{HaversineBearing, HaversineDistance, Point};
use std::path::{Path, PathBuf};

/// An in-memory north-up raster: row-major band-1 values plus the affine
/// transform needed to go from pixel (row, col) to (lon, lat) and back.
pub struct RasterGrid {
    pub width: usize,
    pub height: usize,
    pub transform: [f64; 6],
    pub nodata: Option<f64>,
    pub values: Vec<f64>,
}

impl RasterGrid {
    pub fn new(width: usize, height: usize, transform: [f64; 6], nodata: Option<f64>) -> Self {
        Self {
            width,
            height,
            transform,
            nodata,
            values: vec![nodata.unwrap_or(f64::NAN); width * height],
        }
    }

    #[inline]
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.width + col
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        let idx = self.index(row, col);
        self.values[idx] = value;
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        let v = self.values[self.index(row, col)];
        if v.is_nan() || self.nodata.map(|n| (v - n).abs() < f64::EPSILON).unwrap_or(false) {
            None
        } else {
            Some(v)
        }
    }

    /// Pixel-center (lon, lat) for a (row, col), north-up assumption
    /// (transform shear terms are zero, which holds for every raster this
    /// pipeline produces or consumes).
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let gt = self.transform;
        let lon = gt[0] + (col as f64 + 0.5) * gt[1];
        let lat = gt[3] + (row as f64 + 0.5) * gt[5];
        (lon, lat)
    }

    /// Nearest (row, col) for a geographic point, or `None` if it falls
    /// outside the raster extent.
    pub fn point_to_cell(&self, lon: f64, lat: f64) -> Option<(usize, usize)> {
        let gt = self.transform;
        if gt[1] == 0.0 || gt[5] == 0.0 {
            return None;
        }
        let col_f = (lon - gt[0]) / gt[1];
        let row_f = (lat - gt[3]) / gt[5];
        if col_f < 0.0 || row_f < 0.0 {
            return None;
        }
        let col = col_f.floor() as usize;
        let row = row_f.floor() as usize;
        if col >= self.width || row >= self.height {
            return None;
        }
        Some((row, col))
    }

    /// Value at a geographic point, `None` if outside the raster or the
    /// nearest pixel is no-data.
    pub fn value_at(&self, lon: f64, lat: f64) -> Option<f64> {
        let (row, col) = self.point_to_cell(lon, lat)?;
        self.get(row, col)
    }
}

/// Reads band 1 of a GeoTIFF (or any GDAL-readable raster) into a
/// `RasterGrid`.
pub fn read_geotiff(path: &Path) -> Result<RasterGrid> {
    let dataset = Dataset::open(path).with_context(|| format!("opening raster {}", path.display()))?;
    let transform = dataset.geo_transform().context("reading geo transform")?;
    let band = dataset.rasterband(1).context("reading band 1")?;
    let (width, height) = (band.x_size(), band.y_size());
    let nodata = band.no_data_value();

    let buffer: Buffer<f64> = band
        .read_as::<f64>((0, 0), (width, height), (width, height), None)
        .context("reading raster band into buffer")?;

    Ok(RasterGrid {
        width,
        height,
        transform,
        nodata,
        values: buffer.data,
    })
}

/// Writes `grid` to `path` atomically: the GeoTIFF is written to a sibling
/// temp file and renamed into place, so readers never observe a truncated
/// file mid-write (spec.md §5, §8).
pub fn write_geotiff_atomic(path: &Path, grid: &RasterGrid) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path: PathBuf = path.with_extension("tif.tmp");

    {
        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let mut dataset = driver.create_with_band_type::<f64, _>(
            &tmp_path,
            grid.width as isize,
            grid.height as isize,
            1,
        )?;
        dataset.set_geo_transform(&grid.transform)?;
        dataset.set_spatial_ref(&gdal::spatial_ref::SpatialRef::from_epsg(4326)?)?;

        let mut band = dataset.rasterband(1)?;
        if let Some(nodata) = grid.nodata {
            band.set_no_data_value(Some(nodata))?;
        }
        let buffer = Buffer::new((grid.width, grid.height), grid.values.clone());
        band.write((0, 0), (grid.width, grid.height), &buffer)?;
    }

    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Steps from `(lat1, lon1)` to `(lat2, lon2)` at `step_m` geodesic
/// intervals and returns the list of (lon, lat) sample points, including
/// both endpoints.
pub fn step_polyline(lat1: f64, lon1: f64, lat2: f64, lon2: f64, step_m: f64) -> Vec<(f64, f64)> {
    let total_m = haversine_m(lat1, lon1, lat2, lon2);
    if total_m < f64::EPSILON {
        return vec![(lon1, lat1)];
    }

    let steps = (total_m / step_m).ceil().max(1.0) as usize;
    (0..=steps)
        .map(|i| {
            let t = i as f64 / steps as f64;
            (lon1 + (lon2 - lon1) * t, lat1 + (lat2 - lat1) * t)
        })
        .collect()
}

/// Samples `raster` along the straight line from (lat1,lon1) to (lat2,lon2)
/// in ~50m geodesic steps and returns the mean and max of the valid samples.
/// Deterministic given the same inputs (spec.md §8).
pub fn sample_upes_along_line(
    raster: &RasterGrid,
    lat1: f64,
    lon1: f64,
    lat2: f64,
    lon2: f64,
    step_m: f64,
) -> Option<(f64, f64)> {
    let points = step_polyline(lat1, lon1, lat2, lon2, step_m);
    let samples: Vec<f64> = points.iter().filter_map(|(lon, lat)| raster.value_at(*lon, *lat)).collect();

    if samples.is_empty() {
        return None;
    }

    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    let max = samples.iter().cloned().fold(f64::MIN, f64::max);
    Some((mean, max))
}

/// Initial compass bearing (degrees, 0..360) from point 1 to point 2.
pub fn bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let from = Point::new(lon1, lat1);
    let to = Point::new(lon2, lat2);
    from.haversine_bearing(to).rem_euclid(360.0)
}

/// Geodesic distance in meters between two WGS84 points (haversine).
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let from = Point::new(lon1, lat1);
    let to = Point::new(lon2, lat2);
    from.haversine_distance(&to)
}

/// Finds the most recently modified `final_score_*.tif` under
/// `<upes_output_base>/hourly_scores/final_score/`, the "current UPES" per
/// spec.md §3.
pub fn latest_final_score_path(upes_output_base: &Path) -> Option<PathBuf> {
    let dir = upes_output_base.join("hourly_scores").join("final_score");
    let entries = std::fs::read_dir(dir).ok()?;

    entries
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("final_score_") && n.ends_with(".tif"))
                .unwrap_or(false)
        })
        .filter_map(|e| {
            let modified = e.metadata().ok()?.modified().ok()?;
            Some((e.path(), modified))
        })
        .max_by_key(|(_, modified)| *modified)
        .map(|(path, _)| path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_grid(width: usize, height: usize, value: f64) -> RasterGrid {
        let transform = [-118.25, 0.05, 0.0, 34.15, 0.0, -0.05];
        let mut grid = RasterGrid::new(width, height, transform, Some(-9999.0));
        for row in 0..height {
            for col in 0..width {
                grid.set(row, col, value);
            }
        }
        grid
    }

    #[test]
    fn pixel_roundtrip() {
        let grid = flat_grid(4, 4, 0.5);
        let (lon, lat) = grid.pixel_center(1, 1);
        let (row, col) = grid.point_to_cell(lon, lat).unwrap();
        assert_eq!((row, col), (1, 1));
    }

    #[test]
    fn sampler_is_deterministic() {
        let grid = flat_grid(10, 10, 0.7);
        let a = sample_upes_along_line(&grid, 34.0, -118.2, 34.1, -118.1, 50.0);
        let b = sample_upes_along_line(&grid, 34.0, -118.2, 34.1, -118.1, 50.0);
        assert_eq!(a, b);
        assert!((a.unwrap().0 - 0.7).abs() < 1e-9);
    }

    #[test]
    fn zero_length_line_samples_single_point() {
        let points = step_polyline(34.0, -118.2, 34.0, -118.2, 50.0);
        assert_eq!(points.len(), 1);
    }

    #[test]
    fn haversine_matches_known_distance() {
        // Roughly 111km per degree of latitude at the equator.
        let d = haversine_m(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_195.0).abs() < 1000.0);
    }

    #[test]
    fn write_then_read_geotiff_roundtrips_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("satellite_score_20260729_14.tif");

        let grid = flat_grid(6, 6, 0.42);
        write_geotiff_atomic(&path, &grid).expect("write");
        assert!(path.exists());

        let read_back = read_geotiff(&path).expect("read");
        assert_eq!((read_back.width, read_back.height), (6, 6));
        assert!((read_back.get(2, 2).unwrap() - 0.42).abs() < 1e-9);
    }

    #[test]
    fn latest_final_score_path_picks_newest_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let final_dir = dir.path().join("hourly_scores").join("final_score");
        std::fs::create_dir_all(&final_dir).unwrap();

        let older = final_dir.join("final_score_20260729_10.tif");
        let newer = final_dir.join("final_score_20260729_11.tif");
        std::fs::write(&older, b"older").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        std::fs::write(&newer, b"newer").unwrap();

        let found = latest_final_score_path(dir.path()).unwrap();
        assert_eq!(found, newer);
    }
}
