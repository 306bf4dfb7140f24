//! Hourly ingestion worker (spec.md §4.1).
//!
//! For each of the five gases, fetches the satellite raster for the
//! last-completed UTC hour, normalizes it, and bulk-inserts the resulting
//! `pollution_grid` rows. A failure fetching or normalizing one gas does
//! not abort the others.

pub mod harmony;
pub mod normalizer;

use crate::cache::{Cache, TEMPO_LAST_UPDATE_TTL};
use crate::config::Config;
use crate::domain::GasType;
use crate::object_store::{audit_geotiff_key, ObjectStore};
use crate::weather::WeatherClient;
use crate::{alerts, db, raster, upes::UpesEngine};
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use harmony::{FetchOutcome, HarmonyClient};
use sqlx::PgPool;
use tracing::{error, info, warn};

pub struct IngestionSummary {
    pub total_rows_inserted: u64,
    pub gases_with_data: Vec<GasType>,
}

/// `[floor(now-1h, hour), floor(now, hour))`, the one-hour window ingested
/// on every scheduled run.
pub fn last_completed_hour_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let end = now
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    let start = end - ChronoDuration::hours(1);
    (start, end)
}

pub async fn run_ingestion_hour(
    pool: &PgPool,
    cache: &Cache,
    object_store: &ObjectStore,
    weather: &WeatherClient,
    config: &Config,
) -> IngestionSummary {
    let client = HarmonyClient::new(config);
    let bbox = (
        config.tempo_bbox_west,
        config.tempo_bbox_south,
        config.tempo_bbox_east,
        config.tempo_bbox_north,
    );
    let (start, end) = last_completed_hour_window(Utc::now());
    let start_iso = start.to_rfc3339();
    let end_iso = end.to_rfc3339();

    let mut total_rows_inserted = 0u64;
    let mut gases_with_data = Vec::new();

    for gas in GasType::ALL {
        match ingest_one_gas(&client, pool, object_store, gas, bbox, &start_iso, &end_iso, end).await {
            Ok(rows) if rows > 0 => {
                total_rows_inserted += rows;
                gases_with_data.push(gas);
            }
            Ok(_) => {}
            Err(e) => {
                error!(gas = %gas, error = %e, "ingestion failed for gas, continuing with remaining gases");
            }
        }
    }

    if total_rows_inserted > 0 {
        cache
            .set_string("tempo:last_update", &Utc::now().to_rfc3339(), TEMPO_LAST_UPDATE_TTL)
            .await;
        info!(rows = total_rows_inserted, "ingestion produced rows, dispatching UPES and route exposure recompute");
        dispatch_on_demand(pool, cache, weather, config).await;
    }

    IngestionSummary { total_rows_inserted, gases_with_data }
}

/// `compute_upes_hourly` and `recompute_saved_route_exposure`, triggered
/// on-demand whenever an ingestion run produces new rows rather than only at
/// the scheduler's fixed :15/:20 beats (spec.md §4.1/§4.3, Testable
/// Property #2).
async fn dispatch_on_demand(pool: &PgPool, cache: &Cache, weather: &WeatherClient, config: &Config) {
    let engine = UpesEngine::new(pool.clone(), cache.clone(), weather.clone(), config);
    match engine.run().await {
        Ok(log) => info!(cells = log.cells_with_satellite_score, "on-demand upes compute complete"),
        Err(e) => {
            error!(error = %e, "on-demand upes compute failed");
            return;
        }
    }

    match alerts::compute_saved_route_upes_scores(pool, &config.upes_output_base).await {
        Ok(scored) => info!(scored, "on-demand route exposure recompute complete"),
        Err(e) => error!(error = %e, "on-demand route exposure recompute failed"),
    }
}

async fn ingest_one_gas(
    client: &HarmonyClient,
    pool: &PgPool,
    object_store: &ObjectStore,
    gas: GasType,
    bbox: (f64, f64, f64, f64),
    start_iso: &str,
    end_iso: &str,
    hour_ts: DateTime<Utc>,
) -> anyhow::Result<u64> {
    let outcome = client.fetch_gas_raster(gas, bbox, start_iso, end_iso).await?;

    let temp_path = match outcome {
        FetchOutcome::NoGranules => {
            info!(gas = %gas, "no granules for this hour");
            return Ok(0);
        }
        FetchOutcome::Raster(path) => path,
    };

    let result = process_downloaded_raster(pool, object_store, gas, hour_ts, &temp_path).await;

    if let Err(e) = tokio::fs::remove_file(&temp_path).await {
        warn!(path = %temp_path.display(), error = %e, "failed to delete temp raster file");
    }

    result
}

async fn process_downloaded_raster(
    pool: &PgPool,
    object_store: &ObjectStore,
    gas: GasType,
    hour_ts: DateTime<Utc>,
    temp_path: &std::path::Path,
) -> anyhow::Result<u64> {
    if let Ok(bytes) = tokio::fs::read(temp_path).await {
        let key = audit_geotiff_key(gas, hour_ts);
        match object_store.upload_or_fallback(&key, bytes).await {
            Ok(()) => {
                let file_name = key.rsplit('/').next().unwrap_or(&key);
                if let Err(e) = db::insert_netcdf_file(pool, file_name, &key, hour_ts, gas).await {
                    warn!(gas = %gas, error = %e, "netcdf_files index insert failed");
                }
            }
            Err(e) => warn!(gas = %gas, error = %e, "audit upload failed"),
        }
    }

    let grid = raster::read_geotiff(temp_path)?;
    let rows = normalizer::normalize(&grid, gas, hour_ts, normalizer::DEFAULT_MAX_CELLS);
    let chunks = normalizer::chunk_rows(rows, normalizer::DEFAULT_CHUNK_SIZE);

    let mut inserted = 0u64;
    for chunk in chunks {
        match db::insert_pollution_grid_chunk(pool, &chunk).await {
            Ok(n) => inserted += n,
            Err(e) => warn!(gas = %gas, error = %e, "chunk insert failed, continuing with remaining chunks"),
        }
    }

    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn window_is_one_hour_floored() {
        let now = Utc.with_ymd_and_hms(2026, 7, 29, 14, 37, 12).unwrap();
        let (start, end) = last_completed_hour_window(now);
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 7, 29, 14, 0, 0).unwrap());
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 7, 29, 13, 0, 0).unwrap());
    }
}
