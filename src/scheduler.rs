//! Hourly beat schedule (spec.md §4.7, §5): ingestion at :00, UPES at :15,
//! route exposure scoring at :20, alerts at :25, all in UTC. Each tick is
//! independent — a failed run is logged and the next beat still fires.

use crate::cache::Cache;
use crate::config::Config;
use crate::object_store::ObjectStore;
use crate::weather::WeatherClient;
use chrono::{Timelike, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const TICK_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Beat {
    Ingestion,
    Upes,
    RouteExposure,
    Alerts,
}

fn beat_for_minute(minute: u32) -> Option<Beat> {
    match minute {
        0 => Some(Beat::Ingestion),
        15 => Some(Beat::Upes),
        20 => Some(Beat::RouteExposure),
        25 => Some(Beat::Alerts),
        _ => None,
    }
}

/// Spawns the background scheduler loop. Returns the task handle so the
/// caller can decide whether to await it (it never returns under normal
/// operation).
pub fn spawn(pool: PgPool, cache: Cache, object_store: ObjectStore, weather: WeatherClient, config: Arc<Config>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_fired: Option<(u32, u32)> = None; // (hour, minute) idempotency guard
        loop {
            let now = Utc::now();
            let key = (now.hour(), now.minute());

            if last_fired != Some(key) {
                if let Some(beat) = beat_for_minute(now.minute()) {
                    last_fired = Some(key);
                    run_beat(beat, &pool, &cache, &object_store, &weather, &config).await;
                }
            }

            tokio::time::sleep(TICK_INTERVAL).await;
        }
    })
}

async fn run_beat(beat: Beat, pool: &PgPool, cache: &Cache, object_store: &ObjectStore, weather: &WeatherClient, config: &Config) {
    info!(beat = ?beat, "scheduled beat firing");
    match beat {
        Beat::Ingestion => {
            let summary = crate::ingestion::run_ingestion_hour(pool, cache, object_store, weather, config).await;
            info!(rows = summary.total_rows_inserted, gases = summary.gases_with_data.len(), "ingestion beat complete");
        }
        Beat::Upes => {
            let engine = crate::upes::UpesEngine::new(pool.clone(), cache.clone(), weather.clone(), config);
            match engine.run().await {
                Ok(log) => info!(cells = log.cells_with_satellite_score, "upes beat complete"),
                Err(e) => error!(error = %e, "upes beat failed"),
            }
        }
        Beat::RouteExposure => match crate::alerts::compute_saved_route_upes_scores(pool, &config.upes_output_base).await {
            Ok(scored) => info!(scored, "route exposure beat complete"),
            Err(e) => error!(error = %e, "route exposure beat failed"),
        },
        Beat::Alerts => match crate::alerts::run_alert_pipeline(pool, weather, config).await {
            Ok(triggered) => info!(triggered = triggered.len(), "alerts beat complete"),
            Err(e) => error!(error = %e, "alerts beat failed"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beats_land_on_the_documented_minutes() {
        assert_eq!(beat_for_minute(0), Some(Beat::Ingestion));
        assert_eq!(beat_for_minute(15), Some(Beat::Upes));
        assert_eq!(beat_for_minute(20), Some(Beat::RouteExposure));
        assert_eq!(beat_for_minute(25), Some(Beat::Alerts));
        assert_eq!(beat_for_minute(1), None);
        assert_eq!(beat_for_minute(59), None);
    }
}
