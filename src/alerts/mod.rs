//! Alerts engine (spec.md §4.5): two scheduled tasks sharing the saved
//! route table — exposure scoring and the four detection rules.

use crate::config::Config;
use crate::domain::sensitivity_scale;
use crate::models::{AlertType, SavedRoute};
use crate::raster::{self, bearing_deg};
use crate::weather::WeatherClient;
use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use tracing::{info, warn};

const SAMPLE_STEP_M: f64 = 50.0;
const HISTORY_EPSILON: f64 = 1e-6;
const TIME_BASED_DELTA: f64 = 0.15;

#[derive(Debug, Clone)]
pub struct TriggeredAlert {
    pub alert_id: uuid::Uuid,
    pub user_id: uuid::Uuid,
    pub route_id: uuid::Uuid,
    pub alert_type: AlertType,
    pub message: String,
    pub score_before: f64,
    pub score_after: f64,
    pub channels: Vec<String>,
}

/// `compute_saved_route_upes_scores` (minute 20). Skips entirely if no
/// final-score raster exists yet.
pub async fn compute_saved_route_upes_scores(pool: &PgPool, upes_output_base: &str) -> anyhow::Result<usize> {
    let Some(raster_path) = raster::latest_final_score_path(std::path::Path::new(upes_output_base)) else {
        info!("no final score raster yet, skipping route exposure scoring");
        return Ok(0);
    };
    let grid = raster::read_geotiff(&raster_path)?;

    let routes = crate::db::all_saved_routes(pool).await?;
    let now = Utc::now();
    let mut scored = 0usize;

    for route in &routes {
        let Some((mean, max)) = raster::sample_upes_along_line(
            &grid,
            route.origin_lat,
            route.origin_lon,
            route.destination_lat,
            route.destination_lon,
            SAMPLE_STEP_M,
        ) else {
            continue;
        };

        crate::db::insert_route_exposure_history(pool, route.id, now, mean, max, "final_score_raster").await?;
        crate::db::update_saved_route_last_upes(pool, route.id, mean, now).await?;
        scored += 1;
    }

    Ok(scored)
}

/// `run_alert_pipeline` (minute 25).
pub async fn run_alert_pipeline(pool: &PgPool, weather: &WeatherClient, config: &Config) -> anyhow::Result<Vec<TriggeredAlert>> {
    let routes = crate::db::all_saved_routes(pool).await?;
    let now = Utc::now();
    let mut triggered = Vec::new();

    for route in &routes {
        let Some(user) = crate::db::get_user(pool, route.user_id).await? else { continue };
        let (current, previous) = crate::db::latest_two_history_rows(pool, route.id).await?;
        let Some(current) = current else { continue };

        let scale = sensitivity_scale(user.exposure_sensitivity_level);
        let channels = user.enabled_channels();

        if let Some(previous) = &previous {
            let threshold = config.alerts_deterioration_base_pct * scale;
            if let Some(delta) = deterioration_delta(previous.upes_score, current.upes_score, threshold) {
                triggered.push(make_alert(
                    pool,
                    &route,
                    route.user_id,
                    AlertType::RouteDeterioration,
                    previous.upes_score,
                    current.upes_score,
                    threshold,
                    json!({ "delta_fraction": delta }),
                    &channels,
                )
                .await?);
            }
        }

        if current.max_upes_along_route >= config.alerts_hazard_threshold {
            triggered.push(make_alert(
                pool,
                &route,
                route.user_id,
                AlertType::Hazard,
                current.upes_score,
                current.max_upes_along_route,
                config.alerts_hazard_threshold,
                json!({ "max_upes_along_route": current.max_upes_along_route }),
                &channels,
            )
            .await?);
        }

        if let Some(alert) = evaluate_wind_shift(pool, weather, &route, &current, config, &channels).await? {
            triggered.push(alert);
        }

        if let Some(floor) = crate::db::min_upes_last_24h(pool, route.id, now).await? {
            if current.upes_score >= floor + TIME_BASED_DELTA {
                triggered.push(make_alert(
                    pool,
                    &route,
                    route.user_id,
                    AlertType::TimeBased,
                    floor,
                    current.upes_score,
                    floor + TIME_BASED_DELTA,
                    json!({ "floor_24h": floor }),
                    &channels,
                )
                .await?);
            }
        }
    }

    if !triggered.is_empty() {
        dispatch_webhook(config, &triggered).await;
    }

    Ok(triggered)
}

async fn evaluate_wind_shift(
    pool: &PgPool,
    weather: &WeatherClient,
    route: &SavedRoute,
    current: &crate::models::RouteExposureHistory,
    config: &Config,
    channels: &[String],
) -> anyhow::Result<Option<TriggeredAlert>> {
    let bbox_wkt = route_bbox_wkt(route, config.route_osm_buffer_km);
    let window_end = current.timestamp;
    let window_start = window_end - chrono::Duration::hours(1);

    let Some((source_lat, source_lon, _value)) =
        crate::db::highest_pollution_cell_in_bbox(pool, &bbox_wkt, window_start, window_end).await?
    else {
        return Ok(None);
    };

    let mid_lat = (route.origin_lat + route.destination_lat) / 2.0;
    let mid_lon = (route.origin_lon + route.destination_lon) / 2.0;
    let bearing = bearing_deg(source_lat, source_lon, mid_lat, mid_lon);

    let weather_at_midpoint = match weather.current(mid_lat, mid_lon).await {
        Ok(w) => w,
        Err(e) => {
            warn!(error = %e, "weather lookup failed for wind shift check, skipping");
            return Ok(None);
        }
    };

    let angle_diff = angular_difference(weather_at_midpoint.wind_degree, bearing);
    if weather_at_midpoint.wind_kph >= config.alerts_wind_speed_min_kph && angle_diff <= config.alerts_wind_angle_deg {
        let alert = make_alert(
            pool,
            route,
            route.user_id,
            AlertType::WindShift,
            config.alerts_wind_speed_min_kph,
            weather_at_midpoint.wind_kph,
            config.alerts_wind_angle_deg,
            json!({
                "wind_degree": weather_at_midpoint.wind_degree,
                "wind_kph": weather_at_midpoint.wind_kph,
                "bearing_from_source": bearing,
                "source_point": { "lat": source_lat, "lon": source_lon },
            }),
            channels,
        )
        .await?;
        return Ok(Some(alert));
    }

    Ok(None)
}

/// Fractional increase from `previous` to `current`, or `None` if it
/// doesn't clear `threshold`.
fn deterioration_delta(previous: f64, current: f64, threshold: f64) -> Option<f64> {
    let delta = (current - previous) / previous.max(HISTORY_EPSILON);
    (delta >= threshold).then_some(delta)
}

fn angular_difference(a: f64, b: f64) -> f64 {
    let diff = (a - b).abs() % 360.0;
    diff.min(360.0 - diff)
}

fn route_bbox_wkt(route: &SavedRoute, buffer_km: f64) -> String {
    let deg_lat = buffer_km / 111.0;
    let mean_lat = (route.origin_lat + route.destination_lat) / 2.0;
    let deg_lon = buffer_km / (111.0 * mean_lat.to_radians().cos().max(0.1));

    let west = route.origin_lon.min(route.destination_lon) - deg_lon;
    let east = route.origin_lon.max(route.destination_lon) + deg_lon;
    let south = route.origin_lat.min(route.destination_lat) - deg_lat;
    let north = route.origin_lat.max(route.destination_lat) + deg_lat;

    format!("POLYGON(({west} {south}, {east} {south}, {east} {north}, {west} {north}, {west} {south}))")
}

#[allow(clippy::too_many_arguments)]
async fn make_alert(
    pool: &PgPool,
    route: &SavedRoute,
    user_id: uuid::Uuid,
    alert_type: AlertType,
    score_before: f64,
    score_after: f64,
    threshold: f64,
    mut metadata: serde_json::Value,
    channels: &[String],
) -> anyhow::Result<TriggeredAlert> {
    if let Some(obj) = metadata.as_object_mut() {
        obj.insert("route_id".to_string(), json!(route.id));
    }

    let row = crate::db::insert_alert_log(
        pool,
        user_id,
        route.id,
        alert_type,
        score_before,
        score_after,
        threshold,
        metadata,
        channels,
    )
    .await?;

    Ok(TriggeredAlert {
        alert_id: row.id,
        user_id,
        route_id: route.id,
        alert_type,
        message: alert_message(alert_type, score_before, score_after),
        score_before,
        score_after,
        channels: channels.to_vec(),
    })
}

fn alert_message(alert_type: AlertType, before: f64, after: f64) -> String {
    match alert_type {
        AlertType::RouteDeterioration => format!("Exposure on this route worsened from {before:.2} to {after:.2}"),
        AlertType::Hazard => format!("Hazardous pollution level detected along this route: {after:.2}"),
        AlertType::WindShift => "Wind is carrying pollution toward this route".to_string(),
        AlertType::TimeBased => format!("Exposure rose {after:.2}, above the 24h floor of {before:.2}"),
    }
}

async fn dispatch_webhook(config: &Config, alerts: &[TriggeredAlert]) {
    let Some(url) = &config.alerts_n8n_webhook_url else { return };

    let body = json!({
        "alerts": alerts.iter().map(|a| json!({
            "alert_id": a.alert_id,
            "user_id": a.user_id,
            "route_id": a.route_id,
            "alert_type": a.alert_type.as_str(),
            "message": a.message,
            "score_before": a.score_before,
            "score_after": a.score_after,
            "channels": a.channels,
        })).collect::<Vec<_>>(),
        "timestamp": Utc::now().to_rfc3339(),
    });

    let client = reqwest::Client::new();
    if let Err(e) = client.post(url).json(&body).send().await {
        warn!(error = %e, "alert webhook dispatch failed, db writes are not rolled back");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn angular_difference_wraps_correctly() {
        assert_eq!(angular_difference(350.0, 10.0), 20.0);
        assert_eq!(angular_difference(10.0, 350.0), 20.0);
        assert_eq!(angular_difference(0.0, 180.0), 180.0);
    }

    #[test]
    fn deterioration_threshold_scales_with_sensitivity() {
        // +33%: triggers at level 1 (threshold ~0.15) and level 5 (~0.075).
        let threshold_level1 = 0.15 * sensitivity_scale(1);
        let threshold_level5 = 0.15 * sensitivity_scale(5);
        assert!(deterioration_delta(0.30, 0.40, threshold_level1).is_some());
        assert!(deterioration_delta(0.30, 0.40, threshold_level5).is_some());

        // +5%: does not trigger at level 1, but does at level 5.
        assert!(deterioration_delta(0.40, 0.42, threshold_level1).is_none());
        assert!(deterioration_delta(0.40, 0.42, threshold_level5).is_some());
    }
}
