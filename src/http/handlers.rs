//! Route handlers (spec.md §6). Thin: each one validates input, calls into
//! the engine/db layer, and shapes a response. No business logic lives here.

use super::{AppState, CurrentUser};
use crate::cache::{self, POLLUTANT_MOVEMENT_CACHE_TTL, WEATHER_CACHE_TTL};
use crate::domain::{self, ActivityMode, GasType};
use crate::error::{AppError, AppResult};
use crate::models::{ActivityType, AlertLog, AlertType, SavedRoute, User};
use crate::raster::{self, RasterGrid};
use crate::{auth, db};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

// ---------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
    services: HashMap<String, String>,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut services = HashMap::new();
    let db_healthy = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();
    services.insert("database".to_string(), if db_healthy { "healthy" } else { "unreachable" }.to_string());
    services.insert("cache".to_string(), if state.cache.is_configured() { "configured" } else { "disabled" }.to_string());
    services.insert(
        "object_storage".to_string(),
        if state.object_store.is_configured() { "configured" } else { "local_fallback" }.to_string(),
    );
    services.insert(
        "route_optimization".to_string(),
        if state.config.route_optimization_enabled { "enabled" } else { "disabled" }.to_string(),
    );

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        services,
    })
}

// ---------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------

#[derive(Deserialize)]
pub struct RegisterRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Serialize)]
pub struct AuthResponse {
    access_token: String,
    token_type: String,
    user: UserView,
}

#[derive(Serialize)]
pub struct UserView {
    id: Uuid,
    email: String,
    exposure_sensitivity_level: i16,
    sensitivity_label: &'static str,
    notification_preferences: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        UserView {
            sensitivity_label: domain::sensitivity_label(user.exposure_sensitivity_level),
            id: user.id,
            email: user.email,
            exposure_sensitivity_level: user.exposure_sensitivity_level,
            notification_preferences: user.notification_preferences,
            created_at: user.created_at,
        }
    }
}

fn validate_email(email: &str) -> AppResult<()> {
    if email.trim().is_empty() || !email.contains('@') {
        return Err(AppError::validation("a valid email address is required"));
    }
    Ok(())
}

fn validate_password(password: &str) -> AppResult<()> {
    if password.len() < 8 {
        return Err(AppError::validation("password must be at least 8 characters"));
    }
    Ok(())
}

pub async fn register(State(state): State<AppState>, Json(body): Json<RegisterRequest>) -> AppResult<Json<AuthResponse>> {
    validate_email(&body.email)?;
    validate_password(&body.password)?;

    if db::get_user_by_email(&state.pool, &body.email).await?.is_some() {
        return Err(AppError::validation("an account with this email already exists"));
    }

    let hashed = auth::hash_password(&body.password)?;
    let user = db::insert_user(&state.pool, &body.email, &hashed).await?;
    let token = auth::issue_token(user.id, &state.config.secret_key, state.config.access_token_expire_minutes)?;

    Ok(Json(AuthResponse { access_token: token, token_type: "Bearer".to_string(), user: user.into() }))
}

pub async fn login(State(state): State<AppState>, Json(body): Json<LoginRequest>) -> AppResult<Json<AuthResponse>> {
    let user = db::get_user_by_email(&state.pool, &body.email)
        .await?
        .ok_or_else(|| AppError::auth("invalid email or password"))?;

    if !auth::verify_password(&body.password, &user.hashed_password) {
        return Err(AppError::auth("invalid email or password"));
    }

    let token = auth::issue_token(user.id, &state.config.secret_key, state.config.access_token_expire_minutes)?;
    Ok(Json(AuthResponse { access_token: token, token_type: "Bearer".to_string(), user: user.into() }))
}

pub async fn get_me(CurrentUser(user): CurrentUser) -> Json<UserView> {
    Json(user.into())
}

#[derive(Deserialize)]
pub struct PatchMeRequest {
    exposure_sensitivity_level: Option<i16>,
    notification_preferences: Option<serde_json::Value>,
}

pub async fn patch_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<PatchMeRequest>,
) -> AppResult<Json<UserView>> {
    if let Some(level) = body.exposure_sensitivity_level {
        if !(1..=5).contains(&level) {
            return Err(AppError::validation("exposure_sensitivity_level must be between 1 and 5"));
        }
    }

    let updated = db::update_user_preferences(&state.pool, user.id, body.notification_preferences, body.exposure_sensitivity_level).await?;
    Ok(Json(updated.into()))
}

// ---------------------------------------------------------------------
// Pollution analysis
// ---------------------------------------------------------------------

#[derive(Deserialize)]
pub struct AnalyzeRequest {
    latitude: f64,
    longitude: f64,
    radius_km: Option<f64>,
    gases: Option<Vec<String>>,
    include_weather: Option<bool>,
    include_pollutant_prediction: Option<bool>,
}

#[derive(Serialize)]
pub struct HotspotPoint {
    latitude: f64,
    longitude: f64,
    gas_type: String,
    pollution_value: f64,
    severity_level: i16,
    timestamp: DateTime<Utc>,
    distance_km: f64,
}

/// Advisory string surfaced inline with `/api/analyze`'s hotspots, distinct
/// from the persisted `alert_log` rows (those require a saved route and a
/// user to notify; this is a same-request, no-auth summary of what's nearby).
#[derive(Serialize)]
pub struct AnalyzeAlert {
    gas_type: String,
    severity_level: i16,
    message: String,
}

#[derive(Serialize)]
pub struct AnalyzeResponse {
    latitude: f64,
    longitude: f64,
    radius_km: f64,
    hotspots: Vec<HotspotPoint>,
    alerts: Vec<AnalyzeAlert>,
    units: HashMap<String, String>,
    image_url: Option<String>,
    weather: Option<crate::weather::CurrentWeather>,
    pollutant_prediction: Option<Vec<crate::weather::HourlyForecast>>,
}

const ANALYZE_CANDIDATE_LIMIT: i64 = 500;
const DEFAULT_ANALYZE_RADIUS_KM: f64 = 5.0;
/// Severity band (spec.md §6 thresholds, index 3 == "very_unhealthy") at or
/// above which a hotspot gets an inline advisory alert.
const ANALYZE_ALERT_MIN_SEVERITY: i16 = 3;

pub async fn analyze(State(state): State<AppState>, Json(body): Json<AnalyzeRequest>) -> AppResult<Json<AnalyzeResponse>> {
    if !(-90.0..=90.0).contains(&body.latitude) || !(-180.0..=180.0).contains(&body.longitude) {
        return Err(AppError::validation("latitude/longitude out of range"));
    }
    let radius_km = body.radius_km.unwrap_or(DEFAULT_ANALYZE_RADIUS_KM).max(0.1);
    let wanted_gases: Option<Vec<String>> = body.gases.as_ref().map(|gases| gases.iter().map(|g| g.to_ascii_uppercase()).collect());

    let candidates = db::recent_severe_cells(&state.pool, 0, ANALYZE_CANDIDATE_LIMIT).await?;
    let radius_m = radius_km * 1000.0;

    // Haversine-filtering a few hundred candidates is CPU-bound and
    // trivially data-parallel; rayon avoids blocking the async runtime
    // thread on it.
    let hotspots: Vec<HotspotPoint> = candidates
        .into_par_iter()
        .filter(|(_, _, gas_type, ..)| wanted_gases.as_ref().map(|gases| gases.iter().any(|g| g == gas_type)).unwrap_or(true))
        .filter_map(|(lat, lon, gas_type, value, severity, timestamp)| {
            let distance_m = raster::haversine_m(body.latitude, body.longitude, lat, lon);
            (distance_m <= radius_m).then(|| HotspotPoint {
                latitude: lat,
                longitude: lon,
                gas_type,
                pollution_value: value,
                severity_level: severity,
                timestamp,
                distance_km: distance_m / 1000.0,
            })
        })
        .collect();

    let alerts: Vec<AnalyzeAlert> = hotspots
        .iter()
        .filter(|h| h.severity_level >= ANALYZE_ALERT_MIN_SEVERITY)
        .map(|h| AnalyzeAlert {
            gas_type: h.gas_type.clone(),
            severity_level: h.severity_level,
            message: format!("{} reading {:.1}km away is at severity {}", h.gas_type, h.distance_km, h.severity_level),
        })
        .collect();

    let units: HashMap<String, String> =
        hotspots.iter().map(|h| h.gas_type.clone()).collect::<std::collections::HashSet<_>>().into_iter().map(|gas| (gas.clone(), gas_unit(&gas))).collect();

    let image_url = raster::latest_final_score_path(std::path::Path::new(&state.config.upes_output_base)).map(|_| "/api/upes/heatmap".to_string());

    let weather = if body.include_weather.unwrap_or(true) {
        state.weather.current(body.latitude, body.longitude).await.ok()
    } else {
        None
    };

    let pollutant_prediction = if body.include_pollutant_prediction.unwrap_or(false) {
        state.weather.next_three_hours(body.latitude, body.longitude).await.ok()
    } else {
        None
    };

    Ok(Json(AnalyzeResponse {
        latitude: body.latitude,
        longitude: body.longitude,
        radius_km,
        hotspots,
        alerts,
        units,
        image_url,
        weather,
        pollutant_prediction,
    }))
}

fn gas_unit(gas_type: &str) -> String {
    GasType::ALL.iter().find(|g| g.to_string() == gas_type).map(|g| g.unit().to_string()).unwrap_or_default()
}

#[derive(Deserialize)]
pub struct HotspotsQuery {
    min_severity: Option<i16>,
    limit: Option<i64>,
}

const DEFAULT_HOTSPOT_MIN_SEVERITY: i16 = 2; // unhealthy and above
const DEFAULT_HOTSPOT_LIMIT: i64 = 200;

/// GeoJSON `FeatureCollection` of recent severe cells (spec.md §6).
pub async fn hotspots(State(state): State<AppState>, Query(query): Query<HotspotsQuery>) -> AppResult<Json<serde_json::Value>> {
    let min_severity = query.min_severity.unwrap_or(DEFAULT_HOTSPOT_MIN_SEVERITY);
    let limit = query.limit.unwrap_or(DEFAULT_HOTSPOT_LIMIT).clamp(1, 2000);

    let rows = db::recent_severe_cells(&state.pool, min_severity, limit).await?;
    let features: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|(lat, lon, gas_type, value, severity, timestamp)| {
            json!({
                "type": "Feature",
                "geometry": { "type": "Point", "coordinates": [lon, lat] },
                "properties": {
                    "gas_type": gas_type,
                    "pollution_value": value,
                    "severity_level": severity,
                    "timestamp": timestamp,
                },
            })
        })
        .collect();

    Ok(Json(json!({ "type": "FeatureCollection", "features": features })))
}

// ---------------------------------------------------------------------
// Weather
// ---------------------------------------------------------------------

#[derive(Deserialize)]
pub struct LatLonQuery {
    lat: f64,
    lon: f64,
}

pub async fn weather(State(state): State<AppState>, Query(query): Query<LatLonQuery>) -> AppResult<Json<crate::weather::CurrentWeather>> {
    let key = cache::weather_cache_key(query.lat, query.lon, 0);
    if let Some(cached) = state.cache.get_json::<crate::weather::CurrentWeather>(&key).await {
        return Ok(Json(cached));
    }

    let current = state.weather.current(query.lat, query.lon).await?;
    state.cache.set_json(&key, &current, WEATHER_CACHE_TTL).await;
    Ok(Json(current))
}

pub async fn pollutant_movement(
    State(state): State<AppState>,
    Query(query): Query<LatLonQuery>,
) -> AppResult<Json<Vec<crate::weather::HourlyForecast>>> {
    let key = cache::pollutant_movement_cache_key(query.lat, query.lon);
    if let Some(cached) = state.cache.get_json::<Vec<crate::weather::HourlyForecast>>(&key).await {
        return Ok(Json(cached));
    }

    let forecast = state.weather.next_three_hours(query.lat, query.lon).await?;
    state.cache.set_json(&key, &forecast, POLLUTANT_MOVEMENT_CACHE_TTL).await;
    Ok(Json(forecast))
}

#[derive(Serialize)]
pub struct CombinedAnalysisResponse {
    latitude: f64,
    longitude: f64,
    weather: Option<crate::weather::CurrentWeather>,
    current_upes_score: Option<f64>,
    nearest_pollution_cell: Option<HotspotPoint>,
}

pub async fn combined_analysis(
    State(state): State<AppState>,
    Query(query): Query<LatLonQuery>,
) -> AppResult<Json<CombinedAnalysisResponse>> {
    let weather = state.weather.current(query.lat, query.lon).await.ok();

    let current_upes_score = raster::latest_final_score_path(std::path::Path::new(&state.config.upes_output_base))
        .and_then(|path| raster::read_geotiff(&path).ok())
        .and_then(|grid: RasterGrid| grid.value_at(query.lon, query.lat));

    let candidates = db::recent_severe_cells(&state.pool, 0, ANALYZE_CANDIDATE_LIMIT).await?;
    let nearest_pollution_cell = candidates
        .into_iter()
        .map(|(lat, lon, gas_type, value, severity, timestamp)| {
            let distance_m = raster::haversine_m(query.lat, query.lon, lat, lon);
            HotspotPoint { latitude: lat, longitude: lon, gas_type, pollution_value: value, severity_level: severity, timestamp, distance_km: distance_m / 1000.0 }
        })
        .min_by(|a, b| a.distance_km.partial_cmp(&b.distance_km).unwrap());

    Ok(Json(CombinedAnalysisResponse { latitude: query.lat, longitude: query.lon, weather, current_upes_score, nearest_pollution_cell }))
}

// ---------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------

#[derive(Deserialize)]
pub struct RouteAnalyzeRequest {
    start_lat: f64,
    start_lon: f64,
    end_lat: f64,
    end_lon: f64,
    use_optimized: Option<bool>,
    mode: Option<String>,
    alternatives: Option<u8>,
}

#[derive(Serialize)]
pub struct RouteAnalyzeResponse {
    distance_km: f64,
    mean_exposure: Option<f64>,
    max_exposure: Option<f64>,
    weather_at_midpoint: Option<crate::weather::CurrentWeather>,
    optimized_routes: Option<Vec<crate::routing::RouteResult>>,
}

const ROUTE_ANALYZE_STEP_M: f64 = 50.0;

/// Straight-line exposure estimate, no road-network routing, unless
/// `use_optimized=true` routes this through the graph-based route engine
/// instead (spec.md §6).
pub async fn route_analyze(State(state): State<AppState>, Json(body): Json<RouteAnalyzeRequest>) -> AppResult<Json<RouteAnalyzeResponse>> {
    let distance_km = raster::haversine_m(body.start_lat, body.start_lon, body.end_lat, body.end_lon) / 1000.0;

    let exposure = raster::latest_final_score_path(std::path::Path::new(&state.config.upes_output_base))
        .and_then(|path| raster::read_geotiff(&path).ok())
        .and_then(|grid| raster::sample_upes_along_line(&grid, body.start_lat, body.start_lon, body.end_lat, body.end_lon, ROUTE_ANALYZE_STEP_M));

    let mid_lat = (body.start_lat + body.end_lat) / 2.0;
    let mid_lon = (body.start_lon + body.end_lon) / 2.0;
    let weather_at_midpoint = state.weather.current(mid_lat, mid_lon).await.ok();

    let optimized_routes = if body.use_optimized.unwrap_or(false) {
        let mode = ActivityMode::parse_with_aliases(body.mode.as_deref().unwrap_or("commute"));
        let request = crate::routing::RouteRequest {
            start_lat: body.start_lat,
            start_lon: body.start_lon,
            end_lat: body.end_lat,
            end_lon: body.end_lon,
            mode,
            alternatives: body.alternatives.unwrap_or(0).min(5),
        };
        Some(state.route_engine.optimize(&request, &state.config.upes_output_base).await?)
    } else {
        None
    };

    Ok(Json(RouteAnalyzeResponse {
        distance_km,
        mean_exposure: exposure.map(|(mean, _)| mean),
        max_exposure: exposure.map(|(_, max)| max),
        weather_at_midpoint,
        optimized_routes,
    }))
}

#[derive(Deserialize)]
pub struct RouteOptimizedQuery {
    start_lat: f64,
    start_lon: f64,
    end_lat: f64,
    end_lon: f64,
    mode: Option<String>,
    alternatives: Option<u8>,
}

pub async fn route_optimized(
    State(state): State<AppState>,
    Query(query): Query<RouteOptimizedQuery>,
) -> AppResult<Json<Vec<crate::routing::RouteResult>>> {
    let mode = ActivityMode::parse_with_aliases(query.mode.as_deref().unwrap_or("commute"));
    let alternatives = query.alternatives.unwrap_or(0).min(5);

    let cache_key = cache::route_cache_key(query.start_lat, query.start_lon, query.end_lat, query.end_lon, mode);
    if let Some(cached) = state.cache.get_json::<Vec<crate::routing::RouteResult>>(&cache_key).await {
        return Ok(Json(cached));
    }

    let request = crate::routing::RouteRequest {
        start_lat: query.start_lat,
        start_lon: query.start_lon,
        end_lat: query.end_lat,
        end_lon: query.end_lon,
        mode,
        alternatives,
    };

    let results = state.route_engine.optimize(&request, &state.config.upes_output_base).await?;
    state.cache.set_json(&cache_key, &results, state.config.route_result_cache_ttl).await;
    Ok(Json(results))
}

// ---------------------------------------------------------------------
// Saved routes
// ---------------------------------------------------------------------

#[derive(Serialize)]
pub struct SavedRouteView {
    id: Uuid,
    origin_lat: f64,
    origin_lon: f64,
    destination_lat: f64,
    destination_lon: f64,
    activity_type: ActivityType,
    last_upes_score: Option<f64>,
    last_upes_updated_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<SavedRoute> for SavedRouteView {
    fn from(route: SavedRoute) -> Self {
        SavedRouteView {
            id: route.id,
            origin_lat: route.origin_lat,
            origin_lon: route.origin_lon,
            destination_lat: route.destination_lat,
            destination_lon: route.destination_lon,
            activity_type: route.activity_type,
            last_upes_score: route.last_upes_score,
            last_upes_updated_at: route.last_upes_updated_at,
            created_at: route.created_at,
        }
    }
}

pub async fn list_saved_routes(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> AppResult<Json<Vec<SavedRouteView>>> {
    let routes = db::saved_routes_for_user(&state.pool, user.id).await?;
    Ok(Json(routes.into_iter().map(SavedRouteView::from).collect()))
}

#[derive(Deserialize)]
pub struct CreateSavedRouteRequest {
    origin_lat: f64,
    origin_lon: f64,
    destination_lat: f64,
    destination_lon: f64,
    activity_type: Option<String>,
}

pub async fn create_saved_route(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<CreateSavedRouteRequest>,
) -> AppResult<Json<SavedRouteView>> {
    let mode = ActivityMode::parse_with_aliases(body.activity_type.as_deref().unwrap_or("commute"));
    let route = db::insert_saved_route(
        &state.pool,
        user.id,
        body.origin_lat,
        body.origin_lon,
        body.destination_lat,
        body.destination_lon,
        mode.into(),
    )
    .await?;
    Ok(Json(route.into()))
}

pub async fn delete_saved_route(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(route_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let route = db::get_saved_route(&state.pool, route_id).await?.ok_or_else(|| AppError::not_found("saved route not found"))?;
    if route.user_id != user.id {
        return Err(AppError::forbidden("this route belongs to another user"));
    }

    db::delete_saved_route(&state.pool, route_id, user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------

#[derive(Deserialize)]
pub struct AlertsQuery {
    route_id: Option<Uuid>,
    alert_type: Option<String>,
    days: Option<i64>,
}

const DEFAULT_ALERTS_WINDOW_DAYS: i64 = 7;

pub async fn list_alerts(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<AlertsQuery>,
) -> AppResult<Json<Vec<AlertLog>>> {
    let alert_type = match query.alert_type.as_deref() {
        Some("route_deterioration") => Some(AlertType::RouteDeterioration),
        Some("hazard") => Some(AlertType::Hazard),
        Some("wind_shift") => Some(AlertType::WindShift),
        Some("time_based") => Some(AlertType::TimeBased),
        Some(other) => return Err(AppError::validation(format!("unknown alert_type: {other}"))),
        None => None,
    };

    let days = query.days.unwrap_or(DEFAULT_ALERTS_WINDOW_DAYS).clamp(1, 90);
    let rows = db::alerts_for_user(&state.pool, user.id, query.route_id, alert_type, days).await?;
    Ok(Json(rows))
}

// ---------------------------------------------------------------------
// UPES
// ---------------------------------------------------------------------

#[derive(Serialize)]
pub struct UpesLatestResponse {
    timestamp: DateTime<Utc>,
    satellite_score_path: String,
    final_score_path: String,
    humidity_dispersion_factor: f64,
    wind_factor: f64,
    traffic_factor: f64,
    ema_applied: bool,
    cells_total: usize,
    cells_with_satellite_score: usize,
}

impl From<crate::upes::UpesHourPaths> for UpesLatestResponse {
    fn from(hour: crate::upes::UpesHourPaths) -> Self {
        UpesLatestResponse {
            timestamp: hour.log.timestamp,
            satellite_score_path: hour.satellite_score_path.display().to_string(),
            final_score_path: hour.final_score_path.display().to_string(),
            humidity_dispersion_factor: hour.log.humidity_dispersion_factor,
            wind_factor: hour.log.wind_factor,
            traffic_factor: hour.log.traffic_factor,
            ema_applied: hour.log.ema_applied,
            cells_total: hour.log.cells_total,
            cells_with_satellite_score: hour.log.cells_with_satellite_score,
        }
    }
}

pub async fn upes_latest(State(state): State<AppState>) -> AppResult<Json<UpesLatestResponse>> {
    let base = std::path::Path::new(&state.config.upes_output_base);
    let hour = crate::upes::read_latest(base).ok_or_else(|| AppError::not_found("no UPES run log yet"))?;
    Ok(Json(hour.into()))
}

#[derive(Deserialize)]
pub struct UpesGridQuery {
    timestamp: String,
}

pub async fn upes_grid(State(state): State<AppState>, Query(query): Query<UpesGridQuery>) -> AppResult<Json<UpesLatestResponse>> {
    let timestamp = DateTime::parse_from_rfc3339(&query.timestamp)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(&query.timestamp, "%Y%m%d_%H").map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)))
        .map_err(|_| AppError::validation("timestamp must be RFC3339 or YYYYMMDD_HH"))?;

    let base = std::path::Path::new(&state.config.upes_output_base);
    let hour = crate::upes::read_hour(base, timestamp).ok_or_else(|| AppError::not_found("no UPES run log for that hour"))?;
    Ok(Json(hour.into()))
}

const UPES_HEATMAP_MAX_CELLS: usize = 5000;

/// GeoJSON heatmap of the current UPES final-score raster, subsampled to a
/// bounded number of points for transport (spec.md §6).
pub async fn upes_heatmap(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let Some(path) = raster::latest_final_score_path(std::path::Path::new(&state.config.upes_output_base)) else {
        return Ok(Json(json!({ "type": "FeatureCollection", "features": [] })));
    };

    let grid = raster::read_geotiff(&path).map_err(|e| AppError::internal(e.to_string()))?;
    let stride = heatmap_stride(grid.width, grid.height, UPES_HEATMAP_MAX_CELLS);

    let mut features = Vec::new();
    let mut row = 0usize;
    while row < grid.height {
        let mut col = 0usize;
        while col < grid.width {
            if let Some(score) = grid.get(row, col) {
                let (lon, lat) = grid.pixel_center(row, col);
                features.push(json!({
                    "type": "Feature",
                    "geometry": { "type": "Point", "coordinates": [lon, lat] },
                    "properties": { "score": score },
                }));
            }
            col += stride;
        }
        row += stride;
    }

    Ok(Json(json!({ "type": "FeatureCollection", "features": features })))
}

fn heatmap_stride(width: usize, height: usize, max_cells: usize) -> usize {
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
