//! Spatial DB session glue: pool creation, migrations, and the
//! `pollution_grid` queries shared by ingestion, the UPES engine, and the
//! route/alert engines.

use crate::domain::GasType;
use crate::error::{AppError, AppResult};
use crate::models::{AlertLog, AlertType, SavedRoute, User};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;
use uuid::Uuid;

pub async fn create_pool(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Runs embedded migrations and, best-effort, enables the spatial extension
/// the `pollution_grid.geom` GIST index relies on. Extension init failing
/// (e.g. insufficient privileges) is logged, not fatal — migrations can still
/// proceed against a DB that already has the extension.
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    if let Err(e) = sqlx::query("CREATE EXTENSION IF NOT EXISTS postgis").execute(pool).await {
        tracing::warn!(error = %e, "postgis extension init skipped (best-effort)");
    }

    sqlx::migrate!("./migrations").run(pool).await?;
    info!("migrations applied");
    Ok(())
}

/// Bulk-inserts one normalizer chunk inside a single transaction. A failure
/// aborts only this chunk, per spec.md §4.1.
pub async fn insert_pollution_grid_chunk(
    pool: &PgPool,
    rows: &[crate::ingestion::normalizer::GridCellRow],
) -> AppResult<u64> {
    if rows.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    let mut inserted = 0u64;
    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO pollution_grid (id, timestamp, gas_type, geom, pollution_value, severity_level, created_at)
            VALUES ($1, $2, $3, ST_GeomFromText($4, 4326), $5, $6, now())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(row.timestamp)
        .bind(row.gas_type.to_string())
        .bind(&row.geom_wkt)
        .bind(row.pollution_value)
        .bind(row.severity_level as i16)
        .execute(&mut *tx)
        .await?;
        inserted += 1;
    }
    tx.commit().await?;
    Ok(inserted)
}

/// Latest timestamp committed for a gas, used to take a consistent snapshot
/// per spec.md §5 ("max(timestamp) for each gas").
pub async fn latest_timestamp_for_gas(pool: &PgPool, gas: GasType) -> AppResult<Option<DateTime<Utc>>> {
    let row: Option<(Option<DateTime<Utc>>,)> =
        sqlx::query_as("SELECT max(timestamp) FROM pollution_grid WHERE gas_type = $1")
            .bind(gas.to_string())
            .fetch_optional(pool)
            .await?;
    Ok(row.and_then(|(ts,)| ts))
}


/// Mean `pollution_value` of rows intersecting `cell_wkt`, used by the UPES
/// aggregation step. Returns `None` for an empty cell.
pub async fn mean_value_intersecting(
    pool: &PgPool,
    gas: GasType,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    cell_wkt: &str,
) -> AppResult<Option<f64>> {
    let row: (Option<f64>,) = sqlx::query_as(
        r#"
        SELECT avg(pollution_value)
        FROM pollution_grid
        WHERE gas_type = $1 AND timestamp > $2 AND timestamp <= $3
          AND ST_Intersects(geom, ST_GeomFromText($4, 4326))
        "#,
    )
    .bind(gas.to_string())
    .bind(window_start)
    .bind(window_end)
    .bind(cell_wkt)
    .fetch_one(pool)
    .await
    .map_err(AppError::from)?;
    Ok(row.0)
}

pub async fn insert_netcdf_file(
    pool: &PgPool,
    file_name: &str,
    bucket_path: &str,
    timestamp: DateTime<Utc>,
    gas: GasType,
) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO netcdf_files (id, file_name, bucket_path, timestamp, gas_type) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(Uuid::new_v4())
    .bind(file_name)
    .bind(bucket_path)
    .bind(timestamp)
    .bind(gas.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_user(pool: &PgPool, email: &str, hashed_password: &str) -> AppResult<User> {
    let row = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (id, email, hashed_password)
        VALUES ($1, $2, $3)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(hashed_password)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn update_user_preferences(
    pool: &PgPool,
    user_id: Uuid,
    notification_preferences: Option<serde_json::Value>,
    exposure_sensitivity_level: Option<i16>,
) -> AppResult<User> {
    let row = sqlx::query_as::<_, User>(
        r#"
        UPDATE users
        SET notification_preferences = COALESCE($2, notification_preferences),
            exposure_sensitivity_level = COALESCE($3, exposure_sensitivity_level)
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(notification_preferences)
    .bind(exposure_sensitivity_level)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn insert_saved_route(
    pool: &PgPool,
    user_id: Uuid,
    origin_lat: f64,
    origin_lon: f64,
    destination_lat: f64,
    destination_lon: f64,
    activity_type: crate::models::ActivityType,
) -> AppResult<SavedRoute> {
    let row = sqlx::query_as::<_, SavedRoute>(
        r#"
        INSERT INTO saved_routes (id, user_id, origin_lat, origin_lon, destination_lat, destination_lon, activity_type)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(origin_lat)
    .bind(origin_lon)
    .bind(destination_lat)
    .bind(destination_lon)
    .bind(activity_type)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn saved_routes_for_user(pool: &PgPool, user_id: Uuid) -> AppResult<Vec<SavedRoute>> {
    let rows = sqlx::query_as::<_, SavedRoute>("SELECT * FROM saved_routes WHERE user_id = $1 ORDER BY created_at DESC")
        .bind(user_id)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn get_saved_route(pool: &PgPool, route_id: Uuid) -> AppResult<Option<SavedRoute>> {
    let row = sqlx::query_as::<_, SavedRoute>("SELECT * FROM saved_routes WHERE id = $1")
        .bind(route_id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn delete_saved_route(pool: &PgPool, route_id: Uuid, user_id: Uuid) -> AppResult<bool> {
    let result = sqlx::query("DELETE FROM saved_routes WHERE id = $1 AND user_id = $2")
        .bind(route_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Recent cells at or above `min_severity`, most severe first, for the
/// hotspot / analyze endpoints.
pub async fn recent_severe_cells(
    pool: &PgPool,
    min_severity: i16,
    limit: i64,
) -> AppResult<Vec<(f64, f64, String, f64, i16, DateTime<Utc>)>> {
    let rows = sqlx::query_as(
        r#"
        SELECT ST_Y(ST_Centroid(geom)), ST_X(ST_Centroid(geom)), gas_type, pollution_value, severity_level, timestamp
        FROM pollution_grid
        WHERE severity_level >= $1
        ORDER BY timestamp DESC, severity_level DESC
        LIMIT $2
        "#,
    )
    .bind(min_severity)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn alerts_for_user(
    pool: &PgPool,
    user_id: Uuid,
    route_id: Option<Uuid>,
    alert_type: Option<AlertType>,
    days: i64,
) -> AppResult<Vec<AlertLog>> {
    let window_start = Utc::now() - chrono::Duration::days(days);
    let rows = sqlx::query_as::<_, AlertLog>(
        r#"
        SELECT * FROM alert_log
        WHERE user_id = $1
          AND ($2::uuid IS NULL OR route_id = $2)
          AND ($3::text IS NULL OR alert_type = $3)
          AND created_at >= $4
        ORDER BY created_at DESC
        "#,
    )
    .bind(user_id)
    .bind(route_id)
    .bind(alert_type.map(|a| a.as_str()))
    .bind(window_start)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn all_saved_routes(pool: &PgPool) -> AppResult<Vec<SavedRoute>> {
    let rows = sqlx::query_as::<_, SavedRoute>("SELECT * FROM saved_routes").fetch_all(pool).await?;
    Ok(rows)
}

pub async fn get_user(pool: &PgPool, user_id: Uuid) -> AppResult<Option<User>> {
    let row = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1").bind(user_id).fetch_optional(pool).await?;
    Ok(row)
}

pub async fn get_user_by_email(pool: &PgPool, email: &str) -> AppResult<Option<User>> {
    let row = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1").bind(email).fetch_optional(pool).await?;
    Ok(row)
}

pub async fn insert_route_exposure_history(
    pool: &PgPool,
    route_id: Uuid,
    timestamp: DateTime<Utc>,
    upes_score: f64,
    max_upes_along_route: f64,
    score_source: &str,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO route_exposure_history (id, route_id, timestamp, upes_score, max_upes_along_route, score_source)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(route_id)
    .bind(timestamp)
    .bind(upes_score)
    .bind(max_upes_along_route)
    .bind(score_source)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn update_saved_route_last_upes(pool: &PgPool, route_id: Uuid, upes_score: f64, updated_at: DateTime<Utc>) -> AppResult<()> {
    sqlx::query("UPDATE saved_routes SET last_upes_score = $1, last_upes_updated_at = $2 WHERE id = $3")
        .bind(upes_score)
        .bind(updated_at)
        .bind(route_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// The two most recent `route_exposure_history` rows for `route_id`,
/// newest first: `(current, previous)`.
pub async fn latest_two_history_rows(
    pool: &PgPool,
    route_id: Uuid,
) -> AppResult<(Option<crate::models::RouteExposureHistory>, Option<crate::models::RouteExposureHistory>)> {
    let rows = sqlx::query_as::<_, crate::models::RouteExposureHistory>(
        "SELECT * FROM route_exposure_history WHERE route_id = $1 ORDER BY timestamp DESC LIMIT 2",
    )
    .bind(route_id)
    .fetch_all(pool)
    .await?;

    let mut iter = rows.into_iter();
    let current = iter.next();
    let previous = iter.next();
    Ok((current, previous))
}

/// Minimum `upes_score` over the last 24 hours of history for `route_id`.
pub async fn min_upes_last_24h(pool: &PgPool, route_id: Uuid, now: DateTime<Utc>) -> AppResult<Option<f64>> {
    let window_start = now - chrono::Duration::hours(24);
    let row: (Option<f64>,) = sqlx::query_as(
        "SELECT min(upes_score) FROM route_exposure_history WHERE route_id = $1 AND timestamp >= $2",
    )
    .bind(route_id)
    .bind(window_start)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

/// Centroid (lat, lon) and value of the highest-pollution cell intersecting
/// `bbox_wkt` within the last hour, across all gases. Used as the "source
/// point" for the wind-shift check; `None` means skip that check.
pub async fn highest_pollution_cell_in_bbox(
    pool: &PgPool,
    bbox_wkt: &str,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> AppResult<Option<(f64, f64, f64)>> {
    let row: Option<(f64, f64, f64)> = sqlx::query_as(
        r#"
        SELECT ST_Y(ST_Centroid(geom)), ST_X(ST_Centroid(geom)), pollution_value
        FROM pollution_grid
        WHERE timestamp > $1 AND timestamp <= $2
          AND ST_Intersects(geom, ST_GeomFromText($3, 4326))
        ORDER BY pollution_value DESC
        LIMIT 1
        "#,
    )
    .bind(window_start)
    .bind(window_end)
    .bind(bbox_wkt)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn insert_alert_log(
    pool: &PgPool,
    user_id: Uuid,
    route_id: Uuid,
    alert_type: AlertType,
    score_before: f64,
    score_after: f64,
    threshold: f64,
    alert_metadata: serde_json::Value,
    notified_channels: &[String],
) -> AppResult<AlertLog> {
    let row = sqlx::query_as::<_, AlertLog>(
        r#"
        INSERT INTO alert_log (id, user_id, route_id, alert_type, score_before, score_after, threshold, metadata, notified_channels, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(route_id)
    .bind(alert_type)
    .bind(score_before)
    .bind(score_after)
    .bind(threshold)
    .bind(alert_metadata)
    .bind(notified_channels)
    .fetch_one(pool)
    .await?;
    Ok(row)
}
