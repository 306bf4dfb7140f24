//! HTTP surface (spec.md §4.6, §6). Stateless handlers over shared process
//! state; each request opens a scoped DB session off the shared pool.

mod extractor;
mod handlers;

pub use extractor::CurrentUser;

use crate::cache::Cache;
use crate::config::Config;
use crate::object_store::ObjectStore;
use crate::routing::RouteEngine;
use crate::weather::WeatherClient;
use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::{Any, CorsLayer}, trace::TraceLayer};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub cache: Cache,
    pub object_store: ObjectStore,
    pub weather: WeatherClient,
    pub route_engine: Arc<RouteEngine>,
    pub config: Arc<Config>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/auth/register", post(handlers::register))
        .route("/auth/login", post(handlers::login))
        .route("/auth/me", get(handlers::get_me).patch(handlers::patch_me))
        .route("/api/analyze", post(handlers::analyze))
        .route("/api/hotspots", get(handlers::hotspots))
        .route("/api/weather", get(handlers::weather))
        .route("/api/pollutant_movement", get(handlers::pollutant_movement))
        .route("/api/combined_analysis", get(handlers::combined_analysis))
        .route("/api/route/analyze", post(handlers::route_analyze))
        .route("/api/route/optimized", get(handlers::route_optimized).post(handlers::route_optimized))
        .route(
            "/api/saved-routes",
            get(handlers::list_saved_routes).post(handlers::create_saved_route),
        )
        .route("/api/saved-routes/:id", axum::routing::delete(handlers::delete_saved_route))
        .route("/api/alerts", get(handlers::list_alerts))
        .route("/api/upes/latest", get(handlers::upes_latest))
        .route("/api/upes/grid", get(handlers::upes_grid))
        .route("/api/upes/heatmap", get(handlers::upes_heatmap))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
                        .allow_headers(Any),
                ),
        )
        .with_state(state)
}
