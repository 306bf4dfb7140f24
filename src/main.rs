use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod alerts;
mod auth;
mod cache;
mod config;
mod db;
mod domain;
mod error;
mod http;
mod ingestion;
mod models;
mod object_store;
mod raster;
mod routing;
mod scheduler;
mod upes;
mod weather;

use config::Config;
use routing::RouteEngine;

#[tokio::main]
async fn main() -> Result<()> {
    let file_appender = tracing_appender::rolling::daily("./logs", "aeris.log");
    let (non_blocking_file, _log_guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aeris=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking_file).with_ansi(false))
        .init();

    let config = Arc::new(Config::load()?);
    info!("configuration loaded");

    let pool = db::create_pool(&config.database_url, config.max_connections).await?;
    db::run_migrations(&pool).await?;
    info!("database ready");

    let cache = cache::Cache::connect(config.redis_url.as_deref()).await;
    let object_store = object_store::ObjectStore::connect(&config).await;
    let weather = weather::WeatherClient::new(config.weather_api_base.clone(), config.weather_api_key.clone());
    let route_engine = Arc::new(RouteEngine::new(&config));

    let scheduler_handle = scheduler::spawn(pool.clone(), cache.clone(), object_store.clone(), weather.clone(), config.clone());
    info!("scheduler started");

    let state = http::AppState {
        pool,
        cache,
        object_store,
        weather,
        route_engine,
        config: config.clone(),
    };

    let app = http::build_router(state);

    let addr = format!("{}:{}", config.api_host, config.api_port);
    let listener = TcpListener::bind(&addr).await?;

    info!("AERIS pollution-aware navigation backend");
    info!("server listening on {}", addr);
    info!("health check available at http://{}/health", addr);

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    scheduler_handle.abort();
    info!("shutdown complete");

    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM — whichever arrives first.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
