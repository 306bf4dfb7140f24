//! Optional key/value cache. Mirrors the platform's stance on optional
//! infra: when Redis isn't configured, reads return a miss and writes are
//! no-ops — consumers never have to branch on "is the cache up".

use redis::aio::ConnectionManager;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Clone)]
pub struct Cache {
    inner: Option<Arc<Mutex<ConnectionManager>>>,
}

impl Cache {
    pub async fn connect(redis_url: Option<&str>) -> Self {
        let Some(url) = redis_url else {
            return Self { inner: None };
        };

        match redis::Client::open(url) {
            Ok(client) => match client.get_connection_manager().await {
                Ok(manager) => Self { inner: Some(Arc::new(Mutex::new(manager))) },
                Err(e) => {
                    warn!(error = %e, "failed to connect to redis, running without cache");
                    Self { inner: None }
                }
            },
            Err(e) => {
                warn!(error = %e, "invalid redis url, running without cache");
                Self { inner: None }
            }
        }
    }

    pub fn none() -> Self {
        Self { inner: None }
    }

    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }

    pub async fn get_string(&self, key: &str) -> Option<String> {
        let Some(inner) = &self.inner else { return None };
        let mut conn = inner.lock().await;
        match redis::cmd("GET").arg(key).query_async::<_, Option<String>>(&mut *conn).await {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, key, "cache get failed, treating as miss");
                None
            }
        }
    }

    pub async fn set_string(&self, key: &str, value: &str, ttl_seconds: u64) {
        let Some(inner) = &self.inner else { return };
        let mut conn = inner.lock().await;
        if let Err(e) = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds)
            .query_async::<_, ()>(&mut *conn)
            .await
        {
            warn!(error = %e, key, "cache set failed, continuing without cache write");
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_string(key).await?;
        serde_json::from_str(&raw).ok()
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: u64) {
        if let Ok(raw) = serde_json::to_string(value) {
            self.set_string(key, &raw, ttl_seconds).await;
        }
    }
}

/// Builds the deterministic `route_opt:{a}:{b}:{c}:{d}:{mode}` cache key.
/// Mode is lowercased and trimmed before interpolation (spec.md §6, §8 P4).
pub fn route_cache_key(start_lat: f64, start_lon: f64, end_lat: f64, end_lon: f64, mode: crate::domain::ActivityMode) -> String {
    format!(
        "route_opt:{:.5}:{:.5}:{:.5}:{:.5}:{}",
        start_lat,
        start_lon,
        end_lat,
        end_lon,
        mode.canonical_name()
    )
}

pub const WEATHER_CACHE_TTL: u64 = 600;
pub const POLLUTANT_MOVEMENT_CACHE_TTL: u64 = 600;
pub const TEMPO_LAST_UPDATE_TTL: u64 = 3600;
pub const UPES_LAST_UPDATE_TTL: u64 = 3600;

pub fn weather_cache_key(lat: f64, lon: f64, days: u32) -> String {
    format!("weather:{lat:.4}:{lon:.4}:{days}")
}

pub fn pollutant_movement_cache_key(lat: f64, lon: f64) -> String {
    format!("pollutant_movement:{lat:.4}:{lon:.4}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ActivityMode;

    #[tokio::test]
    async fn unconfigured_cache_misses_and_noops() {
        let cache = Cache::none();
        assert!(cache.get_string("anything").await.is_none());
        cache.set_string("anything", "value", 10).await; // must not panic
        assert!(cache.get_string("anything").await.is_none());
    }

    #[test]
    fn route_key_deterministic_under_mode_aliasing() {
        let a = route_cache_key(34.0, -118.2, 34.1, -118.2, ActivityMode::parse_with_aliases("commute"));
        let b = route_cache_key(34.0, -118.2, 34.1, -118.2, ActivityMode::parse_with_aliases("Commute"));
        let c = route_cache_key(34.0, -118.2, 34.1, -118.2, ActivityMode::parse_with_aliases("  commuter "));
        assert_eq!(a, b);
        assert_eq!(b, c);
    }
}
