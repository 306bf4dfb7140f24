//! Client for the Harmony-style coverages protocol (spec.md §4.1, §6).

use crate::config::Config;
use crate::domain::GasType;
use crate::error::AppError;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{info, warn};

const RETRY_BASE_SECS: u64 = 1;
const RETRY_CAP_SECS: u64 = 30;
const MAX_ATTEMPTS: u32 = 5;
const POLL_INTERVAL_SECS: u64 = 5;
const POLL_TIMEOUT_SECS: u64 = 600;

pub struct HarmonyClient {
    http: Client,
    base: String,
    bearer_token: Option<String>,
    earthdata_username: Option<String>,
    earthdata_password: Option<String>,
    cached_token: Arc<Mutex<Option<String>>>,
}

/// Outcome of one gas-hour fetch.
pub enum FetchOutcome {
    /// Binary raster written to this temp file.
    Raster(std::path::PathBuf),
    /// The provider reported no matching granules for this window; not an
    /// error, just nothing to normalize.
    NoGranules,
}

#[derive(Debug, Deserialize)]
struct JobStatusBody {
    #[serde(default)]
    status: Option<String>,
    #[serde(default, rename = "jobID")]
    job_id: Option<String>,
    #[serde(default)]
    links: Vec<JobLink>,
}

#[derive(Debug, Deserialize)]
struct JobLink {
    href: String,
    #[serde(default)]
    rel: Option<String>,
}

impl HarmonyClient {
    pub fn new(config: &Config) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent("AERIS/1.0 Pollution-Aware Navigation Backend")
            .build()
            .expect("failed to build harmony HTTP client");

        Self {
            http,
            base: config.harmony_base.clone(),
            bearer_token: config.bearer_token.clone(),
            earthdata_username: config.earthdata_username.clone(),
            earthdata_password: config.earthdata_password.clone(),
            cached_token: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns the configured bearer token, or a process-lifetime cached
    /// token obtained by exchanging basic-auth credentials.
    async fn token(&self) -> Result<String, AppError> {
        if let Some(token) = &self.bearer_token {
            return Ok(token.clone());
        }

        let mut cached = self.cached_token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        let (Some(username), Some(password)) = (&self.earthdata_username, &self.earthdata_password) else {
            return Err(AppError::internal("no bearer token or earthdata credentials configured"));
        };

        let response = self
            .http
            .post(format!("{}/oauth/token", self.base))
            .basic_auth(username, Some(password))
            .send()
            .await
            .map_err(|e| AppError::upstream_transient("harmony-auth", e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::upstream_fatal("harmony-auth", format!("status {}", response.status())));
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
        }
        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::upstream_fatal("harmony-auth", e.to_string()))?;

        *cached = Some(parsed.access_token.clone());
        Ok(parsed.access_token)
    }

    fn rangeset_url(&self, gas: GasType, bbox: (f64, f64, f64, f64), start_iso: &str, end_iso: &str) -> String {
        let (west, south, east, north) = bbox;
        format!(
            "{base}/{collection}/ogc-api-coverages/1.0.0/collections/{variable}/coverage/rangeset?subset=lon({west}:{east})&subset=lat({south}:{north})&subset=time(\"{start_iso}\":\"{end_iso}\")&format=image/tiff",
            base = self.base,
            collection = gas.collection_id(),
            variable = gas.variable_path(),
        )
    }

    /// Fetches `gas`'s raster for `[start_iso, end_iso)` over `bbox`, handling
    /// all three documented response shapes and the retry policy.
    pub async fn fetch_gas_raster(
        &self,
        gas: GasType,
        bbox: (f64, f64, f64, f64),
        start_iso: &str,
        end_iso: &str,
    ) -> Result<FetchOutcome, AppError> {
        let url = self.rangeset_url(gas, bbox, start_iso, end_iso);
        let token = self.token().await?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let response = self
                .http
                .get(&url)
                .bearer_auth(&token)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    if attempt >= MAX_ATTEMPTS {
                        return Err(AppError::upstream_transient(gas.to_string(), e.to_string()));
                    }
                    self.backoff(attempt).await;
                    continue;
                }
            };

            let status = response.status();

            if status == StatusCode::BAD_REQUEST {
                let body = response.text().await.unwrap_or_default();
                if body.to_ascii_lowercase().contains("no matching granules") {
                    info!(gas = %gas, "no matching granules for window, treating as empty result");
                    return Ok(FetchOutcome::NoGranules);
                }
                return Err(AppError::upstream_fatal(gas.to_string(), body));
            }

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(AppError::upstream_fatal(gas.to_string(), format!("status {status}")));
            }

            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                if attempt >= MAX_ATTEMPTS {
                    return Err(AppError::upstream_transient(gas.to_string(), format!("status {status} after {attempt} attempts")));
                }
                self.backoff(attempt).await;
                continue;
            }

            if status.is_redirection() {
                if let Some(location) = response.headers().get("location").and_then(|v| v.to_str().ok()) {
                    return self.poll_job(gas, location, &token).await;
                }
                return Err(AppError::upstream_fatal(gas.to_string(), "redirect with no location header"));
            }

            if status.is_success() {
                let content_type = response
                    .headers()
                    .get("content-type")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();

                if content_type.starts_with("application/json") {
                    let body: JobStatusBody = response
                        .json()
                        .await
                        .map_err(|e| AppError::upstream_fatal(gas.to_string(), e.to_string()))?;
                    if let Some(job_id) = body.job_id {
                        let job_url = format!("{}/jobs/{job_id}", self.base);
                        return self.poll_job(gas, &job_url, &token).await;
                    }
                    return Err(AppError::upstream_fatal(gas.to_string(), "json response without jobID"));
                }

                let bytes = response.bytes().await.map_err(|e| AppError::upstream_fatal(gas.to_string(), e.to_string()))?;
                return Ok(FetchOutcome::Raster(self.write_temp_file(gas, &bytes).await?));
            }

            return Err(AppError::upstream_fatal(gas.to_string(), format!("unexpected status {status}")));
        }
    }

    async fn backoff(&self, attempt: u32) {
        let secs = (RETRY_BASE_SECS * 2u64.pow(attempt.saturating_sub(1))).min(RETRY_CAP_SECS);
        sleep(Duration::from_secs(secs)).await;
    }

    async fn poll_job(&self, gas: GasType, job_url: &str, token: &str) -> Result<FetchOutcome, AppError> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(POLL_TIMEOUT_SECS);

        loop {
            let response = self
                .http
                .get(job_url)
                .bearer_auth(token)
                .send()
                .await
                .map_err(|e| AppError::upstream_transient(gas.to_string(), e.to_string()))?;

            if !response.status().is_success() {
                return Err(AppError::upstream_fatal(gas.to_string(), format!("job poll status {}", response.status())));
            }

            let body: JobStatusBody = response
                .json()
                .await
                .map_err(|e| AppError::upstream_fatal(gas.to_string(), e.to_string()))?;

            match body.status.as_deref() {
                Some("successful") | Some("complete") => {
                    let download = body
                        .links
                        .into_iter()
                        .find(|l| l.rel.as_deref() != Some("self"))
                        .ok_or_else(|| AppError::upstream_fatal(gas.to_string(), "no download link in completed job"))?;
                    let bytes = self
                        .http
                        .get(&download.href)
                        .bearer_auth(token)
                        .send()
                        .await
                        .map_err(|e| AppError::upstream_transient(gas.to_string(), e.to_string()))?
                        .bytes()
                        .await
                        .map_err(|e| AppError::upstream_fatal(gas.to_string(), e.to_string()))?;
                    return Ok(FetchOutcome::Raster(self.write_temp_file(gas, &bytes).await?));
                }
                Some("failed") | Some("canceled") => {
                    return Err(AppError::upstream_fatal(gas.to_string(), format!("job {:?} terminated", body.status)));
                }
                _ => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(AppError::upstream_transient(gas.to_string(), "job poll timed out"));
                    }
                    sleep(Duration::from_secs(POLL_INTERVAL_SECS)).await;
                }
            }
        }
    }

    async fn write_temp_file(&self, gas: GasType, bytes: &[u8]) -> Result<std::path::PathBuf, AppError> {
        let path = std::env::temp_dir().join(format!("aeris_{gas}_{}.tif", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| AppError::internal(format!("failed to write temp raster: {e}")))?;
        warn!(gas = %gas, path = %path.display(), "wrote downloaded raster to temp file");
        Ok(path)
    }
}
