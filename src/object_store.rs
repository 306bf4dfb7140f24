//! Optional S3-compatible object storage. When unconfigured, ingestion
//! skips the audit upload and the NetCDF/GeoTIFF resolver falls back to a
//! local filesystem directory (spec.md §4.7).

use crate::config::Config;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::path::Path;
use tracing::{info, warn};

#[derive(Clone)]
pub struct ObjectStore {
    client: Option<Client>,
    bucket: Option<String>,
    local_fallback_dir: std::path::PathBuf,
}

impl ObjectStore {
    pub async fn connect(config: &Config) -> Self {
        let local_fallback_dir = std::path::PathBuf::from(&config.upes_output_base).join("local_blobs");

        if !config.has_object_storage() {
            return Self { client: None, bucket: None, local_fallback_dir };
        }

        let mut loader = aws_config::from_env();
        if let Some(region) = &config.aws_region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let shared_config = loader.load().await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if let Some(endpoint) = &config.object_storage_endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint.clone());
        }
        let client = Client::from_conf(s3_config_builder.build());

        Self {
            client: Some(client),
            bucket: config.object_storage_bucket.clone(),
            local_fallback_dir,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    /// Uploads `bytes` under `key`. Returns `Ok(None)` (not an error) when
    /// object storage isn't configured, per the "skip audit upload" fallback.
    pub async fn put_object(&self, key: &str, bytes: Vec<u8>) -> anyhow::Result<Option<String>> {
        let (Some(client), Some(bucket)) = (&self.client, &self.bucket) else {
            return Ok(None);
        };

        client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .send()
            .await?;

        info!(bucket, key, "uploaded object");
        Ok(Some(format!("s3://{bucket}/{key}")))
    }

    /// Reads a local-filesystem fallback copy of a blob previously written
    /// under `audit/...` when object storage wasn't configured.
    pub async fn read_local_fallback(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        let path = self.local_fallback_dir.join(key);
        Ok(tokio::fs::read(&path).await?)
    }

    pub async fn write_local_fallback(&self, key: &str, bytes: &[u8]) -> anyhow::Result<()> {
        let path = self.local_fallback_dir.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    /// Uploads to S3 when configured, otherwise writes to the local
    /// fallback directory. Never returns an error for "not configured".
    pub async fn upload_or_fallback(&self, key: &str, bytes: Vec<u8>) -> anyhow::Result<()> {
        if self.is_configured() {
            if let Err(e) = self.put_object(key, bytes.clone()).await {
                warn!(error = %e, key, "object storage upload failed, writing local fallback");
                self.write_local_fallback(key, &bytes).await?;
            }
        } else {
            self.write_local_fallback(key, &bytes).await?;
        }
        Ok(())
    }
}

/// `audit/geotiff/YYYY-MM-DD/{gas}_HH.tif`, per spec.md §6.
pub fn audit_geotiff_key(gas: crate::domain::GasType, timestamp: chrono::DateTime<chrono::Utc>) -> String {
    format!(
        "audit/geotiff/{}/{}_{:02}.tif",
        timestamp.format("%Y-%m-%d"),
        gas,
        timestamp.format("%H").to_string().parse::<u32>().unwrap_or(0)
    )
}

pub fn is_local_path(path: &str) -> bool {
    !Path::new(path).starts_with("s3://")
}
