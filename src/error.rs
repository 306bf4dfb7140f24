use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application error kinds, mapped to the semantic kinds of the error
/// handling design: Validation, Auth, Forbidden, NotFound, FeatureDisabled,
/// UpstreamTransient, UpstreamFatal, DataMissing, Internal.
#[derive(Error, Debug)]
pub enum AppError {
    /// Database errors.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Cache errors. Consumers should generally prefer the cache module's
    /// "miss on unavailable" fallback over propagating this variant.
    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    /// HTTP request errors talking to an upstream provider.
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing errors.
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed or out-of-range request.
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Invalid or expired credentials.
    #[error("Authentication error: {message}")]
    Auth { message: String },

    /// Resource belongs to another user.
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// Missing resource.
    #[error("Resource not found: {message}")]
    NotFound { message: String },

    /// A feature is administratively disabled (e.g. route optimization).
    #[error("Feature disabled: {message}")]
    FeatureDisabled { message: String },

    /// 429/5xx from an upstream provider, or a network timeout. Retried by
    /// the scheduled task that produced it; surfaced as 502/504 over HTTP.
    #[error("Upstream transient error calling {service}: {message}")]
    UpstreamTransient { service: String, message: String },

    /// A non-retryable 4xx from an upstream provider, or a terminal
    /// "failed"/"canceled" job status.
    #[error("Upstream fatal error calling {service}: {message}")]
    UpstreamFatal { service: String, message: String },

    /// Engines fall back to documented defaults rather than fail when data
    /// is missing; this variant exists for call sites that must surface it.
    #[error("Data missing: {message}")]
    DataMissing { message: String },

    /// Anything unexpected.
    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl AppError {
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn auth<T: Into<String>>(message: T) -> Self {
        Self::Auth { message: message.into() }
    }

    pub fn forbidden<T: Into<String>>(message: T) -> Self {
        Self::Forbidden { message: message.into() }
    }

    pub fn not_found<T: Into<String>>(message: T) -> Self {
        Self::NotFound { message: message.into() }
    }

    pub fn feature_disabled<T: Into<String>>(message: T) -> Self {
        Self::FeatureDisabled { message: message.into() }
    }

    pub fn upstream_transient<T: Into<String>, U: Into<String>>(service: T, message: U) -> Self {
        Self::UpstreamTransient { service: service.into(), message: message.into() }
    }

    pub fn upstream_fatal<T: Into<String>, U: Into<String>>(service: T, message: U) -> Self {
        Self::UpstreamFatal { service: service.into(), message: message.into() }
    }

    pub fn data_missing<T: Into<String>>(message: T) -> Self {
        Self::DataMissing { message: message.into() }
    }

    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal { message: message.into() }
    }

    /// True for errors a scheduled task should retry rather than abandon.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::UpstreamTransient { .. })
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            AppError::Cache(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CACHE_ERROR"),
            AppError::Http(_) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR"),
            AppError::Json(_) => (StatusCode::BAD_REQUEST, "JSON_ERROR"),
            AppError::Validation { .. } => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::Auth { .. } => (StatusCode::UNAUTHORIZED, "AUTH_ERROR"),
            AppError::Forbidden { .. } => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            AppError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::FeatureDisabled { .. } => (StatusCode::SERVICE_UNAVAILABLE, "FEATURE_DISABLED"),
            AppError::UpstreamTransient { .. } => (StatusCode::BAD_GATEWAY, "UPSTREAM_TRANSIENT"),
            AppError::UpstreamFatal { .. } => (StatusCode::BAD_GATEWAY, "UPSTREAM_FATAL"),
            AppError::DataMissing { .. } => (StatusCode::OK, "DATA_MISSING"),
            AppError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        // Internal details never reach the client; the log line carries them.
        let client_message = match status {
            StatusCode::INTERNAL_SERVER_ERROR => "Internal server error".to_string(),
            _ => self.to_string(),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": client_message,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        tracing::error!(error = %self, status_code = %status, error_code, "request failed");

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(AppError::validation("test").into_response().status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::auth("test").into_response().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::forbidden("test").into_response().status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::not_found("test").into_response().status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::feature_disabled("test").into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(AppError::internal("test").into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn retryable_only_for_transient_upstream() {
        assert!(AppError::upstream_transient("weather", "timeout").is_retryable());
        assert!(!AppError::upstream_fatal("weather", "bad request").is_retryable());
    }
}
