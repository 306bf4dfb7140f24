use super::AppState;
use crate::auth;
use crate::error::AppError;
use crate::models::User;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Validates the bearer JWT and loads the user row; unauthenticated requests
/// fail with 401 before the handler body runs.
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::auth("missing authorization header"))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::auth("authorization header must be a bearer token"))?;

        let user_id = auth::verify_token(token, &state.config.secret_key)?;

        let user = crate::db::get_user(&state.pool, user_id)
            .await?
            .ok_or_else(|| AppError::auth("user no longer exists"))?;

        Ok(CurrentUser(user))
    }
}
