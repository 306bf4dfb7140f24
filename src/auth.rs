//! JWT issuance/verification and password hashing (SPEC_FULL.md §B).

use crate::error::AppError;
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub exp: i64,
    pub iat: i64,
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::internal(format!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, hashed: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hashed) else { return false };
    Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
}

pub fn issue_token(user_id: Uuid, secret_key: &str, expire_minutes: i64) -> Result<String, AppError> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now.timestamp(),
        exp: (now + Duration::minutes(expire_minutes)).timestamp(),
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret_key.as_bytes()))
        .map_err(|e| AppError::internal(format!("token issuance failed: {e}")))
}

pub fn verify_token(token: &str, secret_key: &str) -> Result<Uuid, AppError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret_key.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::auth("invalid or expired token"))?;

    Uuid::parse_str(&data.claims.sub).map_err(|_| AppError::auth("malformed token subject"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_roundtrip() {
        let hashed = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password("correct horse battery staple", &hashed));
        assert!(!verify_password("wrong password", &hashed));
    }

    #[test]
    fn token_roundtrip() {
        let user_id = Uuid::new_v4();
        let token = issue_token(user_id, "a_very_long_secret_key_for_testing_only", 60).unwrap();
        let decoded = verify_token(&token, "a_very_long_secret_key_for_testing_only").unwrap();
        assert_eq!(decoded, user_id);
    }

    #[test]
    fn token_rejected_with_wrong_secret() {
        let user_id = Uuid::new_v4();
        let token = issue_token(user_id, "secret_a_long_enough_for_testing", 60).unwrap();
        assert!(verify_token(&token, "a_totally_different_secret_value").is_err());
    }
}
