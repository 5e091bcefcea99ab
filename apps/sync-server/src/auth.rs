//! JWT authentication.
//!
//! Registers send `Authorization: Bearer <token>`; the token is an HS256
//! JWT carrying the cashier's identity.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};
use crate::AppState;

/// JWT claims structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: String,
    pub email: String,
    pub role: String,

    /// Expiration (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,
}

/// JWT token manager.
#[derive(Clone)]
pub struct JwtManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    lifetime_secs: i64,
}

impl JwtManager {
    pub fn new(secret: &str, lifetime_secs: i64) -> Self {
        JwtManager {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            lifetime_secs,
        }
    }

    /// Issues a token for a cashier.
    pub fn issue(&self, user_id: &str, email: &str, role: &str) -> ServerResult<String> {
        let now = Utc::now();
        let claims = Claims {
            user_id: user_id.to_string(),
            email: email.to_string(),
            role: role.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(self.lifetime_secs)).timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| ServerError::Internal(format!("Failed to generate token: {}", e)))
    }

    /// Validates signature and expiry.
    pub fn validate(&self, token: &str) -> ServerResult<Claims> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| ServerError::AuthFailed(format!("Invalid token: {}", e)))
    }
}

/// Extract bearer token from authorization header.
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Authenticated caller, extracted from the bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Claims);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ServerError::AuthFailed("Missing authorization header".to_string()))?;

        let token = extract_bearer_token(header)
            .ok_or_else(|| ServerError::AuthFailed("Invalid authorization header".to_string()))?;

        state.jwt.validate(token).map(AuthUser)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jwt_roundtrip() {
        let manager = JwtManager::new("test-secret", 3600);
        let token = manager.issue("cashier-1", "caja1@minisuper.local", "CASHIER").unwrap();

        let claims = manager.validate(&token).unwrap();
        assert_eq!(claims.user_id, "cashier-1");
        assert_eq!(claims.role, "CASHIER");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = JwtManager::new("one", 3600)
            .issue("cashier-1", "a@b.c", "CASHIER")
            .unwrap();

        let result = JwtManager::new("two", 3600).validate(&token);
        assert!(matches!(result, Err(ServerError::AuthFailed(_))));
    }

    #[test]
    fn test_expired_token_rejected() {
        // Beyond the default 60s leeway.
        let manager = JwtManager::new("test-secret", -120);
        let token = manager.issue("cashier-1", "a@b.c", "CASHIER").unwrap();
        assert!(manager.validate(&token).is_err());
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(extract_bearer_token("Bearer "), None);
        assert_eq!(extract_bearer_token("Basic abc"), None);
    }
}
