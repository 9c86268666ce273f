use std::sync::Arc;

use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};

use crate::auth::jwt::{self, TokenSettings};
use crate::error::ApiError;
use crate::presence::{Identity, Role};

/// JWT claims extracted from Authorization: Bearer header.
/// Implements axum's FromRequestParts for use as an extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: String,
    /// Login name. Tokens without one are valid but anonymous on the hub.
    #[serde(default)]
    pub username: Option<String>,
    /// "Admin" or "Customer"; absent means Customer
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub email: String,
    pub iss: String,
    pub aud: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    pub fn role(&self) -> Role {
        Role::from_claim(self.role.as_deref())
    }

    /// Hub identity, or `None` when the token carries no username.
    pub fn identity(&self) -> Option<Identity> {
        Identity::from_claims(self.username.as_deref(), self.role.as_deref())
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.role().is_admin() {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }
}

impl<S> FromRequestParts<S> for Claims
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let unauthorized = || ApiError::Unauthorized("Missing or invalid token".to_string());

        let token = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(unauthorized)?;

        // Token settings are placed in request extensions by the router layer
        let settings = parts
            .extensions
            .get::<Arc<TokenSettings>>()
            .ok_or_else(|| ApiError::Internal("token settings missing".to_string()))?;

        jwt::validate_access_token(settings, token).map_err(|_| unauthorized())
    }
}
