//! Caller identity resolution.
//!
//! The authentication provider is a black box that yields a stable user
//! id per request.  Two resolvers are provided: HS256 bearer tokens
//! verified with a shared secret, and a trusted header set by an
//! upstream proxy.

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;

use crate::config::AuthConfig;

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Identity {
    /// Stable opaque user id.
    pub user_id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl Identity {
    /// An identity carrying only a user id.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }
}

/// Why no identity could be resolved.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Authentication required")]
    Missing,

    #[error("Invalid credentials: {0}")]
    Invalid(String),
}

impl IntoResponse for IdentityError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "success": false,
            "error": "Unauthorized",
            "message": self.to_string(),
        });
        (
            StatusCode::UNAUTHORIZED,
            [(header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

/// Maps request headers to a caller identity.
pub trait IdentityResolver: Send + Sync + 'static {
    fn resolve(&self, headers: &HeaderMap) -> Result<Identity, IdentityError>;
}

/// Build the resolver selected by `auth.mode`.
pub fn resolver_from_config(
    config: &AuthConfig,
) -> anyhow::Result<std::sync::Arc<dyn IdentityResolver>> {
    match config.mode.as_str() {
        "jwt" => Ok(std::sync::Arc::new(JwtIdentityResolver::new(
            &config.jwt_secret,
            config.issuer.as_deref(),
            config.audience.as_deref(),
        ))),
        "trusted_header" => Ok(std::sync::Arc::new(TrustedHeaderResolver::new(
            &config.user_header,
        )?)),
        other => anyhow::bail!("Unknown auth mode: {other}"),
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    given_name: Option<String>,
    #[serde(default)]
    family_name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

/// Verifies `Authorization: Bearer <jwt>` with an HS256 shared secret.
pub struct JwtIdentityResolver {
    key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityResolver {
    pub fn new(secret: &str, issuer: Option<&str>, audience: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(iss) = issuer {
            validation.set_issuer(&[iss]);
        }
        match audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

impl IdentityResolver for JwtIdentityResolver {
    fn resolve(&self, headers: &HeaderMap) -> Result<Identity, IdentityError> {
        let value = headers
            .get(header::AUTHORIZATION)
            .ok_or(IdentityError::Missing)?
            .to_str()
            .map_err(|_| IdentityError::Invalid("non-ASCII authorization header".into()))?;
        let token = value
            .strip_prefix("Bearer ")
            .ok_or_else(|| IdentityError::Invalid("expected a bearer token".into()))?;

        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| IdentityError::Invalid(e.to_string()))?;
        let claims = data.claims;
        if claims.sub.is_empty() {
            return Err(IdentityError::Invalid("empty subject".into()));
        }

        Ok(Identity {
            user_id: claims.sub,
            email: claims.email,
            first_name: claims.given_name,
            last_name: claims.family_name,
            avatar_url: claims.picture,
        })
    }
}

/// Reads the user id from a header set by a trusted upstream proxy.
pub struct TrustedHeaderResolver {
    header: header::HeaderName,
}

impl TrustedHeaderResolver {
    pub fn new(header: &str) -> anyhow::Result<Self> {
        Ok(Self {
            header: header::HeaderName::from_bytes(header.as_bytes())?,
        })
    }
}

impl IdentityResolver for TrustedHeaderResolver {
    fn resolve(&self, headers: &HeaderMap) -> Result<Identity, IdentityError> {
        let user_id = headers
            .get(&self.header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(IdentityError::Missing)?;
        Ok(Identity::new(user_id))
    }
}
