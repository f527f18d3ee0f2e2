//! Signature verification for identity-provider webhook deliveries.
//!
//! Deliveries carry three headers: a message id, a unix timestamp and one
//! or more space-separated `v1,{signature}` entries, where
//!
//! ```text
//! signature = base64(HMAC-SHA256(secret, id + "." + timestamp + "." + body))
//! ```
//!
//! Both the `svix-*` and the `webhook-*` header names are accepted.

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::storage::signing::unix_now;

type HmacSha256 = Hmac<Sha256>;

const SECRET_PREFIX: &str = "whsec_";

/// Why a delivery was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookError {
    #[error("missing webhook signature headers")]
    MissingHeaders,

    #[error("malformed webhook timestamp")]
    InvalidTimestamp,

    #[error("webhook timestamp outside the accepted window")]
    Stale,

    #[error("no webhook signature matches")]
    Mismatch,
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "success": false,
            "error": "InvalidWebhook",
            "message": self.to_string(),
        });
        (
            StatusCode::BAD_REQUEST,
            [(header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

/// Verifies webhook deliveries against a shared secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
    tolerance: Duration,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("tolerance", &self.tolerance)
            .finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    /// `secret` is either `whsec_` followed by base64 key bytes, or the raw key.
    pub fn new(secret: &str, tolerance: Duration) -> anyhow::Result<Self> {
        let secret = match secret.strip_prefix(SECRET_PREFIX) {
            Some(encoded) => STANDARD
                .decode(encoded)
                .map_err(|e| anyhow::anyhow!("webhook secret is not valid base64: {e}"))?,
            None => secret.as_bytes().to_vec(),
        };
        if secret.is_empty() {
            anyhow::bail!("webhook secret is empty");
        }
        Ok(Self { secret, tolerance })
    }

    /// Verify a delivery against the current time.
    pub fn verify(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), WebhookError> {
        self.verify_at(headers, body, unix_now())
    }

    /// Verify a delivery as of `now` (unix seconds).
    pub fn verify_at(&self, headers: &HeaderMap, body: &[u8], now: u64) -> Result<(), WebhookError> {
        let id = header_value(headers, "id").ok_or(WebhookError::MissingHeaders)?;
        let timestamp = header_value(headers, "timestamp").ok_or(WebhookError::MissingHeaders)?;
        let signatures = header_value(headers, "signature").ok_or(WebhookError::MissingHeaders)?;

        let sent_at: u64 = timestamp
            .trim()
            .parse()
            .map_err(|_| WebhookError::InvalidTimestamp)?;
        if now.abs_diff(sent_at) > self.tolerance.as_secs() {
            return Err(WebhookError::Stale);
        }

        let expected = self.signature(id, timestamp.trim(), body);
        let matched = signatures
            .split_whitespace()
            .filter_map(|entry| entry.strip_prefix("v1,"))
            .any(|sig| {
                sig.len() == expected.len() && bool::from(sig.as_bytes().ct_eq(expected.as_bytes()))
            });
        if matched {
            Ok(())
        } else {
            Err(WebhookError::Mismatch)
        }
    }

    /// The `v1,{signature}` entry for a delivery.
    pub fn sign(&self, id: &str, timestamp: u64, body: &[u8]) -> String {
        format!("v1,{}", self.signature(id, &timestamp.to_string(), body))
    }

    fn signature(&self, id: &str, timestamp: &str, body: &[u8]) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(id.as_bytes());
        mac.update(b".");
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        STANDARD.encode(mac.finalize().into_bytes())
    }
}

fn header_value<'a>(headers: &'a HeaderMap, field: &str) -> Option<&'a str> {
    ["svix", "webhook"]
        .iter()
        .find_map(|prefix| headers.get(format!("{prefix}-{field}").as_str()))
        .and_then(|v| v.to_str().ok())
}
