//! HMAC-signed read URLs.
//!
//! A signed URL has the form
//! `{base_url}/objects/{path}?expires={unix_secs}&sig={signature}` where
//!
//! ```text
//! signature = base64url(HMAC-SHA256(secret, path + "\n" + expires))
//! ```
//!
//! The server verifies the signature in constant time and rejects the
//! request once `expires` has passed.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;
use thiserror::Error;

use super::backend::AccessDescriptor;

type HmacSha256 = Hmac<Sha256>;

/// Characters left unencoded in a path segment (RFC 3986 unreserved).
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Why a signed read was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// The URL's validity window has passed.
    #[error("signed URL has expired")]
    Expired,
    /// The signature does not match the path and expiry.
    #[error("signature does not match")]
    Mismatch,
}

/// Mints and verifies signed read URLs.
#[derive(Clone)]
pub struct UrlSigner {
    base_url: String,
    secret: Vec<u8>,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl UrlSigner {
    /// Create a signer serving URLs under `base_url`.
    pub fn new(base_url: impl Into<String>, secret: impl AsRef<[u8]>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            secret: secret.as_ref().to_vec(),
        }
    }

    /// Mint a descriptor for `path` valid for `ttl` from now.
    pub fn sign(&self, path: &str, ttl: Duration) -> AccessDescriptor {
        let expires = unix_now().saturating_add(ttl.as_secs());
        self.sign_until(path, expires)
    }

    /// Mint a descriptor for `path` valid until the unix timestamp `expires`.
    pub fn sign_until(&self, path: &str, expires: u64) -> AccessDescriptor {
        let sig = self.signature(path, expires);
        let encoded_path = path
            .split('/')
            .map(|seg| utf8_percent_encode(seg, SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/");
        AccessDescriptor {
            url: format!(
                "{}/objects/{encoded_path}?expires={expires}&sig={sig}",
                self.base_url
            ),
            expires_at: expires,
        }
    }

    /// Verify a signed read against the current time.
    pub fn verify(&self, path: &str, expires: u64, sig: &str) -> Result<(), SignatureError> {
        self.verify_at(path, expires, sig, unix_now())
    }

    /// Verify a signed read as of `now` (unix seconds).
    pub fn verify_at(
        &self,
        path: &str,
        expires: u64,
        sig: &str,
        now: u64,
    ) -> Result<(), SignatureError> {
        let expected = self.signature(path, expires);
        if expected.len() != sig.len() || !bool::from(expected.as_bytes().ct_eq(sig.as_bytes())) {
            return Err(SignatureError::Mismatch);
        }
        if now > expires {
            return Err(SignatureError::Expired);
        }
        Ok(())
    }

    fn signature(&self, path: &str, expires: u64) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(path.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }
}

/// Current time as unix seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
