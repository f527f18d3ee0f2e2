//! Abstract object store trait.
//!
//! Every storage backend must implement [`ObjectStore`].  Objects are
//! addressed by a stable path; callers never persist the time-limited
//! [`AccessDescriptor`] minted by [`ObjectStore::signed_read`], only the
//! path it was minted for.

use bytes::Bytes;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// A stored object's data plus its content type.
#[derive(Debug, Clone)]
pub struct StoredObject {
    /// Raw bytes of the object.
    pub data: Bytes,
    /// MIME type recorded at write time (or inferred from the path).
    pub content_type: String,
}

/// Time-limited read access to a single stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessDescriptor {
    /// Signed URL granting read access until `expires_at`.
    pub url: String,
    /// Unix timestamp (seconds) after which the URL is rejected.
    pub expires_at: u64,
}

/// Async object storage contract.
///
/// Each call is atomic on its own; there is no multi-call transaction.
pub trait ObjectStore: Send + Sync + 'static {
    /// Write `data` at `path`, replacing any previous object.
    fn put(
        &self,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Read the full object at `path`.
    fn get(
        &self,
        path: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<StoredObject>> + Send + '_>>;

    /// Delete the object at `path`.  Deleting a missing object succeeds.
    fn delete(
        &self,
        path: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Mint a fresh access descriptor for `path`, valid for `ttl`.
    fn signed_read(
        &self,
        path: &str,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<AccessDescriptor>> + Send + '_>>;
}

/// MIME type for an object path, from its extension.
///
/// Only the two accepted image types are recognized; anything else is
/// served as an opaque byte stream.
pub fn content_type_for_path(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        _ => "application/octet-stream",
    }
}
