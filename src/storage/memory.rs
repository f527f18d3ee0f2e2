//! In-memory object store.
//!
//! Objects are held in a `tokio::sync::RwLock<HashMap<...>>`.  A
//! configurable limit (`max_size_bytes`) caps total stored bytes.  Used
//! for tests and ephemeral deployments; signed reads are served by the
//! process itself through the shared [`UrlSigner`].

use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use super::backend::{AccessDescriptor, ObjectStore, StoredObject};
use super::signing::UrlSigner;

/// In-memory object store.
pub struct MemoryBackend {
    /// path -> (data, content type).
    objects: tokio::sync::RwLock<HashMap<String, (Bytes, String)>>,
    /// Current total bytes stored.
    current_size: tokio::sync::RwLock<u64>,
    /// Maximum bytes allowed.  0 means unlimited.
    max_size_bytes: u64,
    signer: UrlSigner,
}

impl MemoryBackend {
    /// Create an unbounded in-memory store.
    pub fn new(signer: UrlSigner) -> Self {
        Self::with_limit(signer, 0)
    }

    /// Create an in-memory store capped at `max_size_bytes` (0 = unlimited).
    pub fn with_limit(signer: UrlSigner, max_size_bytes: u64) -> Self {
        Self {
            objects: tokio::sync::RwLock::new(HashMap::new()),
            current_size: tokio::sync::RwLock::new(0),
            max_size_bytes,
            signer,
        }
    }

    /// Number of stored objects.
    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Whether the store holds no objects.
    #[cfg(test)]
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    /// Check whether adding `additional` bytes would exceed the limit.
    async fn check_capacity(&self, additional: u64) -> anyhow::Result<()> {
        if self.max_size_bytes == 0 {
            return Ok(());
        }
        let current = *self.current_size.read().await;
        if current + additional > self.max_size_bytes {
            anyhow::bail!(
                "Memory limit exceeded: current={current}, additional={additional}, max={}",
                self.max_size_bytes
            );
        }
        Ok(())
    }

    /// Adjust the tracked size by a signed delta.
    async fn adjust_size(&self, delta: i64) {
        let mut size = self.current_size.write().await;
        if delta >= 0 {
            *size = size.saturating_add(delta as u64);
        } else {
            *size = size.saturating_sub((-delta) as u64);
        }
    }
}

impl ObjectStore for MemoryBackend {
    fn put(
        &self,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let path = path.to_string();
        let content_type = content_type.to_string();
        Box::pin(async move {
            let new_len = data.len() as u64;
            let old_len = {
                let objects = self.objects.read().await;
                objects.get(&path).map(|(d, _)| d.len() as u64)
            };

            let delta = new_len as i64 - old_len.unwrap_or(0) as i64;
            if delta > 0 {
                self.check_capacity(delta as u64).await?;
            }

            {
                let mut objects = self.objects.write().await;
                objects.insert(path, (data, content_type));
            }
            self.adjust_size(delta).await;
            Ok(())
        })
    }

    fn get(
        &self,
        path: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<StoredObject>> + Send + '_>> {
        let path = path.to_string();
        Box::pin(async move {
            let objects = self.objects.read().await;
            match objects.get(&path) {
                Some((data, content_type)) => Ok(StoredObject {
                    data: data.clone(),
                    content_type: content_type.clone(),
                }),
                None => anyhow::bail!("Object not found at path: {path}"),
            }
        })
    }

    fn delete(
        &self,
        path: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let path = path.to_string();
        Box::pin(async move {
            let mut objects = self.objects.write().await;
            if let Some((data, _)) = objects.remove(&path) {
                drop(objects);
                self.adjust_size(-(data.len() as i64)).await;
            }
            Ok(())
        })
    }

    fn signed_read(
        &self,
        path: &str,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<AccessDescriptor>> + Send + '_>> {
        let path = path.to_string();
        Box::pin(async move {
            if !self.objects.read().await.contains_key(&path) {
                anyhow::bail!("Cannot sign missing object: {path}");
            }
            Ok(self.signer.sign(&path, ttl))
        })
    }
}
