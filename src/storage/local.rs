//! Local filesystem storage backend.
//!
//! Objects are stored as flat files under a configurable root directory.
//! The object path is used directly as a relative path
//! (e.g., "screenshots/3fa1c29e0b7d/1718000000000.png").  The content type
//! is not persisted; it is inferred from the extension on read.
//!
//! All writes follow crash-only design: write to temp file, fsync, rename.

use bytes::Bytes;
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use super::backend::{content_type_for_path, AccessDescriptor, ObjectStore, StoredObject};
use super::signing::UrlSigner;

/// Stores objects on the local filesystem.
pub struct LocalBackend {
    /// Root directory for all stored objects.
    root: PathBuf,
    signer: UrlSigner,
}

impl LocalBackend {
    /// Create a new `LocalBackend` rooted at `root`.
    ///
    /// The directory will be created if it does not exist.
    pub fn new(root: impl Into<PathBuf>, signer: UrlSigner) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        // Also create the .tmp directory for atomic writes.
        std::fs::create_dir_all(root.join(".tmp"))?;
        Ok(Self { root, signer })
    }

    /// Resolve an object path to an absolute file path.
    ///
    /// Rejects absolute paths and `..` components, and for existing files
    /// checks that the canonical path stays within the root directory.
    fn resolve(&self, object_path: &str) -> anyhow::Result<PathBuf> {
        for component in std::path::Path::new(object_path).components() {
            match component {
                std::path::Component::Normal(_) | std::path::Component::CurDir => {}
                _ => anyhow::bail!("Path traversal detected in object path: {}", object_path),
            }
        }
        let path = self.root.join(object_path);
        if path.exists() {
            let canonical_root = self.root.canonicalize().unwrap_or_else(|_| self.root.clone());
            let canonical_path = path.canonicalize()?;
            if !canonical_path.starts_with(&canonical_root) {
                anyhow::bail!("Path traversal detected in object path: {}", object_path);
            }
        }
        Ok(path)
    }

    /// Generate a temp file path under .tmp/ for atomic writes.
    fn temp_path(&self) -> PathBuf {
        let id = uuid::Uuid::new_v4();
        self.root.join(".tmp").join(format!("tmp-{}", id))
    }
}

impl ObjectStore for LocalBackend {
    fn put(
        &self,
        path: &str,
        data: Bytes,
        _content_type: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let path = path.to_string();
        Box::pin(async move {
            let final_path = self.resolve(&path)?;

            // Ensure parent directory exists (handles paths with '/' separators).
            if let Some(parent) = final_path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            // Crash-only: temp-fsync-rename pattern.
            let tmp_path = self.temp_path();
            if let Some(parent) = tmp_path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(&data)?;
            file.sync_all()?;

            std::fs::rename(&tmp_path, &final_path)?;
            Ok(())
        })
    }

    fn get(
        &self,
        path: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<StoredObject>> + Send + '_>> {
        let path = path.to_string();
        Box::pin(async move {
            let file_path = self.resolve(&path)?;
            if !file_path.is_file() {
                anyhow::bail!("Object not found at path: {}", path);
            }

            let data = Bytes::from(std::fs::read(&file_path)?);
            Ok(StoredObject {
                data,
                content_type: content_type_for_path(&path).to_string(),
            })
        })
    }

    fn delete(
        &self,
        path: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let path = path.to_string();
        Box::pin(async move {
            let file_path = self.resolve(&path)?;

            // Idempotent: if the file doesn't exist, that's fine.
            if file_path.exists() {
                std::fs::remove_file(&file_path)?;
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
            let file_path = self.resolve(&path)?;
            if !file_path.is_file() {
                anyhow::bail!("Cannot sign missing object: {}", path);
            }
            Ok(self.signer.sign(&path, ttl))
        })
    }
}
