//! Upload workflow: validate a screenshot, store it, and open a project.
//!
//! Steps, each acknowledged before the next:
//!
//! 1. put the bytes at an anonymized path
//! 2. mint an access descriptor for the immediate response
//! 3. read or create the caller's profile
//! 4. insert the project with `status = active`
//!
//! A failure after step 1 deletes the object; a failure in step 4 also
//! deletes the profile if step 3 created it.  A pre-existing profile is
//! never deleted.

use bytes::Bytes;
use metrics::counter;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use super::saga::Compensations;
use super::Workflows;
use crate::errors::{InputError, WorkflowError};
use crate::identity::Identity;
use crate::metadata::store::{now_timestamp, ProjectRecord, ProjectStatus};
use crate::metrics::UPLOADS_TOTAL;
use crate::storage::backend::AccessDescriptor;

/// An uploaded file as received from the caller.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file: Bytes,
    /// Declared MIME type.
    pub content_type: String,
    /// Declared file name, if the client sent one.
    pub file_name: Option<String>,
}

/// Result of a successful upload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOutcome {
    pub project_id: String,
    /// Stable object path recorded on the project.
    pub image_path: String,
    /// Short-lived read access for immediate preview.
    pub access: AccessDescriptor,
}

/// Accepted upload, normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AcceptedFile {
    pub mime: &'static str,
    pub extension: &'static str,
}

/// Check MIME type, then size, then file-name extension.
pub(crate) fn validate_upload(
    size: u64,
    content_type: &str,
    file_name: Option<&str>,
    max_bytes: u64,
) -> Result<AcceptedFile, InputError> {
    if size == 0 {
        return Err(InputError::MissingField("file"));
    }

    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let accepted = match mime.as_str() {
        "image/png" => AcceptedFile {
            mime: "image/png",
            extension: "png",
        },
        "image/jpeg" => AcceptedFile {
            mime: "image/jpeg",
            extension: "jpg",
        },
        _ => return Err(InputError::UnsupportedMediaType(content_type.to_string())),
    };

    if size > max_bytes {
        return Err(InputError::TooLarge {
            size,
            max: max_bytes,
        });
    }

    let declared_ext = file_name
        .map(|name| name.rsplit(['/', '\\']).next().unwrap_or(name))
        .and_then(|base| base.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());
    if let Some(ext) = declared_ext {
        let matches = ext == accepted.extension || (accepted.mime == "image/jpeg" && ext == "jpeg");
        if !matches {
            return Err(InputError::InvalidExtension {
                extension: ext,
                mime: accepted.mime.to_string(),
            });
        }
    }

    Ok(accepted)
}

/// First 12 hex characters of SHA-256 over the user id.
pub(crate) fn user_hash(user_id: &str) -> String {
    let digest = Sha256::digest(user_id.as_bytes());
    hex::encode(digest)[..12].to_string()
}

/// Wall-clock milliseconds, strictly increasing across calls in this process.
fn next_millis() -> u64 {
    static LAST: AtomicU64 = AtomicU64::new(0);
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    let prev = LAST
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or(now);
    now.max(prev + 1)
}

/// `{prefix}/{user_hash}/{millis}.{ext}`.
pub(crate) fn object_path(prefix: &str, user_id: &str, millis: u64, extension: &str) -> String {
    if prefix.is_empty() {
        format!("{}/{millis}.{extension}", user_hash(user_id))
    } else {
        format!("{prefix}/{}/{millis}.{extension}", user_hash(user_id))
    }
}

impl Workflows {
    /// Store a screenshot and open a new project for it.
    pub async fn upload(
        &self,
        identity: &Identity,
        request: UploadRequest,
    ) -> Result<UploadOutcome, WorkflowError> {
        let result = self.run_upload(identity, request).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.code(),
        };
        counter!(UPLOADS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn run_upload(
        &self,
        identity: &Identity,
        request: UploadRequest,
    ) -> Result<UploadOutcome, WorkflowError> {
        let accepted = validate_upload(
            request.file.len() as u64,
            &request.content_type,
            request.file_name.as_deref(),
            self.settings.max_file_bytes,
        )?;

        let path = object_path(
            &self.settings.path_prefix,
            &identity.user_id,
            next_millis(),
            accepted.extension,
        );
        let mut compensations = Compensations::new("upload");

        self.objects
            .put(&path, request.file, accepted.mime)
            .await
            .map_err(WorkflowError::StorageWriteFailed)?;
        {
            let objects = self.objects.clone();
            let path = path.clone();
            compensations.push("delete_object", move || async move {
                objects.delete(&path).await
            });
        }

        let access = match self
            .objects
            .signed_read(&path, self.settings.signed_url_ttl)
            .await
        {
            Ok(access) => access,
            Err(e) => {
                compensations.unwind().await;
                return Err(WorkflowError::StorageReadFailed(e));
            }
        };

        let created_profile = match self.read_or_create_profile(identity).await {
            Ok((_, created)) => created,
            Err(e) => {
                compensations.unwind().await;
                return Err(WorkflowError::ProfileError(e));
            }
        };
        if created_profile {
            let records = self.records.clone();
            let user_id = identity.user_id.clone();
            compensations.push("delete_profile", move || async move {
                records.delete_profile(&user_id).await
            });
        }

        let now = now_timestamp();
        let project = ProjectRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: identity.user_id.clone(),
            name: format!("Screenshot {}", chrono::Utc::now().format("%Y-%m-%d")),
            image_ref: Some(path.clone()),
            status: ProjectStatus::Active,
            created_at: now.clone(),
            updated_at: now,
        };
        let project_id = project.id.clone();
        if let Err(e) = self.records.insert_project(project).await {
            compensations.unwind().await;
            return Err(WorkflowError::ProjectCreateFailed(e));
        }
        compensations.commit();

        tracing::info!(
            project_id = %project_id,
            path = %path,
            new_profile = created_profile,
            "screenshot uploaded"
        );

        Ok(UploadOutcome {
            project_id,
            image_path: path,
            access,
        })
    }
}
