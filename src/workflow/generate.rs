//! Generation workflow: drive a project through the external generator.
//!
//! `processing` is persisted before the external call.  Transport
//! failures, timeouts and upstream errors mark the project `failed` and
//! consume no quota.  On success the artifact is stored, the project
//! marked `completed`, and one unit of quota consumed.  Quota is checked
//! last; an exhausted quota leaves the artifact in place and only
//! replaces the success response with `QuotaExceeded`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use metrics::{counter, histogram};
use serde::Serialize;
use std::time::Instant;

use super::Workflows;
use crate::errors::{InputError, WorkflowError};
use crate::generation::{GenerationFailure, ScaffoldRequest, ScaffoldResponse};
use crate::metadata::store::{now_timestamp, ArtifactRecord, ProjectRecord, ProjectStatus};
use crate::metrics::{GENERATIONS_TOTAL, GENERATION_DURATION_SECONDS, QUOTA_DENIALS_TOTAL};
use crate::storage::backend::content_type_for_path;

const DEFAULT_SUCCESS_MESSAGE: &str = "Code generated successfully";

/// A generation request for one project.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub project_id: String,
    pub prompt: String,
    pub preferences: serde_json::Map<String, serde_json::Value>,
}

/// Result of a successful generation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateOutcome {
    pub artifact_id: String,
    pub preview_url: String,
    pub status: String,
    pub message: String,
}

impl Workflows {
    /// Generate code for a project the caller owns.
    ///
    /// Not idempotent: every call that reaches the generator creates a new
    /// artifact and attempts to consume quota.
    pub async fn generate(
        &self,
        user_id: &str,
        request: GenerateRequest,
    ) -> Result<GenerateOutcome, WorkflowError> {
        let result = self.run_generate(user_id, request).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.code(),
        };
        counter!(GENERATIONS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn run_generate(
        &self,
        user_id: &str,
        request: GenerateRequest,
    ) -> Result<GenerateOutcome, WorkflowError> {
        if request.prompt.trim().is_empty() {
            return Err(InputError::MissingField("prompt").into());
        }
        if request.project_id.trim().is_empty() {
            return Err(InputError::MissingField("projectId").into());
        }

        let project = self.owned_project(user_id, &request.project_id).await?;
        let image_base64 = match project.image_ref.as_deref() {
            Some(path) => self.inline_image(path).await,
            None => None,
        };

        if !project.status.can_transition_to(ProjectStatus::Processing) {
            tracing::warn!(
                project_id = %project.id,
                "project already processing; starting another generation"
            );
        }
        self.records
            .update_project_status(&project.id, ProjectStatus::Processing, &now_timestamp())
            .await
            .map_err(WorkflowError::StatusUpdateFailed)?;

        let scaffold = ScaffoldRequest {
            prompt: request.prompt,
            project_id: project.id.clone(),
            image_base64,
            preferences: request.preferences,
        };
        let started = Instant::now();
        let timeout = self.settings.generation_timeout;
        let result = match tokio::time::timeout(timeout, self.generator.scaffold(scaffold)).await {
            Ok(result) => result,
            Err(_) => Err(GenerationFailure::Timeout(timeout)),
        };
        histogram!(GENERATION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        let response = match result {
            Ok(response) => response,
            Err(failure) => {
                tracing::warn!(project_id = %project.id, error = %failure, "generation failed");
                self.mark_failed(&project.id).await;
                return Err(failure.into());
            }
        };

        let artifact = artifact_from_response(&project, &response);
        if let Err(e) = self.persist_artifact(artifact).await {
            tracing::error!(project_id = %project.id, error = %e, "artifact not stored");
            self.mark_failed(&project.id).await;
            return Err(WorkflowError::ArtifactStoreFailed(e));
        }

        if let Err(e) = self
            .records
            .update_project_status(&project.id, ProjectStatus::Completed, &now_timestamp())
            .await
        {
            tracing::error!(
                project_id = %project.id,
                artifact_id = %response.artifact_id,
                error = %e,
                "artifact stored but project not marked completed; reconcile manually"
            );
            return Err(WorkflowError::StatusUpdateFailed(e));
        }

        match self.records.consume_quota(user_id).await {
            Ok(true) => {}
            Ok(false) => {
                counter!(QUOTA_DENIALS_TOTAL).increment(1);
                tracing::warn!(
                    project_id = %project.id,
                    artifact_id = %response.artifact_id,
                    "quota exhausted after generation"
                );
                return Err(WorkflowError::QuotaExceeded);
            }
            Err(e) => return Err(WorkflowError::QuotaCheckFailed(e)),
        }

        tracing::info!(
            project_id = %project.id,
            artifact_id = %response.artifact_id,
            "generation completed"
        );

        Ok(GenerateOutcome {
            artifact_id: response.artifact_id,
            preview_url: response.preview_url,
            status: response.status,
            message: response
                .message
                .unwrap_or_else(|| DEFAULT_SUCCESS_MESSAGE.to_string()),
        })
    }

    /// Load a project, hiding projects owned by someone else.
    pub(crate) async fn owned_project(
        &self,
        user_id: &str,
        project_id: &str,
    ) -> Result<ProjectRecord, WorkflowError> {
        match self.records.get_project(project_id).await {
            Ok(Some(project)) if project.user_id == user_id => Ok(project),
            Ok(_) => Err(WorkflowError::NotFound),
            Err(e) => Err(WorkflowError::StorageReadFailed(e)),
        }
    }

    /// Fetch the source image as a data URI.  Any failure yields `None`.
    async fn inline_image(&self, path: &str) -> Option<String> {
        match self.image_data_uri(path).await {
            Ok(uri) => Some(uri),
            Err(e) => {
                tracing::warn!(path, error = %e, "image fetch failed; generating without image");
                None
            }
        }
    }

    /// Read a stored image and encode it as `data:{mime};base64,...`.
    pub(crate) async fn image_data_uri(&self, path: &str) -> anyhow::Result<String> {
        let path = path.trim_start_matches('/');
        if path.split('/').any(|seg| seg == "..") {
            anyhow::bail!("unsafe image path");
        }
        let object = self.objects.get(path).await?;
        Ok(format!(
            "data:{};base64,{}",
            content_type_for_path(path),
            STANDARD.encode(&object.data)
        ))
    }

    /// Store a generated artifact so it is retrievable for its project.
    ///
    /// An id the store already holds is accepted only when that row belongs
    /// to the same project and user.
    async fn persist_artifact(&self, artifact: ArtifactRecord) -> anyhow::Result<()> {
        if self.records.insert_artifact(artifact.clone()).await? {
            return Ok(());
        }
        match self.records.get_artifact(&artifact.id).await? {
            Some(existing)
                if existing.project_id == artifact.project_id
                    && existing.user_id == artifact.user_id =>
            {
                tracing::info!(
                    artifact_id = %artifact.id,
                    "artifact id already recorded for this project"
                );
                Ok(())
            }
            Some(_) => anyhow::bail!("artifact id collision: {}", artifact.id),
            None => anyhow::bail!("artifact {} was neither written nor found", artifact.id),
        }
    }

    /// Best-effort transition to `failed`.
    async fn mark_failed(&self, project_id: &str) {
        if let Err(e) = self
            .records
            .update_project_status(project_id, ProjectStatus::Failed, &now_timestamp())
            .await
        {
            tracing::error!(project_id, error = %e, "failed to mark project failed");
        }
    }
}

fn artifact_from_response(project: &ProjectRecord, response: &ScaffoldResponse) -> ArtifactRecord {
    ArtifactRecord {
        id: response.artifact_id.clone(),
        project_id: project.id.clone(),
        user_id: project.user_id.clone(),
        html: response.html.clone().unwrap_or_default(),
        css: response.css.clone().unwrap_or_default(),
        js: response.js.clone().unwrap_or_default(),
        preview_url: Some(response.preview_url.clone()),
        created_at: now_timestamp(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::store::RecordStore;
    use crate::testing::{identity, png_bytes, Harness, StubBehavior};
    use crate::workflow::upload::UploadRequest;
    use std::sync::atomic::Ordering;

    async fn uploaded_project(h: &Harness, user: &str) -> String {
        h.workflows
            .upload(
                &identity(user),
                UploadRequest {
                    file: png_bytes(64),
                    content_type: "image/png".to_string(),
                    file_name: Some("shot.png".to_string()),
                },
            )
            .await
            .unwrap()
            .project_id
    }

    fn request(project_id: &str) -> GenerateRequest {
        GenerateRequest {
            project_id: project_id.to_string(),
            prompt: "make it responsive".to_string(),
            preferences: serde_json::Map::new(),
        }
    }

    async fn status(h: &Harness, project_id: &str) -> ProjectStatus {
        h.records
            .get_project(project_id)
            .await
            .unwrap()
            .unwrap()
            .status
    }

    async fn quota_used(h: &Harness, user: &str) -> u32 {
        h.records.get_profile(user).await.unwrap().unwrap().quota_used
    }

    #[tokio::test]
    async fn test_success_completes_and_consumes_quota() {
        let h = Harness::new();
        let project_id = uploaded_project(&h, "u1").await;

        let outcome = h.workflows.generate("u1", request(&project_id)).await.unwrap();
        assert_eq!(outcome.artifact_id, "art-1");
        assert_eq!(outcome.preview_url, "/preview/art-1");
        assert_eq!(outcome.message, DEFAULT_SUCCESS_MESSAGE);

        assert_eq!(status(&h, &project_id).await, ProjectStatus::Completed);
        assert_eq!(quota_used(&h, "u1").await, 1);
        let artifact = h.records.latest_artifact(&project_id).await.unwrap().unwrap();
        assert_eq!(artifact.id, "art-1");
        assert!(artifact.html.contains("make it responsive"));
    }

    #[tokio::test]
    async fn test_request_carries_inline_image() {
        let h = Harness::new();
        let project_id = uploaded_project(&h, "u1").await;
        let mut req = request(&project_id);
        req.preferences
            .insert("framework".to_string(), serde_json::json!("react"));

        h.workflows.generate("u1", req).await.unwrap();

        let sent = h.generator.last_request().unwrap();
        assert_eq!(sent.project_id, project_id);
        assert_eq!(sent.preferences["framework"], "react");
        let expected = format!("data:image/png;base64,{}", STANDARD.encode(png_bytes(64)));
        assert_eq!(sent.image_base64.as_deref(), Some(expected.as_str()));
    }

    #[tokio::test]
    async fn test_image_fetch_failure_is_not_fatal() {
        let h = Harness::new();
        let project_id = uploaded_project(&h, "u1").await;
        h.objects.fail_get.store(true, Ordering::SeqCst);

        h.workflows.generate("u1", request(&project_id)).await.unwrap();
        assert_eq!(h.generator.last_request().unwrap().image_base64, None);
    }

    #[tokio::test]
    async fn test_other_users_project_is_not_found() {
        let h = Harness::new();
        let project_id = uploaded_project(&h, "owner").await;

        let err = h
            .workflows
            .generate("intruder", request(&project_id))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound));

        let err = h
            .workflows
            .generate("intruder", request("no-such-project"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound));

        assert_eq!(h.generator.call_count(), 0);
        assert_eq!(status(&h, &project_id).await, ProjectStatus::Active);
    }

    #[tokio::test]
    async fn test_timeout_marks_failed_without_quota() {
        let h = Harness::new();
        let project_id = uploaded_project(&h, "u1").await;
        h.generator.set_behavior(StubBehavior::Hang);

        let err = h.workflows.generate("u1", request(&project_id)).await.unwrap_err();
        assert!(matches!(err, WorkflowError::GenerationServiceUnavailable(_)));
        assert!(err.is_retryable());

        assert_eq!(status(&h, &project_id).await, ProjectStatus::Failed);
        assert_eq!(quota_used(&h, "u1").await, 0);
        assert!(h.records.latest_artifact(&project_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upstream_error_carries_status_and_body() {
        let h = Harness::new();
        let project_id = uploaded_project(&h, "u1").await;
        h.generator
            .set_behavior(StubBehavior::Upstream(500, "model overloaded".to_string()));

        let err = h.workflows.generate("u1", request(&project_id)).await.unwrap_err();
        match err {
            WorkflowError::GenerationServiceError { status, ref body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "model overloaded");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(status(&h, &project_id).await, ProjectStatus::Failed);
        assert_eq!(quota_used(&h, "u1").await, 0);
    }

    #[tokio::test]
    async fn test_retry_after_failure() {
        let h = Harness::new();
        let project_id = uploaded_project(&h, "u1").await;
        h.generator.set_behavior(StubBehavior::Unavailable);
        h.workflows.generate("u1", request(&project_id)).await.unwrap_err();
        assert_eq!(status(&h, &project_id).await, ProjectStatus::Failed);

        h.generator.set_behavior(StubBehavior::Succeed);
        h.workflows.generate("u1", request(&project_id)).await.unwrap();
        assert_eq!(status(&h, &project_id).await, ProjectStatus::Completed);
        assert_eq!(quota_used(&h, "u1").await, 1);
    }

    #[tokio::test]
    async fn test_processing_write_failure_skips_generator() {
        let h = Harness::new();
        let project_id = uploaded_project(&h, "u1").await;
        h.records.fail_status_update(ProjectStatus::Processing);

        let err = h.workflows.generate("u1", request(&project_id)).await.unwrap_err();
        assert!(matches!(err, WorkflowError::StatusUpdateFailed(_)));
        assert_eq!(h.generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_completed_write_failure_keeps_artifact_and_quota() {
        let h = Harness::new();
        let project_id = uploaded_project(&h, "u1").await;
        h.records.fail_status_update(ProjectStatus::Completed);

        let err = h.workflows.generate("u1", request(&project_id)).await.unwrap_err();
        assert!(matches!(err, WorkflowError::StatusUpdateFailed(_)));
        assert_eq!(status(&h, &project_id).await, ProjectStatus::Processing);
        assert!(h.records.latest_artifact(&project_id).await.unwrap().is_some());
        assert_eq!(quota_used(&h, "u1").await, 0);
    }

    #[tokio::test]
    async fn test_artifact_store_failure_marks_failed() {
        let h = Harness::new();
        let project_id = uploaded_project(&h, "u1").await;
        h.records.fail_insert_artifact.store(true, Ordering::SeqCst);

        let err = h.workflows.generate("u1", request(&project_id)).await.unwrap_err();
        assert!(matches!(err, WorkflowError::ArtifactStoreFailed(_)));
        assert_eq!(status(&h, &project_id).await, ProjectStatus::Failed);
        assert_eq!(quota_used(&h, "u1").await, 0);
    }

    #[tokio::test]
    async fn test_artifact_id_owned_by_other_project_fails_generation() {
        let h = Harness::new();
        let alice_project = uploaded_project(&h, "alice").await;
        let bob_project = uploaded_project(&h, "bob").await;
        h.generator
            .set_behavior(StubBehavior::SucceedWithId("dup".to_string()));

        h.workflows.generate("alice", request(&alice_project)).await.unwrap();

        let err = h
            .workflows
            .generate("bob", request(&bob_project))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::ArtifactStoreFailed(_)));
        assert_eq!(status(&h, &bob_project).await, ProjectStatus::Failed);
        assert_eq!(quota_used(&h, "bob").await, 0);
        assert!(h.records.latest_artifact(&bob_project).await.unwrap().is_none());

        let kept = h.records.get_artifact("dup").await.unwrap().unwrap();
        assert_eq!(kept.project_id, alice_project);
    }

    #[tokio::test]
    async fn test_repeated_artifact_id_for_same_project_is_accepted() {
        let h = Harness::new();
        let project_id = uploaded_project(&h, "u1").await;
        h.generator
            .set_behavior(StubBehavior::SucceedWithId("stable".to_string()));

        h.workflows.generate("u1", request(&project_id)).await.unwrap();
        let outcome = h.workflows.generate("u1", request(&project_id)).await.unwrap();
        assert_eq!(outcome.artifact_id, "stable");
        assert_eq!(status(&h, &project_id).await, ProjectStatus::Completed);
        assert_eq!(quota_used(&h, "u1").await, 2);
        assert_eq!(
            h.records.latest_artifact(&project_id).await.unwrap().unwrap().id,
            "stable"
        );
    }

    #[tokio::test]
    async fn test_quota_exhaustion_after_fifteen() {
        let h = Harness::new();
        let project_id = uploaded_project(&h, "u1").await;

        for _ in 0..2 {
            h.workflows.generate("u1", request(&project_id)).await.unwrap();
        }
        assert_eq!(quota_used(&h, "u1").await, 2);

        for _ in 2..15 {
            h.workflows.generate("u1", request(&project_id)).await.unwrap();
        }
        assert_eq!(quota_used(&h, "u1").await, 15);

        let err = h.workflows.generate("u1", request(&project_id)).await.unwrap_err();
        assert!(matches!(err, WorkflowError::QuotaExceeded));
        assert!(!err.is_retryable());

        // The 16th generation's artifact is kept and current.
        let latest = h
            .workflows
            .get_latest_artifact("u1", &project_id)
            .await
            .unwrap();
        assert_eq!(latest.id, "art-16");
        assert_eq!(status(&h, &project_id).await, ProjectStatus::Completed);
        assert_eq!(quota_used(&h, "u1").await, 15);
    }

    #[tokio::test]
    async fn test_quota_check_failure() {
        let h = Harness::new();
        let project_id = uploaded_project(&h, "u1").await;
        h.records.fail_consume.store(true, Ordering::SeqCst);

        let err = h.workflows.generate("u1", request(&project_id)).await.unwrap_err();
        assert!(matches!(err, WorkflowError::QuotaCheckFailed(_)));
    }

    #[tokio::test]
    async fn test_blank_prompt_rejected_before_lookup() {
        let h = Harness::new();
        let project_id = uploaded_project(&h, "u1").await;
        let mut req = request(&project_id);
        req.prompt = "   ".to_string();

        let err = h.workflows.generate("u1", req).await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::InvalidInput(InputError::MissingField("prompt"))
        ));
        assert_eq!(status(&h, &project_id).await, ProjectStatus::Active);
    }

    #[tokio::test]
    async fn test_traversal_image_path_is_skipped() {
        let h = Harness::new();
        h.records
            .insert_profile(crate::metadata::store::UserProfile {
                id: "u1".to_string(),
                email: String::new(),
                first_name: None,
                last_name: None,
                avatar_url: None,
                role: "user".to_string(),
                quota_limit: 15,
                quota_used: 0,
                created_at: now_timestamp(),
                updated_at: now_timestamp(),
            })
            .await
            .unwrap();
        h.records
            .insert_project(ProjectRecord {
                id: "p-evil".to_string(),
                user_id: "u1".to_string(),
                name: "Screenshot".to_string(),
                image_ref: Some("screenshots/../../secrets.png".to_string()),
                status: ProjectStatus::Active,
                created_at: now_timestamp(),
                updated_at: now_timestamp(),
            })
            .await
            .unwrap();

        h.workflows.generate("u1", request("p-evil")).await.unwrap();
        assert_eq!(h.generator.last_request().unwrap().image_base64, None);
    }
}
