//! Prompt suggestion: turn a project's screenshot into a generation prompt.
//!
//! Read-only with respect to the project: no status transition, no
//! artifact, no quota.  The caller reviews the suggestion and submits it
//! to the generation workflow.

use metrics::counter;

use super::Workflows;
use crate::analysis::PromptSuggestion;
use crate::errors::{InputError, WorkflowError};
use crate::generation::GenerationFailure;
use crate::metrics::PROMPT_SUGGESTIONS_TOTAL;

impl Workflows {
    /// Analyze the screenshot of a project the caller owns.
    pub async fn suggest_prompt(
        &self,
        user_id: &str,
        project_id: &str,
    ) -> Result<PromptSuggestion, WorkflowError> {
        let result = self.run_suggest_prompt(user_id, project_id).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.code(),
        };
        counter!(PROMPT_SUGGESTIONS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn run_suggest_prompt(
        &self,
        user_id: &str,
        project_id: &str,
    ) -> Result<PromptSuggestion, WorkflowError> {
        if project_id.trim().is_empty() {
            return Err(InputError::MissingField("projectId").into());
        }

        let project = self.owned_project(user_id, project_id).await?;
        let Some(path) = project.image_ref.as_deref() else {
            return Err(InputError::Invalid("Project has no screenshot".to_string()).into());
        };
        let image = self
            .image_data_uri(path)
            .await
            .map_err(WorkflowError::StorageReadFailed)?;

        let timeout = self.settings.analysis_timeout;
        let reply = match tokio::time::timeout(timeout, self.analyzer.analyze(image)).await {
            Ok(reply) => reply,
            Err(_) => Err(GenerationFailure::Timeout(timeout)),
        };
        let suggestion = reply.and_then(|content| PromptSuggestion::from_model_output(&content));

        match suggestion {
            Ok(suggestion) => {
                tracing::info!(project_id = %project.id, "prompt suggested");
                Ok(suggestion)
            }
            Err(failure) => {
                tracing::warn!(project_id = %project.id, error = %failure, "screenshot analysis failed");
                Err(failure.into())
            }
        }
    }
}
