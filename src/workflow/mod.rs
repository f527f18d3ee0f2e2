//! Orchestration of the object store, record store and generation service.
//!
//! None of the collaborators share a transaction.  Each workflow runs its
//! steps strictly in order, waiting for every write to be acknowledged
//! before the next step, and undoes committed steps through a
//! [`saga::Compensations`] stack when a later step fails.

pub mod generate;
pub mod projects;
pub mod saga;
pub mod suggest;
pub mod sync;
pub mod upload;

use std::sync::Arc;
use std::time::Duration;

use crate::analysis::PromptAnalyzer;
use crate::config::Config;
use crate::generation::GenerationClient;
use crate::identity::Identity;
use crate::metadata::store::{now_timestamp, RecordStore, UserProfile};
use crate::storage::backend::ObjectStore;

/// Limits and defaults injected into the workflows at construction.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    /// Largest accepted upload, in bytes.
    pub max_file_bytes: u64,
    /// Leading segment of stored screenshot paths.
    pub path_prefix: String,
    /// Validity of freshly minted access descriptors.
    pub signed_url_ttl: Duration,
    /// Upper bound on one generation call.
    pub generation_timeout: Duration,
    /// Upper bound on one screenshot analysis call.
    pub analysis_timeout: Duration,
    /// Quota limit applied to newly created profiles.
    pub default_quota_limit: u32,
}

impl WorkflowSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_file_bytes: config.upload.max_file_bytes,
            path_prefix: config.upload.path_prefix.trim_matches('/').to_string(),
            signed_url_ttl: config.storage.signed_url_ttl(),
            generation_timeout: config.generation.timeout(),
            analysis_timeout: config.analysis.timeout(),
            default_quota_limit: config.quota.default_limit,
        }
    }
}

/// Entry point for the upload, generation, suggestion, profile-sync and
/// read-path workflows.
///
/// Holds no per-request state; every call is independent.
#[derive(Clone)]
pub struct Workflows {
    records: Arc<dyn RecordStore>,
    objects: Arc<dyn ObjectStore>,
    generator: Arc<dyn GenerationClient>,
    analyzer: Arc<dyn PromptAnalyzer>,
    settings: WorkflowSettings,
}

impl Workflows {
    pub fn new(
        records: Arc<dyn RecordStore>,
        objects: Arc<dyn ObjectStore>,
        generator: Arc<dyn GenerationClient>,
        analyzer: Arc<dyn PromptAnalyzer>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            records,
            objects,
            generator,
            analyzer,
            settings,
        }
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    /// Read the caller's profile, creating it with default quota if absent.
    ///
    /// Returns the profile and whether this call created it.  A lost race
    /// with a concurrent creator is resolved by re-reading.
    async fn read_or_create_profile(
        &self,
        identity: &Identity,
    ) -> anyhow::Result<(UserProfile, bool)> {
        if let Some(profile) = self.records.get_profile(&identity.user_id).await? {
            return Ok((profile, false));
        }

        let now = now_timestamp();
        let profile = UserProfile {
            id: identity.user_id.clone(),
            email: identity.email.clone().unwrap_or_default(),
            first_name: identity.first_name.clone(),
            last_name: identity.last_name.clone(),
            avatar_url: identity.avatar_url.clone(),
            role: "user".to_string(),
            quota_limit: self.settings.default_quota_limit,
            quota_used: 0,
            created_at: now.clone(),
            updated_at: now,
        };

        match self.records.insert_profile(profile.clone()).await {
            Ok(()) => {
                tracing::info!(user_id = %identity.user_id, "created user profile");
                Ok((profile, true))
            }
            Err(insert_err) => match self.records.get_profile(&identity.user_id).await {
                Ok(Some(existing)) => Ok((existing, false)),
                _ => Err(insert_err),
            },
        }
    }
}
