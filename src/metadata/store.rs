//! Abstract record store trait.
//!
//! Any record backend must implement [`RecordStore`].  The trait uses
//! manually desugared async methods (pinned boxed futures) so it can be
//! used behind `Arc<dyn RecordStore>` by both SQLite and in-memory stores.
//!
//! Each method is atomic on its own.  There is no multi-call transaction;
//! the workflows compensate instead.

use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

// ── Status ─────────────────────────────────────────────────────────

/// Lifecycle state of a project.
///
/// `Active` is the only initial state.  `Processing` is reachable from
/// every other state so a generation can be retried after it completed
/// or failed; no state is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Active,
    Processing,
    Completed,
    Failed,
}

impl ProjectStatus {
    /// Wire name, as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Active => "active",
            ProjectStatus::Processing => "processing",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Failed => "failed",
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: ProjectStatus) -> bool {
        match (self, next) {
            (ProjectStatus::Processing, ProjectStatus::Processing) => false,
            (_, ProjectStatus::Processing) => true,
            (ProjectStatus::Processing, ProjectStatus::Completed | ProjectStatus::Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ProjectStatus::Active),
            "processing" => Ok(ProjectStatus::Processing),
            "completed" => Ok(ProjectStatus::Completed),
            "failed" => Ok(ProjectStatus::Failed),
            other => anyhow::bail!("Unknown project status: {other}"),
        }
    }
}

// ── Record types ───────────────────────────────────────────────────

/// Per-user profile carrying the generation quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    /// Stable user id from the identity resolver.
    pub id: String,
    /// Email address (empty when unknown).
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,
    /// Role name (default `user`).
    pub role: String,
    /// Monthly generation allowance.
    pub quota_limit: u32,
    /// Generations consumed this month.
    pub quota_used: u32,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// RFC 3339 last-update timestamp.
    pub updated_at: String,
}

impl UserProfile {
    /// Generations left before the quota is exhausted.
    pub fn quota_remaining(&self) -> u32 {
        self.quota_limit.saturating_sub(self.quota_used)
    }
}

/// A screenshot project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRecord {
    /// UUID v4.
    pub id: String,
    /// Owning user id.  Immutable after creation.
    pub user_id: String,
    /// Display name.
    pub name: String,
    /// Stable object path of the source image.  Never a signed URL.
    pub image_ref: Option<String>,
    pub status: ProjectStatus,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// RFC 3339 last-update timestamp.
    pub updated_at: String,
}

/// Generated code for a project.  Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRecord {
    /// Id assigned by the generation service.
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    /// Markup payload.
    pub html: String,
    /// Style payload.
    pub css: String,
    /// Behavior payload.
    pub js: String,
    /// Live preview location.
    pub preview_url: Option<String>,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
}

/// Current time as an RFC 3339 UTC timestamp with microsecond precision.
///
/// Fixed-width, so lexicographic order equals chronological order.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

// ── Trait ───────────────────────────────────────────────────────────

/// Async record store contract.
pub trait RecordStore: Send + Sync + 'static {
    // ── Profiles ────────────────────────────────────────────────────

    /// Get a profile by user id.
    fn get_profile(
        &self,
        user_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<UserProfile>>> + Send + '_>>;

    /// Insert a new profile.  Fails if one already exists for the id.
    fn insert_profile(
        &self,
        profile: UserProfile,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Create a profile, or refresh the contact fields of an existing one.
    ///
    /// An existing profile keeps its role, quota and `created_at`; only
    /// email, names, avatar and `updated_at` are overwritten.  Returns true
    /// if the profile was created.
    fn upsert_profile(
        &self,
        profile: UserProfile,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;

    /// Delete a profile.  Deleting a missing profile succeeds.
    fn delete_profile(
        &self,
        user_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Change a profile's quota limit.  Returns false if no profile exists.
    fn set_quota_limit(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;

    /// Atomically consume one unit of quota.
    ///
    /// Returns true if `quota_used < quota_limit` held and the counter was
    /// incremented, false if the quota is exhausted or no profile exists.
    /// Must be safe under concurrent calls for the same user.
    fn consume_quota(
        &self,
        user_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;

    /// Reset `quota_used` to zero for every profile.  Returns the number
    /// of profiles touched.
    fn reset_quotas(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<u64>> + Send + '_>>;

    // ── Projects ────────────────────────────────────────────────────

    /// Insert a new project.
    fn insert_project(
        &self,
        project: ProjectRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Get a project by id.
    fn get_project(
        &self,
        project_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ProjectRecord>>> + Send + '_>>;

    /// List a user's projects, newest first.
    fn list_projects(
        &self,
        user_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<ProjectRecord>>> + Send + '_>>;

    /// Overwrite a project's status.  Fails if the project does not exist.
    fn update_project_status(
        &self,
        project_id: &str,
        status: ProjectStatus,
        updated_at: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    // ── Artifacts ───────────────────────────────────────────────────

    /// Insert an artifact.  An existing artifact with the same id is kept
    /// unchanged and the call returns false; true means the row was written.
    fn insert_artifact(
        &self,
        artifact: ArtifactRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;

    /// Get an artifact by id.
    fn get_artifact(
        &self,
        artifact_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ArtifactRecord>>> + Send + '_>>;

    /// The most recently created artifact for a project.
    fn latest_artifact(
        &self,
        project_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ArtifactRecord>>> + Send + '_>>;
}
