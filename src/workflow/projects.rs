//! Read path: projects, artifacts and profiles.
//!
//! Project images are stored as stable object paths.  Every view built
//! here mints a fresh access descriptor from that path; a descriptor is
//! never persisted or reused.

use serde::Serialize;

use super::Workflows;
use crate::errors::WorkflowError;
use crate::identity::Identity;
use crate::metadata::store::{ArtifactRecord, ProjectRecord, ProjectStatus, UserProfile};
use crate::storage::backend::AccessDescriptor;

/// The current artifact of a project.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactView {
    pub id: String,
    pub html: String,
    pub css: String,
    pub js: String,
    pub preview_url: Option<String>,
    pub created_at: String,
}

impl From<ArtifactRecord> for ArtifactView {
    fn from(record: ArtifactRecord) -> Self {
        Self {
            id: record.id,
            html: record.html,
            css: record.css,
            js: record.js,
            preview_url: record.preview_url,
            created_at: record.created_at,
        }
    }
}

/// A project as shown to its owner.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectView {
    pub id: String,
    pub name: String,
    pub status: ProjectStatus,
    /// Freshly minted read access to the source image.
    pub image: Option<AccessDescriptor>,
    pub created_at: String,
    pub updated_at: String,
}

/// The caller's profile with remaining quota.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    pub id: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,
    pub role: String,
    pub quota_limit: u32,
    pub quota_used: u32,
    pub quota_remaining: u32,
    /// Whether this call created the profile.
    pub created: bool,
}

impl ProfileView {
    fn new(profile: UserProfile, created: bool) -> Self {
        Self {
            quota_remaining: profile.quota_remaining(),
            id: profile.id,
            email: profile.email,
            first_name: profile.first_name,
            last_name: profile.last_name,
            avatar_url: profile.avatar_url,
            role: profile.role,
            quota_limit: profile.quota_limit,
            quota_used: profile.quota_used,
            created,
        }
    }
}

impl Workflows {
    /// The most recently created artifact of a project the caller owns.
    pub async fn get_latest_artifact(
        &self,
        user_id: &str,
        project_id: &str,
    ) -> Result<ArtifactView, WorkflowError> {
        self.owned_project(user_id, project_id).await?;
        match self.records.latest_artifact(project_id).await {
            Ok(Some(artifact)) => Ok(artifact.into()),
            Ok(None) => Err(WorkflowError::NotFound),
            Err(e) => Err(WorkflowError::StorageReadFailed(e)),
        }
    }

    /// One project the caller owns.  Fails if its image cannot be signed.
    pub async fn get_project(
        &self,
        user_id: &str,
        project_id: &str,
    ) -> Result<ProjectView, WorkflowError> {
        let project = self.owned_project(user_id, project_id).await?;
        let image = match project.image_ref.as_deref() {
            Some(path) => Some(
                self.objects
                    .signed_read(path, self.settings.signed_url_ttl)
                    .await
                    .map_err(WorkflowError::StorageReadFailed)?,
            ),
            None => None,
        };
        Ok(project_view(project, image))
    }

    /// All of the caller's projects, newest first.
    ///
    /// A project whose image cannot be signed is listed without one.
    pub async fn list_projects(&self, user_id: &str) -> Result<Vec<ProjectView>, WorkflowError> {
        let projects = self
            .records
            .list_projects(user_id)
            .await
            .map_err(WorkflowError::StorageReadFailed)?;

        let mut views = Vec::with_capacity(projects.len());
        for project in projects {
            let image = match project.image_ref.as_deref() {
                Some(path) => match self
                    .objects
                    .signed_read(path, self.settings.signed_url_ttl)
                    .await
                {
                    Ok(access) => Some(access),
                    Err(e) => {
                        tracing::warn!(project_id = %project.id, error = %e, "cannot sign project image");
                        None
                    }
                },
                None => None,
            };
            views.push(project_view(project, image));
        }
        Ok(views)
    }

    /// Read or create the caller's profile.
    pub async fn ensure_profile(&self, identity: &Identity) -> Result<ProfileView, WorkflowError> {
        let (profile, created) = self
            .read_or_create_profile(identity)
            .await
            .map_err(WorkflowError::ProfileError)?;
        Ok(ProfileView::new(profile, created))
    }
}

fn project_view(project: ProjectRecord, image: Option<AccessDescriptor>) -> ProjectView {
    ProjectView {
        id: project.id,
        name: project.name,
        status: project.status,
        image,
        created_at: project.created_at,
        updated_at: project.updated_at,
    }
}
