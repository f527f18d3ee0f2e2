//! In-memory record store.
//!
//! Stores all records in memory with no persistence. Useful for testing
//! and ephemeral deployments. Uses `RwLock<Inner>` for thread-safe access;
//! the quota decrement runs entirely under the write lock.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use super::store::{ArtifactRecord, ProjectRecord, ProjectStatus, RecordStore, UserProfile};

#[derive(Debug, Default)]
struct Inner {
    profiles: HashMap<String, UserProfile>,
    projects: HashMap<String, ProjectRecord>,
    /// Artifacts in insertion order.
    artifacts: Vec<ArtifactRecord>,
}

#[derive(Default)]
pub struct MemoryRecordStore {
    inner: RwLock<Inner>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryRecordStore {
    fn get_profile(
        &self,
        user_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<UserProfile>>> + Send + '_>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner.profiles.get(&user_id).cloned())
        })
    }

    fn insert_profile(
        &self,
        profile: UserProfile,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            if inner.profiles.contains_key(&profile.id) {
                anyhow::bail!("Profile already exists: {}", profile.id);
            }
            inner.profiles.insert(profile.id.clone(), profile);
            Ok(())
        })
    }

    fn upsert_profile(
        &self,
        profile: UserProfile,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            match inner.profiles.get_mut(&profile.id) {
                Some(existing) => {
                    existing.email = profile.email;
                    existing.first_name = profile.first_name;
                    existing.last_name = profile.last_name;
                    existing.avatar_url = profile.avatar_url;
                    existing.updated_at = profile.updated_at;
                    Ok(false)
                }
                None => {
                    inner.profiles.insert(profile.id.clone(), profile);
                    Ok(true)
                }
            }
        })
    }

    fn delete_profile(
        &self,
        user_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            if inner.projects.values().any(|p| p.user_id == user_id) {
                anyhow::bail!("Profile still referenced by projects: {user_id}");
            }
            inner.profiles.remove(&user_id);
            Ok(())
        })
    }

    fn set_quota_limit(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            match inner.profiles.get_mut(&user_id) {
                Some(profile) => {
                    profile.quota_limit = limit;
                    profile.updated_at = super::store::now_timestamp();
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn consume_quota(
        &self,
        user_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            match inner.profiles.get_mut(&user_id) {
                Some(profile) if profile.quota_used < profile.quota_limit => {
                    profile.quota_used += 1;
                    profile.updated_at = super::store::now_timestamp();
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn reset_quotas(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<u64>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            let now = super::store::now_timestamp();
            for profile in inner.profiles.values_mut() {
                profile.quota_used = 0;
                profile.updated_at = now.clone();
            }
            Ok(inner.profiles.len() as u64)
        })
    }

    fn insert_project(
        &self,
        project: ProjectRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            if inner.projects.contains_key(&project.id) {
                anyhow::bail!("Project already exists: {}", project.id);
            }
            if !inner.profiles.contains_key(&project.user_id) {
                anyhow::bail!("No profile for project owner: {}", project.user_id);
            }
            inner.projects.insert(project.id.clone(), project);
            Ok(())
        })
    }

    fn get_project(
        &self,
        project_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ProjectRecord>>> + Send + '_>> {
        let project_id = project_id.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner.projects.get(&project_id).cloned())
        })
    }

    fn list_projects(
        &self,
        user_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<ProjectRecord>>> + Send + '_>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            let mut projects: Vec<_> = inner
                .projects
                .values()
                .filter(|p| p.user_id == user_id)
                .cloned()
                .collect();
            projects.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            Ok(projects)
        })
    }

    fn update_project_status(
        &self,
        project_id: &str,
        status: ProjectStatus,
        updated_at: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let project_id = project_id.to_string();
        let updated_at = updated_at.to_string();
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            match inner.projects.get_mut(&project_id) {
                Some(project) => {
                    project.status = status;
                    project.updated_at = updated_at;
                    Ok(())
                }
                None => anyhow::bail!("Project not found: {project_id}"),
            }
        })
    }

    fn insert_artifact(
        &self,
        artifact: ArtifactRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            if inner.artifacts.iter().any(|a| a.id == artifact.id) {
                return Ok(false);
            }
            inner.artifacts.push(artifact);
            Ok(true)
        })
    }

    fn get_artifact(
        &self,
        artifact_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ArtifactRecord>>> + Send + '_>> {
        let artifact_id = artifact_id.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner.artifacts.iter().find(|a| a.id == artifact_id).cloned())
        })
    }

    fn latest_artifact(
        &self,
        project_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ArtifactRecord>>> + Send + '_>> {
        let project_id = project_id.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            // Later insertions win ties on created_at.
            let latest = inner
                .artifacts
                .iter()
                .enumerate()
                .filter(|(_, a)| a.project_id == project_id)
                .max_by(|(ia, a), (ib, b)| a.created_at.cmp(&b.created_at).then(ia.cmp(ib)))
                .map(|(_, a)| a.clone());
            Ok(latest)
        })
    }
}
