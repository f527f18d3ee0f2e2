//! Profile sync from identity-provider events.
//!
//! `user.created` and `user.updated` upsert the profile's contact fields;
//! a new profile starts with the default quota.  Deletion is handled
//! outside this service, so `user.deleted` and unknown event types are
//! acknowledged without touching the store.

use metrics::counter;
use serde::Deserialize;

use super::Workflows;
use crate::errors::{InputError, WorkflowError};
use crate::metadata::store::{now_timestamp, UserProfile};
use crate::metrics::PROFILE_SYNCS_TOTAL;

/// An identity-provider event.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: IdentityEventUser,
}

/// The user an event is about.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityEventUser {
    pub id: String,
    #[serde(default)]
    pub email_addresses: Vec<EmailAddress>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailAddress {
    pub email_address: String,
}

/// What a sync did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated,
    Ignored,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Created => "created",
            SyncOutcome::Updated => "updated",
            SyncOutcome::Ignored => "ignored",
        }
    }
}

/// Providers send empty strings for unset fields.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Workflows {
    /// Apply one identity-provider event to the record store.
    pub async fn sync_profile(&self, event: IdentityEvent) -> Result<SyncOutcome, WorkflowError> {
        let result = self.run_sync_profile(event).await;
        let outcome = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(e) => e.code(),
        };
        counter!(PROFILE_SYNCS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn run_sync_profile(&self, event: IdentityEvent) -> Result<SyncOutcome, WorkflowError> {
        match event.kind.as_str() {
            "user.created" | "user.updated" => {}
            other => {
                tracing::info!(event = other, user_id = %event.data.id, "identity event ignored");
                return Ok(SyncOutcome::Ignored);
            }
        }

        let user = event.data;
        if user.id.trim().is_empty() {
            return Err(InputError::MissingField("data.id").into());
        }

        let now = now_timestamp();
        let profile = UserProfile {
            id: user.id.clone(),
            email: user
                .email_addresses
                .into_iter()
                .next()
                .map(|e| e.email_address)
                .unwrap_or_default(),
            first_name: non_empty(user.first_name),
            last_name: non_empty(user.last_name),
            avatar_url: non_empty(user.image_url),
            role: "user".to_string(),
            quota_limit: self.settings.default_quota_limit,
            quota_used: 0,
            created_at: now.clone(),
            updated_at: now,
        };

        let created = self
            .records
            .upsert_profile(profile)
            .await
            .map_err(WorkflowError::ProfileError)?;
        let outcome = if created {
            SyncOutcome::Created
        } else {
            SyncOutcome::Updated
        };
        tracing::info!(
            event = %event.kind,
            user_id = %user.id,
            outcome = outcome.as_str(),
            "profile synced"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::store::RecordStore;
    use crate::testing::{identity, Harness};
    use std::sync::atomic::Ordering;

    fn event(kind: &str, user: &str, email: &str) -> IdentityEvent {
        serde_json::from_value(serde_json::json!({
            "type": kind,
            "data": {
                "id": user,
                "email_addresses": [{"email_address": email, "id": "idn_1"}],
                "first_name": "Ada",
                "last_name": "",
                "image_url": "https://img.example/ada.png",
                "created_at": 1_750_000_000_000u64
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_created_event_makes_profile_with_default_quota() {
        let h = Harness::new();
        let outcome = h
            .workflows
            .sync_profile(event("user.created", "user_1", "ada@example.com"))
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::Created);

        let profile = h.records.get_profile("user_1").await.unwrap().unwrap();
        assert_eq!(profile.email, "ada@example.com");
        assert_eq!(profile.first_name.as_deref(), Some("Ada"));
        assert_eq!(profile.last_name, None);
        assert_eq!(profile.quota_limit, 15);
        assert_eq!(profile.role, "user");
    }

    #[tokio::test]
    async fn test_updated_event_keeps_usage() {
        let h = Harness::new();
        h.workflows.ensure_profile(&identity("user_1")).await.unwrap();
        h.records.consume_quota("user_1").await.unwrap();

        let outcome = h
            .workflows
            .sync_profile(event("user.updated", "user_1", "new@example.com"))
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::Updated);

        let profile = h.records.get_profile("user_1").await.unwrap().unwrap();
        assert_eq!(profile.email, "new@example.com");
        assert_eq!(profile.avatar_url.as_deref(), Some("https://img.example/ada.png"));
        assert_eq!(profile.quota_used, 1);
    }

    #[tokio::test]
    async fn test_deleted_and_unknown_events_are_ignored() {
        let h = Harness::new();
        h.workflows.ensure_profile(&identity("user_1")).await.unwrap();

        for kind in ["user.deleted", "session.created"] {
            let outcome = h
                .workflows
                .sync_profile(event(kind, "user_1", "x@example.com"))
                .await
                .unwrap();
            assert_eq!(outcome, SyncOutcome::Ignored);
        }
        let profile = h.records.get_profile("user_1").await.unwrap().unwrap();
        assert_eq!(profile.email, "user_1@example.com");
    }

    #[tokio::test]
    async fn test_store_failure_is_profile_error() {
        let h = Harness::new();
        h.records.fail_insert_profile.store(true, Ordering::SeqCst);
        let err = h
            .workflows
            .sync_profile(event("user.created", "user_1", "a@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::ProfileError(_)));
    }

    #[tokio::test]
    async fn test_blank_user_id_rejected() {
        let h = Harness::new();
        let err = h
            .workflows
            .sync_profile(event("user.created", " ", "a@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidInput(_)));
    }
}
