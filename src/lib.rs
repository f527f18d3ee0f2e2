//! MockCodes library: screenshot-to-code orchestration core.
//!
//! This crate turns an uploaded UI screenshot into a project, drives the
//! project through generation against an external code-generation service,
//! and meters generations against a per-user monthly quota.  A vision
//! model can suggest the generation prompt, and identity-provider webhooks
//! keep profiles in sync.  The object store, record store and generation
//! service are independent systems; the [`workflow`] module sequences them
//! and compensates on partial failure.

use std::sync::Arc;

pub mod analysis;
pub mod config;
pub mod errors;
pub mod generation;
pub mod identity;
pub mod metadata;
pub mod metrics;
pub mod server;
pub mod storage;
pub mod webhook;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

use crate::config::Config;
use crate::identity::IdentityResolver;
use crate::storage::backend::ObjectStore;
use crate::storage::signing::UrlSigner;
use crate::webhook::WebhookVerifier;
use crate::workflow::Workflows;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Object store backend (local filesystem or in-memory).
    pub objects: Arc<dyn ObjectStore>,
    /// Verifies signed read URLs served from `/objects/*`.
    pub signer: UrlSigner,
    /// Maps request credentials to a stable user identity.
    pub identity: Arc<dyn IdentityResolver>,
    /// Verifies identity-provider webhooks; `None` leaves the route unserved.
    pub webhook: Option<WebhookVerifier>,
    /// Upload, generation and read-path workflows.
    pub workflows: Workflows,
}
