//! Test doubles: fault-injecting adapters and a scripted generation service.

use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::analysis::PromptAnalyzer;
use crate::config::Config;
use crate::generation::{GenerationClient, GenerationFailure, ScaffoldRequest, ScaffoldResponse};
use crate::identity::Identity;
use crate::metadata::memory::MemoryRecordStore;
use crate::metadata::store::{ArtifactRecord, ProjectRecord, ProjectStatus, RecordStore, UserProfile};
use crate::storage::backend::{AccessDescriptor, ObjectStore, StoredObject};
use crate::storage::memory::MemoryBackend;
use crate::storage::signing::UrlSigner;
use crate::workflow::{WorkflowSettings, Workflows};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

pub const TEST_BASE_URL: &str = "http://mockcodes.test";
pub const TEST_SIGNING_SECRET: &str = "test-signing-secret";

pub fn test_signer() -> UrlSigner {
    UrlSigner::new(TEST_BASE_URL, TEST_SIGNING_SECRET)
}

pub fn identity(user_id: &str) -> Identity {
    Identity {
        user_id: user_id.to_string(),
        email: Some(format!("{user_id}@example.com")),
        first_name: Some("Test".to_string()),
        last_name: None,
        avatar_url: None,
    }
}

/// A minimal valid-looking PNG payload.
pub fn png_bytes(len: usize) -> Bytes {
    let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
    data.resize(len.max(8), 0xAB);
    Bytes::from(data)
}

// ── Object store ───────────────────────────────────────────────────

/// In-memory object store with switchable failures and call counters.
pub struct FaultyObjectStore {
    pub inner: MemoryBackend,
    pub fail_put: AtomicBool,
    pub fail_get: AtomicBool,
    pub fail_delete: AtomicBool,
    pub fail_sign: AtomicBool,
    pub puts: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl FaultyObjectStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryBackend::new(test_signer()),
            fail_put: AtomicBool::new(false),
            fail_get: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            fail_sign: AtomicBool::new(false),
            puts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

impl ObjectStore for FaultyObjectStore {
    fn put(&self, path: &str, data: Bytes, content_type: &str) -> BoxFuture<'_, ()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_put.load(Ordering::SeqCst) {
            return injected("put");
        }
        self.inner.put(path, data, content_type)
    }

    fn get(&self, path: &str) -> BoxFuture<'_, StoredObject> {
        if self.fail_get.load(Ordering::SeqCst) {
            return injected("get");
        }
        self.inner.get(path)
    }

    fn delete(&self, path: &str) -> BoxFuture<'_, ()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete.load(Ordering::SeqCst) {
            return injected("delete");
        }
        self.inner.delete(path)
    }

    fn signed_read(&self, path: &str, ttl: Duration) -> BoxFuture<'_, AccessDescriptor> {
        if self.fail_sign.load(Ordering::SeqCst) {
            return injected("signed_read");
        }
        self.inner.signed_read(path, ttl)
    }
}

// ── Record store ───────────────────────────────────────────────────

/// In-memory record store with switchable failures.
pub struct FaultyRecordStore {
    pub inner: MemoryRecordStore,
    pub fail_get_profile: AtomicBool,
    pub fail_insert_profile: AtomicBool,
    pub fail_delete_profile: AtomicBool,
    pub fail_insert_project: AtomicBool,
    pub fail_get_project: AtomicBool,
    pub fail_insert_artifact: AtomicBool,
    pub fail_consume: AtomicBool,
    /// Reject status updates to this status.
    pub fail_status: Mutex<Option<ProjectStatus>>,
    pub profile_deletes: AtomicUsize,
}

impl FaultyRecordStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryRecordStore::new(),
            fail_get_profile: AtomicBool::new(false),
            fail_insert_profile: AtomicBool::new(false),
            fail_delete_profile: AtomicBool::new(false),
            fail_insert_project: AtomicBool::new(false),
            fail_get_project: AtomicBool::new(false),
            fail_insert_artifact: AtomicBool::new(false),
            fail_consume: AtomicBool::new(false),
            fail_status: Mutex::new(None),
            profile_deletes: AtomicUsize::new(0),
        }
    }

    pub fn fail_status_update(&self, status: ProjectStatus) {
        *self.fail_status.lock().unwrap() = Some(status);
    }
}

fn injected<T: Send + 'static>(what: &'static str) -> BoxFuture<'static, T> {
    Box::pin(async move { anyhow::bail!("injected {what} failure") })
}

impl RecordStore for FaultyRecordStore {
    fn get_profile(&self, user_id: &str) -> BoxFuture<'_, Option<UserProfile>> {
        if self.fail_get_profile.load(Ordering::SeqCst) {
            return injected("get_profile");
        }
        self.inner.get_profile(user_id)
    }

    fn insert_profile(&self, profile: UserProfile) -> BoxFuture<'_, ()> {
        if self.fail_insert_profile.load(Ordering::SeqCst) {
            return injected("insert_profile");
        }
        self.inner.insert_profile(profile)
    }

    fn upsert_profile(&self, profile: UserProfile) -> BoxFuture<'_, bool> {
        if self.fail_insert_profile.load(Ordering::SeqCst) {
            return injected("upsert_profile");
        }
        self.inner.upsert_profile(profile)
    }

    fn delete_profile(&self, user_id: &str) -> BoxFuture<'_, ()> {
        self.profile_deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete_profile.load(Ordering::SeqCst) {
            return injected("delete_profile");
        }
        self.inner.delete_profile(user_id)
    }

    fn set_quota_limit(&self, user_id: &str, limit: u32) -> BoxFuture<'_, bool> {
        self.inner.set_quota_limit(user_id, limit)
    }

    fn consume_quota(&self, user_id: &str) -> BoxFuture<'_, bool> {
        if self.fail_consume.load(Ordering::SeqCst) {
            return injected("consume_quota");
        }
        self.inner.consume_quota(user_id)
    }

    fn reset_quotas(&self) -> BoxFuture<'_, u64> {
        self.inner.reset_quotas()
    }

    fn insert_project(&self, project: ProjectRecord) -> BoxFuture<'_, ()> {
        if self.fail_insert_project.load(Ordering::SeqCst) {
            return injected("insert_project");
        }
        self.inner.insert_project(project)
    }

    fn get_project(&self, project_id: &str) -> BoxFuture<'_, Option<ProjectRecord>> {
        if self.fail_get_project.load(Ordering::SeqCst) {
            return injected("get_project");
        }
        self.inner.get_project(project_id)
    }

    fn list_projects(&self, user_id: &str) -> BoxFuture<'_, Vec<ProjectRecord>> {
        self.inner.list_projects(user_id)
    }

    fn update_project_status(
        &self,
        project_id: &str,
        status: ProjectStatus,
        updated_at: &str,
    ) -> BoxFuture<'_, ()> {
        if *self.fail_status.lock().unwrap() == Some(status) {
            return injected("update_project_status");
        }
        self.inner.update_project_status(project_id, status, updated_at)
    }

    fn insert_artifact(&self, artifact: ArtifactRecord) -> BoxFuture<'_, bool> {
        if self.fail_insert_artifact.load(Ordering::SeqCst) {
            return injected("insert_artifact");
        }
        self.inner.insert_artifact(artifact)
    }

    fn get_artifact(&self, artifact_id: &str) -> BoxFuture<'_, Option<ArtifactRecord>> {
        self.inner.get_artifact(artifact_id)
    }

    fn latest_artifact(&self, project_id: &str) -> BoxFuture<'_, Option<ArtifactRecord>> {
        self.inner.latest_artifact(project_id)
    }
}

// ── Generation service ─────────────────────────────────────────────

/// What the stub generation service does when called.
#[derive(Debug, Clone)]
pub enum StubBehavior {
    Succeed,
    /// Succeed, always reporting this artifact id.
    SucceedWithId(String),
    Hang,
    Unavailable,
    Upstream(u16, String),
}

/// Scripted generation service recording every request it receives.
pub struct StubGenerator {
    behavior: Mutex<StubBehavior>,
    calls: AtomicUsize,
    requests: Mutex<Vec<ScaffoldRequest>>,
}

impl StubGenerator {
    pub fn new(behavior: StubBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_behavior(&self, behavior: StubBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<ScaffoldRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

impl GenerationClient for StubGenerator {
    fn scaffold(
        &self,
        request: ScaffoldRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ScaffoldResponse, GenerationFailure>> + Send + '_>>
    {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let behavior = self.behavior.lock().unwrap().clone();
        self.requests.lock().unwrap().push(request.clone());
        Box::pin(async move {
            let succeed = |artifact_id: String| ScaffoldResponse {
                preview_url: format!("/preview/{artifact_id}"),
                artifact_id,
                status: "completed".to_string(),
                message: None,
                html: Some(format!("<main>{} #{n}</main>", request.prompt)),
                css: Some("main { display: grid; }".to_string()),
                js: None,
            };
            match behavior {
                StubBehavior::Succeed => Ok(succeed(format!("art-{n}"))),
                StubBehavior::SucceedWithId(id) => Ok(succeed(id)),
                StubBehavior::Hang => std::future::pending().await,
                StubBehavior::Unavailable => {
                    Err(GenerationFailure::Transport("connection refused".to_string()))
                }
                StubBehavior::Upstream(status, body) => {
                    Err(GenerationFailure::Upstream { status, body })
                }
            }
        })
    }
}

// ── Analysis service ───────────────────────────────────────────────

/// Scripted analysis service: answers every call with the same outcome.
pub struct StubAnalyzer {
    reply: Mutex<Result<String, (u16, String)>>,
    images: Mutex<Vec<String>>,
}

impl StubAnalyzer {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: Mutex::new(Ok(reply.to_string())),
            images: Mutex::new(Vec::new()),
        }
    }

    pub fn set_reply(&self, reply: &str) {
        *self.reply.lock().unwrap() = Ok(reply.to_string());
    }

    pub fn set_upstream_error(&self, status: u16, body: &str) {
        *self.reply.lock().unwrap() = Err((status, body.to_string()));
    }

    pub fn call_count(&self) -> usize {
        self.images.lock().unwrap().len()
    }

    pub fn last_image(&self) -> Option<String> {
        self.images.lock().unwrap().last().cloned()
    }
}

impl PromptAnalyzer for StubAnalyzer {
    fn analyze(
        &self,
        image: String,
    ) -> Pin<Box<dyn Future<Output = Result<String, GenerationFailure>> + Send + '_>> {
        self.images.lock().unwrap().push(image);
        let reply = self.reply.lock().unwrap().clone();
        Box::pin(async move {
            reply.map_err(|(status, body)| GenerationFailure::Upstream { status, body })
        })
    }
}

/// A structured analysis reply.
pub const ANALYSIS_REPLY: &str = r#"{"prompt":"Rebuild the landing page hero","components":["navbar","hero"],"colors":["bg-indigo-600"],"typography":["text-4xl font-bold"],"layout":"single column"}"#;

// ── Harness ────────────────────────────────────────────────────────

/// Workflows wired to fault-injecting doubles.
pub struct Harness {
    pub objects: Arc<FaultyObjectStore>,
    pub records: Arc<FaultyRecordStore>,
    pub generator: Arc<StubGenerator>,
    pub analyzer: Arc<StubAnalyzer>,
    pub workflows: Workflows,
}

impl Harness {
    pub fn new() -> Self {
        let mut settings = WorkflowSettings::from_config(&Config::default());
        settings.generation_timeout = Duration::from_millis(200);
        Self::with_settings(settings)
    }

    pub fn with_settings(settings: WorkflowSettings) -> Self {
        let objects = Arc::new(FaultyObjectStore::new());
        let records = Arc::new(FaultyRecordStore::new());
        let generator = Arc::new(StubGenerator::new(StubBehavior::Succeed));
        let analyzer = Arc::new(StubAnalyzer::new(ANALYSIS_REPLY));
        let workflows = Workflows::new(
            records.clone(),
            objects.clone(),
            generator.clone(),
            analyzer.clone(),
            settings,
        );
        Self {
            objects,
            records,
            generator,
            analyzer,
            workflows,
        }
    }
}
