//! Axum router construction and MockCodes route mapping.
//!
//! The [`app`] function wires the upload, generation and read-path
//! workflows to HTTP and returns a ready-to-serve [`axum::Router`].
//! Handlers only translate between HTTP and workflow calls; every
//! decision lives in [`crate::workflow`].
//!
//! All `/api/*` routes resolve the caller's identity first and answer
//! 401 without touching any store when none is present.  `/objects/*`
//! is authorized by the signed URL itself, and `/webhooks/identity` by
//! the delivery signature.

use axum::{
    body::{Body, Bytes},
    extract::{rejection::JsonRejection, DefaultBodyLimit, Extension, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::debug;
use utoipa::OpenApi;

use crate::analysis::PromptSuggestion;
use crate::errors::{generate_request_id, InputError, WorkflowError};
use crate::identity::{Identity, IdentityError};
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::storage::signing::SignatureError;
use crate::workflow::generate::GenerateRequest;
use crate::workflow::projects::{ArtifactView, ProfileView, ProjectView};
use crate::workflow::sync::IdentityEvent;
use crate::workflow::upload::UploadRequest;
use crate::AppState;

/// Header carrying the original file name of an upload.
const FILE_NAME_HEADER: &str = "x-file-name";

/// Request-body headroom above the largest accepted upload.  Bodies that
/// fit in it reach the workflow and get a precise size error.
const BODY_LIMIT_SLACK: usize = 1024 * 1024;

// -- OpenAPI document ---------------------------------------------------------

/// OpenAPI documentation for the MockCodes API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "MockCodes API",
        version = "0.1.0",
        description = "Screenshot upload, code generation and project read path"
    ),
    paths(
        health_check,
        handle_upload,
        handle_scaffold,
        handle_generate_prompt,
        handle_latest_artifact,
        handle_ensure_profile,
        handle_list_projects,
        handle_get_project,
        handle_read_object,
        handle_identity_webhook,
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Projects", description = "Screenshot upload and project views"),
        (name = "Generation", description = "Code generation and artifacts"),
        (name = "Profile", description = "User profile and quota"),
        (name = "Objects", description = "Signed object reads"),
        (name = "Webhooks", description = "Identity-provider events"),
    )
)]
struct ApiDoc;

/// Build the axum [`Router`] with all MockCodes routes.
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    let body_limit = usize::try_from(state.config.upload.max_file_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(BODY_LIMIT_SLACK);

    let api = Router::new()
        .route("/upload", post(handle_upload))
        .route("/scaffold", post(handle_scaffold))
        .route("/generate-prompt", post(handle_generate_prompt))
        .route("/artifacts/:project_id", get(handle_latest_artifact))
        .route("/ensure-profile", post(handle_ensure_profile))
        .route("/projects", get(handle_list_projects))
        .route("/projects/:id", get(handle_get_project))
        // route_layer: unmatched /api paths stay 404 instead of 401.
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let mut router = Router::new()
        .nest("/api", api)
        .route("/objects/*path", get(handle_read_object))
        .route("/openapi.json", get(openapi_json));

    if state.webhook.is_some() {
        router = router.route("/webhooks/identity", post(handle_identity_webhook));
    }
    if state.config.observability.health_check {
        router = router.route("/health", get(health_check));
    }
    if state.config.observability.metrics {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .with_state(state)
        // Layer ordering: inner layers run first, outer layers wrap them.
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(common_headers_middleware))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        // metrics_middleware is outermost (captures full request lifecycle).
        .layer(middleware::from_fn(metrics_middleware))
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::HeaderName::from_static(FILE_NAME_HEADER),
        ])
        .expose_headers([
            header::CONTENT_TYPE,
            header::CONTENT_LENGTH,
            header::HeaderName::from_static("x-request-id"),
        ])
        .max_age(Duration::from_secs(600))
}

// -- Common headers middleware -----------------------------------------------

/// Adds `x-request-id` (when the handler did not), `Date` and `Server` to
/// every response.
async fn common_headers_middleware(req: Request<Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    if !headers.contains_key("x-request-id") {
        if let Ok(value) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert("x-request-id", value);
        }
    }
    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    if let Ok(value) = HeaderValue::from_str(&date) {
        headers.insert(header::DATE, value);
    }
    headers.insert(header::SERVER, HeaderValue::from_static("MockCodes"));

    response
}

// -- Auth middleware ---------------------------------------------------------

/// Resolves the caller and stores the [`Identity`] in request extensions.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, IdentityError> {
    let identity = state.identity.resolve(req.headers()).map_err(|e| {
        debug!(path = %req.uri().path(), error = %e, "rejecting unauthenticated request");
        e
    })?;
    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

// -- Health check ------------------------------------------------------------

/// `GET /health` -- Returns `{"status": "ok"}` with 200 OK.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    operation_id = "HealthCheck",
    responses(
        (status = 200, description = "Health check OK")
    )
)]
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        r#"{"status":"ok"}"#,
    )
}

/// `GET /openapi.json`
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

// -- Upload ------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    success: bool,
    project_id: String,
    image_url: String,
    expires_at: u64,
}

/// `POST /api/upload` -- store a screenshot and create its project.
///
/// The body is the raw image; `Content-Type` is its declared MIME type.
#[utoipa::path(
    post,
    path = "/api/upload",
    tag = "Projects",
    operation_id = "UploadScreenshot",
    request_body(content = Vec<u8>, content_type = "image/png", description = "Raw PNG or JPEG bytes"),
    params(
        ("x-file-name" = Option<String>, Header, description = "Original file name, percent-encoded")
    ),
    responses(
        (status = 200, description = "Project created"),
        (status = 400, description = "Unsupported type, too large, or extension mismatch"),
        (status = 401, description = "No caller identity"),
        (status = 500, description = "A store failed; committed steps were undone")
    )
)]
async fn handle_upload(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<UploadResponse>, WorkflowError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let file_name = headers
        .get(FILE_NAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            percent_encoding::percent_decode_str(v)
                .decode_utf8_lossy()
                .into_owned()
        });

    let outcome = state
        .workflows
        .upload(
            &identity,
            UploadRequest {
                file: body,
                content_type,
                file_name,
            },
        )
        .await?;

    Ok(Json(UploadResponse {
        success: true,
        project_id: outcome.project_id,
        image_url: outcome.access.url,
        expires_at: outcome.access.expires_at,
    }))
}

// -- Generation --------------------------------------------------------------

/// JSON body of `POST /api/scaffold`.
#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
struct ScaffoldBody {
    #[garde(length(min = 1, max = 10000))]
    prompt: String,
    #[garde(length(min = 1, max = 128))]
    project_id: String,
    #[garde(skip)]
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    preferences: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScaffoldResult {
    success: bool,
    artifact_id: String,
    preview_url: String,
    status: String,
    message: String,
}

/// `POST /api/scaffold` -- generate code for a project and meter the quota.
#[utoipa::path(
    post,
    path = "/api/scaffold",
    tag = "Generation",
    operation_id = "ScaffoldProject",
    request_body = ScaffoldBody,
    responses(
        (status = 200, description = "Artifact generated"),
        (status = 400, description = "Missing prompt or project id"),
        (status = 404, description = "Unknown project or owned by another user"),
        (status = 429, description = "Monthly quota exhausted"),
        (status = 502, description = "Generation service answered with an error"),
        (status = 503, description = "Generation service unreachable or timed out")
    )
)]
async fn handle_scaffold(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    payload: Result<Json<ScaffoldBody>, JsonRejection>,
) -> Result<Json<ScaffoldResult>, WorkflowError> {
    let Json(body) = payload.map_err(|e| InputError::Invalid(e.body_text()))?;
    body.validate()
        .map_err(|report| InputError::Invalid(report.to_string()))?;

    let outcome = state
        .workflows
        .generate(
            &identity.user_id,
            GenerateRequest {
                project_id: body.project_id,
                prompt: body.prompt,
                preferences: body.preferences.unwrap_or_default(),
            },
        )
        .await?;

    Ok(Json(ScaffoldResult {
        success: true,
        artifact_id: outcome.artifact_id,
        preview_url: outcome.preview_url,
        status: outcome.status,
        message: outcome.message,
    }))
}

/// JSON body of `POST /api/generate-prompt`.
#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
struct GeneratePromptBody {
    #[garde(length(min = 1, max = 128))]
    project_id: String,
}

/// `POST /api/generate-prompt` -- suggest a prompt from the project's screenshot.
#[utoipa::path(
    post,
    path = "/api/generate-prompt",
    tag = "Generation",
    operation_id = "GeneratePrompt",
    request_body = GeneratePromptBody,
    responses(
        (status = 200, description = "Prompt with detected components, colors, typography and layout"),
        (status = 400, description = "Missing project id, or the project has no screenshot"),
        (status = 404, description = "Unknown project or owned by another user"),
        (status = 502, description = "Analysis service answered with an error"),
        (status = 503, description = "Analysis service unreachable, timed out, or gave no prompt")
    )
)]
async fn handle_generate_prompt(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    payload: Result<Json<GeneratePromptBody>, JsonRejection>,
) -> Result<Json<PromptSuggestion>, WorkflowError> {
    let Json(body) = payload.map_err(|e| InputError::Invalid(e.body_text()))?;
    body.validate()
        .map_err(|report| InputError::Invalid(report.to_string()))?;

    let suggestion = state
        .workflows
        .suggest_prompt(&identity.user_id, &body.project_id)
        .await?;
    Ok(Json(suggestion))
}

/// `GET /api/artifacts/{projectId}` -- the project's most recent artifact.
#[utoipa::path(
    get,
    path = "/api/artifacts/{projectId}",
    tag = "Generation",
    operation_id = "GetLatestArtifact",
    params(
        ("projectId" = String, Path, description = "Project id")
    ),
    responses(
        (status = 200, description = "Latest artifact"),
        (status = 404, description = "No such project or no artifact yet")
    )
)]
async fn handle_latest_artifact(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(project_id): Path<String>,
) -> Result<Json<ArtifactView>, WorkflowError> {
    let artifact = state
        .workflows
        .get_latest_artifact(&identity.user_id, &project_id)
        .await?;
    Ok(Json(artifact))
}

// -- Profile -----------------------------------------------------------------

/// `POST /api/ensure-profile` -- read or create the caller's profile.
#[utoipa::path(
    post,
    path = "/api/ensure-profile",
    tag = "Profile",
    operation_id = "EnsureProfile",
    responses(
        (status = 200, description = "Profile with remaining quota"),
        (status = 500, description = "Profile could not be read or created")
    )
)]
async fn handle_ensure_profile(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<ProfileView>, WorkflowError> {
    Ok(Json(state.workflows.ensure_profile(&identity).await?))
}

// -- Projects ----------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ProjectList {
    projects: Vec<ProjectView>,
}

/// `GET /api/projects` -- the caller's projects, newest first.
#[utoipa::path(
    get,
    path = "/api/projects",
    tag = "Projects",
    operation_id = "ListProjects",
    responses(
        (status = 200, description = "Projects with freshly signed image URLs")
    )
)]
async fn handle_list_projects(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<ProjectList>, WorkflowError> {
    let projects = state.workflows.list_projects(&identity.user_id).await?;
    Ok(Json(ProjectList { projects }))
}

/// `GET /api/projects/{id}` -- one project with a fresh image URL.
#[utoipa::path(
    get,
    path = "/api/projects/{id}",
    tag = "Projects",
    operation_id = "GetProject",
    params(
        ("id" = String, Path, description = "Project id")
    ),
    responses(
        (status = 200, description = "Project"),
        (status = 404, description = "Unknown project or owned by another user")
    )
)]
async fn handle_get_project(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<Json<ProjectView>, WorkflowError> {
    Ok(Json(
        state.workflows.get_project(&identity.user_id, &id).await?,
    ))
}

// -- Signed object reads -----------------------------------------------------

#[derive(Debug, Deserialize)]
struct SignedQuery {
    expires: u64,
    sig: String,
}

/// `GET /objects/{path}?expires=&sig=` -- serve an object to a signed URL.
#[utoipa::path(
    get,
    path = "/objects/{path}",
    tag = "Objects",
    operation_id = "ReadObject",
    params(
        ("path" = String, Path, description = "Object path"),
        ("expires" = u64, Query, description = "Unix expiry of the URL"),
        ("sig" = String, Query, description = "URL signature")
    ),
    responses(
        (status = 200, description = "Object bytes"),
        (status = 403, description = "Missing, expired or tampered signature"),
        (status = 404, description = "No object at this path")
    )
)]
async fn handle_read_object(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    query: Option<Query<SignedQuery>>,
) -> Response {
    let Some(Query(query)) = query else {
        return forbidden("Missing signature");
    };
    if let Err(e) = state.signer.verify(&path, query.expires, &query.sig) {
        debug!(path = %path, error = %e, "refusing signed read");
        return forbidden(match e {
            SignatureError::Expired => "Signed URL has expired",
            SignatureError::Mismatch => "Signature does not match",
        });
    }

    match state.objects.get(&path).await {
        Ok(object) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, object.content_type),
                (header::CACHE_CONTROL, "private, no-store".to_string()),
            ],
            object.data,
        )
            .into_response(),
        Err(e) => {
            debug!(path = %path, error = %e, "signed read of missing object");
            WorkflowError::NotFound.into_response()
        }
    }
}

// -- Identity-provider webhooks ----------------------------------------------

/// `POST /webhooks/identity` -- sync a profile from a signed provider event.
#[utoipa::path(
    post,
    path = "/webhooks/identity",
    tag = "Webhooks",
    operation_id = "IdentityWebhook",
    request_body(content = String, content_type = "application/json", description = "Provider event"),
    params(
        ("svix-id" = String, Header, description = "Delivery id"),
        ("svix-timestamp" = u64, Header, description = "Unix send time"),
        ("svix-signature" = String, Header, description = "Space-separated v1 signatures")
    ),
    responses(
        (status = 200, description = "Event applied or ignored"),
        (status = 400, description = "Bad signature, stale delivery, or malformed event"),
        (status = 500, description = "Profile could not be written")
    )
)]
async fn handle_identity_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, Response> {
    let Some(verifier) = state.webhook.as_ref() else {
        return Err(WorkflowError::NotFound.into_response());
    };
    verifier.verify(&headers, &body).map_err(|e| {
        debug!(error = %e, "rejecting webhook delivery");
        e.into_response()
    })?;

    let event: IdentityEvent = serde_json::from_slice(&body).map_err(|e| {
        WorkflowError::from(InputError::Invalid(format!("Malformed event: {e}"))).into_response()
    })?;
    let outcome = state
        .workflows
        .sync_profile(event)
        .await
        .map_err(IntoResponse::into_response)?;

    Ok(Json(serde_json::json!({
        "success": true,
        "outcome": outcome.as_str(),
    })))
}

fn forbidden(message: &str) -> Response {
    let body = serde_json::json!({
        "success": false,
        "error": "Forbidden",
        "message": message,
    });
    (
        StatusCode::FORBIDDEN,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::identity::TrustedHeaderResolver;
    use crate::metadata::memory::MemoryRecordStore;
    use crate::metadata::store::RecordStore;
    use crate::storage::memory::MemoryBackend;
    use crate::testing::{
        png_bytes, test_signer, StubAnalyzer, StubBehavior, StubGenerator, ANALYSIS_REPLY,
        TEST_BASE_URL,
    };
    use crate::webhook::WebhookVerifier;
    use crate::workflow::{WorkflowSettings, Workflows};
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        objects: Arc<MemoryBackend>,
        records: Arc<MemoryRecordStore>,
        generator: Arc<StubGenerator>,
        analyzer: Arc<StubAnalyzer>,
    }

    const WEBHOOK_SECRET: &str = "provider-webhook-secret";

    fn test_app() -> TestApp {
        let config = Config::default();
        let objects = Arc::new(MemoryBackend::new(test_signer()));
        let records = Arc::new(MemoryRecordStore::new());
        let generator = Arc::new(StubGenerator::new(StubBehavior::Succeed));
        let analyzer = Arc::new(StubAnalyzer::new(ANALYSIS_REPLY));
        let workflows = Workflows::new(
            records.clone(),
            objects.clone(),
            generator.clone(),
            analyzer.clone(),
            WorkflowSettings::from_config(&config),
        );
        let state = Arc::new(AppState {
            config,
            objects: objects.clone(),
            signer: test_signer(),
            identity: Arc::new(TrustedHeaderResolver::new("x-user-id").unwrap()),
            webhook: Some(webhook_verifier()),
            workflows,
        });
        TestApp {
            router: app(state),
            objects,
            records,
            generator,
            analyzer,
        }
    }

    fn webhook_verifier() -> WebhookVerifier {
        WebhookVerifier::new(WEBHOOK_SECRET, Duration::from_secs(300)).unwrap()
    }

    fn webhook_request(body: &serde_json::Value, signed: bool) -> Request<Body> {
        let body = body.to_string();
        let timestamp = crate::storage::signing::unix_now();
        let signature = if signed {
            webhook_verifier().sign("msg_1", timestamp, body.as_bytes())
        } else {
            "v1,bm90LWEtc2lnbmF0dXJl".to_string()
        };
        Request::builder()
            .method("POST")
            .uri("/webhooks/identity")
            .header("content-type", "application/json")
            .header("svix-id", "msg_1")
            .header("svix-timestamp", timestamp.to_string())
            .header("svix-signature", signature)
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(app: &TestApp, req: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
        let response = app.router.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body)
    }

    fn json(body: &Bytes) -> serde_json::Value {
        serde_json::from_slice(body).unwrap()
    }

    fn upload_request(user: &str, content_type: &str, data: Bytes) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/upload")
            .header("x-user-id", user)
            .header("content-type", content_type)
            .header("x-file-name", "home%20page.png")
            .body(Body::from(data))
            .unwrap()
    }

    fn scaffold_request(user: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/scaffold")
            .header("x-user-id", user)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str, user: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(user) = user {
            builder = builder.header("x-user-id", user);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn upload(app: &TestApp, user: &str) -> serde_json::Value {
        let (status, _, body) = send(app, upload_request(user, "image/png", png_bytes(64))).await;
        assert_eq!(status, StatusCode::OK);
        json(&body)
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = test_app();
        let (status, headers, body) = send(&app, get("/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["status"], "ok");
        assert_eq!(headers.get("server").unwrap(), "MockCodes");
        assert!(headers.contains_key("date"));
        assert!(headers.contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_api_requires_identity() {
        let app = test_app();
        let (status, _, body) = send(
            &app,
            Request::builder()
                .method("POST")
                .uri("/api/upload")
                .header("content-type", "image/png")
                .body(Body::from(png_bytes(64)))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json(&body)["error"], "Unauthorized");
        assert!(app.objects.is_empty().await);
    }

    #[tokio::test]
    async fn test_upload_then_signed_read() {
        let app = test_app();
        let uploaded = upload(&app, "u1").await;
        assert_eq!(uploaded["success"], true);
        let project_id = uploaded["projectId"].as_str().unwrap();
        assert!(!project_id.is_empty());

        let url = uploaded["imageUrl"].as_str().unwrap();
        let relative = url.strip_prefix(TEST_BASE_URL).unwrap();
        let (status, headers, body) = send(&app, get(relative, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get("content-type").unwrap(), "image/png");
        assert_eq!(body, png_bytes(64));
    }

    #[tokio::test]
    async fn test_signed_read_rejects_tampering() {
        let app = test_app();
        let uploaded = upload(&app, "u1").await;
        let url = uploaded["imageUrl"].as_str().unwrap();
        let relative = url.strip_prefix(TEST_BASE_URL).unwrap();

        let (path, query) = relative.split_once('?').unwrap();
        let other_path = format!("{}x.png?{query}", path.trim_end_matches(".png"));
        let (status, _, _) = send(&app, get(&other_path, None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _, _) = send(&app, get(path, None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_signed_read_expired() {
        let app = test_app();
        upload(&app, "u1").await;
        let project = app.records.list_projects("u1").await.unwrap().remove(0);
        let path = project.image_ref.unwrap();
        let expired = test_signer().sign_until(&path, 1);
        let relative = expired.url.strip_prefix(TEST_BASE_URL).unwrap();
        let (status, _, body) = send(&app, get(relative, None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json(&body)["message"], "Signed URL has expired");
    }

    #[tokio::test]
    async fn test_upload_rejects_unsupported_type() {
        let app = test_app();
        let (status, _, body) = send(
            &app,
            upload_request("u1", "image/gif", Bytes::from_static(b"GIF89a")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body = json(&body);
        assert_eq!(body["error"], "InvalidInput");
        assert_eq!(body["retryable"], false);
        assert!(app.objects.is_empty().await);
    }

    #[tokio::test]
    async fn test_scaffold_and_fetch_artifact() {
        let app = test_app();
        let uploaded = upload(&app, "u1").await;
        let project_id = uploaded["projectId"].as_str().unwrap().to_string();

        let (status, _, body) = send(
            &app,
            scaffold_request(
                "u1",
                serde_json::json!({"prompt": "a pricing page", "projectId": project_id}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let body = json(&body);
        assert_eq!(body["success"], true);
        assert_eq!(body["artifactId"], "art-1");
        assert_eq!(body["message"], "Code generated successfully");

        let (status, _, body) =
            send(&app, get(&format!("/api/artifacts/{project_id}"), Some("u1"))).await;
        assert_eq!(status, StatusCode::OK);
        let artifact = json(&body);
        assert_eq!(artifact["id"], "art-1");
        assert!(artifact["html"].as_str().unwrap().contains("a pricing page"));

        let (status, _, body) =
            send(&app, get(&format!("/api/projects/{project_id}"), Some("u1"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["status"], "completed");
    }

    #[tokio::test]
    async fn test_scaffold_validation() {
        let app = test_app();
        let (status, _, body) = send(
            &app,
            scaffold_request("u1", serde_json::json!({"prompt": "", "projectId": "p1"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["error"], "InvalidInput");

        let (status, _, _) = send(
            &app,
            scaffold_request("u1", serde_json::json!({"prompt": "hello"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(app.generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_scaffold_foreign_project_is_not_found() {
        let app = test_app();
        let uploaded = upload(&app, "u1").await;
        let project_id = uploaded["projectId"].as_str().unwrap();

        let (status, _, _) = send(
            &app,
            scaffold_request(
                "u2",
                serde_json::json!({"prompt": "steal", "projectId": project_id}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(app.generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_scaffold_upstream_failure() {
        let app = test_app();
        let uploaded = upload(&app, "u1").await;
        let project_id = uploaded["projectId"].as_str().unwrap();
        app.generator
            .set_behavior(StubBehavior::Upstream(500, "model crashed".to_string()));

        let (status, _, body) = send(
            &app,
            scaffold_request(
                "u1",
                serde_json::json!({"prompt": "hero", "projectId": project_id}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json(&body)["error"], "GenerationServiceError");
    }

    #[tokio::test]
    async fn test_generate_prompt_for_own_project() {
        let app = test_app();
        let uploaded = upload(&app, "u1").await;
        let project_id = uploaded["projectId"].as_str().unwrap();
        let request = |user: &str, body: serde_json::Value| {
            Request::builder()
                .method("POST")
                .uri("/api/generate-prompt")
                .header("x-user-id", user)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap()
        };

        let (status, _, body) =
            send(&app, request("u1", serde_json::json!({"projectId": project_id}))).await;
        assert_eq!(status, StatusCode::OK);
        let body = json(&body);
        assert_eq!(body["prompt"], "Rebuild the landing page hero");
        assert_eq!(body["components"][0], "navbar");
        assert_eq!(body["layout"], "single column");

        let (status, _, _) =
            send(&app, request("u2", serde_json::json!({"projectId": project_id}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, _) = send(&app, request("u1", serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(app.analyzer.call_count(), 1);
    }

    #[tokio::test]
    async fn test_identity_webhook_syncs_profile() {
        let app = test_app();
        let event = serde_json::json!({
            "type": "user.created",
            "data": {
                "id": "user_9",
                "email_addresses": [{"email_address": "nine@example.com", "id": "e1"}],
                "first_name": "Nine",
                "last_name": null,
                "image_url": ""
            }
        });

        let (status, _, body) = send(&app, webhook_request(&event, false)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["error"], "InvalidWebhook");
        assert!(app.records.get_profile("user_9").await.unwrap().is_none());

        let (status, _, body) = send(&app, webhook_request(&event, true)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["outcome"], "created");
        let profile = app.records.get_profile("user_9").await.unwrap().unwrap();
        assert_eq!(profile.email, "nine@example.com");
        assert_eq!(profile.avatar_url, None);

        let (status, _, _) =
            send(&app, webhook_request(&serde_json::json!({"type": "user.created"}), true)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_projects_scoped_to_caller() {
        let app = test_app();
        upload(&app, "u1").await;
        upload(&app, "u1").await;
        upload(&app, "u2").await;

        let (status, _, body) = send(&app, get("/api/projects", Some("u1"))).await;
        assert_eq!(status, StatusCode::OK);
        let projects = json(&body)["projects"].as_array().unwrap().clone();
        assert_eq!(projects.len(), 2);
        for project in projects {
            assert_eq!(project["status"], "active");
            assert!(project["image"]["url"]
                .as_str()
                .unwrap()
                .starts_with(TEST_BASE_URL));
        }
    }

    #[tokio::test]
    async fn test_ensure_profile() {
        let app = test_app();
        let request = || {
            Request::builder()
                .method("POST")
                .uri("/api/ensure-profile")
                .header("x-user-id", "u1")
                .body(Body::empty())
                .unwrap()
        };

        let (status, _, body) = send(&app, request()).await;
        assert_eq!(status, StatusCode::OK);
        let profile = json(&body);
        assert_eq!(profile["created"], true);
        assert_eq!(profile["quotaRemaining"], 15);

        let (_, _, body) = send(&app, request()).await;
        assert_eq!(json(&body)["created"], false);
    }

    #[tokio::test]
    async fn test_openapi_document_lists_routes() {
        let app = test_app();
        let (status, _, body) = send(&app, get("/openapi.json", None)).await;
        assert_eq!(status, StatusCode::OK);
        let doc = json(&body);
        assert!(doc["paths"]["/api/upload"].is_object());
        assert!(doc["paths"]["/api/scaffold"].is_object());
        assert!(doc["paths"]["/objects/{path}"].is_object());
        assert!(doc["paths"]["/api/generate-prompt"].is_object());
        assert!(doc["paths"]["/webhooks/identity"].is_object());

        let upload_body = &doc["paths"]["/api/upload"]["post"]["requestBody"]["content"];
        assert!(upload_body["image/png"].is_object());
        let scaffold_body = &doc["paths"]["/api/scaffold"]["post"]["requestBody"]["content"];
        assert!(scaffold_body["application/json"].is_object());
        assert!(doc["components"]["schemas"]["ScaffoldBody"]["properties"]["projectId"].is_object());
    }
}
