//! Prometheus metrics for MockCodes.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides a Tower-compatible middleware for
//! HTTP RED metrics, and exposes the `/metrics` endpoint handler.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "mockcodes_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "mockcodes_http_request_duration_seconds";

/// Upload workflow runs (counter). Labels: outcome.
pub const UPLOADS_TOTAL: &str = "mockcodes_uploads_total";

/// Generation workflow runs (counter). Labels: outcome.
pub const GENERATIONS_TOTAL: &str = "mockcodes_generations_total";

/// Latency of the external generation call in seconds (histogram).
pub const GENERATION_DURATION_SECONDS: &str = "mockcodes_generation_duration_seconds";

/// Prompt suggestion runs (counter). Labels: outcome.
pub const PROMPT_SUGGESTIONS_TOTAL: &str = "mockcodes_prompt_suggestions_total";

/// Identity-provider profile sync events (counter). Labels: outcome.
pub const PROFILE_SYNCS_TOTAL: &str = "mockcodes_profile_syncs_total";

/// Compensation steps executed (counter). Labels: step, result.
pub const COMPENSATIONS_TOTAL: &str = "mockcodes_compensations_total";

/// Generations refused because the quota was exhausted (counter).
pub const QUOTA_DENIALS_TOTAL: &str = "mockcodes_quota_denials_total";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times (e.g. in tests). Returns a reference to the global handle.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    })
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(UPLOADS_TOTAL, "Upload workflow runs by outcome");
    describe_counter!(GENERATIONS_TOTAL, "Generation workflow runs by outcome");
    describe_histogram!(
        GENERATION_DURATION_SECONDS,
        "External generation call latency in seconds"
    );
    describe_counter!(PROMPT_SUGGESTIONS_TOTAL, "Prompt suggestion runs by outcome");
    describe_counter!(PROFILE_SYNCS_TOTAL, "Identity-provider profile syncs by outcome");
    describe_counter!(COMPENSATIONS_TOTAL, "Compensation steps by result");
    describe_counter!(QUOTA_DENIALS_TOTAL, "Generations refused for exhausted quota");
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// Excludes `/metrics` from self-instrumentation to avoid feedback loops.
/// Must be the outermost layer so it captures the full request lifecycle.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

// -- Path normalization -------------------------------------------------------

/// Normalize an actual request path to a route template for metric labels.
///
/// Examples:
/// - `/api/upload` -> `/api/upload`
/// - `/api/artifacts/3f2a...` -> `/api/artifacts/{projectId}`
/// - `/api/projects/3f2a...` -> `/api/projects/{id}`
/// - `/objects/screenshots/ab/1.png` -> `/objects/{path}`
/// - anything unrouted -> `/{other}`
fn normalize_path(path: &str) -> String {
    match path {
        "/health" | "/metrics" | "/openapi.json" | "/api/upload" | "/api/scaffold"
        | "/api/ensure-profile" | "/api/projects" => path.to_string(),
        _ if path.starts_with("/api/artifacts/") => "/api/artifacts/{projectId}".to_string(),
        _ if path.starts_with("/api/projects/") => "/api/projects/{id}".to_string(),
        _ if path.starts_with("/objects/") => "/objects/{path}".to_string(),
        _ => "/{other}".to_string(),
    }
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Render Prometheus exposition format text.
pub async fn metrics_handler() -> impl IntoResponse {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [("content-type", "text/plain; version=0.0.4")],
            "metrics recorder not installed\n".to_string(),
        ),
    }
}

// -- Tests --------------------------------------------------------------------
