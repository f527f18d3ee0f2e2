//! Workflow error taxonomy.
//!
//! Every variant is a distinct, caller-legible condition.  The enum
//! implements [`axum::response::IntoResponse`] so handlers can simply
//! return `Err(WorkflowError::NotFound)`.  Adapter failures arrive as
//! `anyhow::Error` and are kept as the source of the workflow variant.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::generation::GenerationFailure;

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

/// Why an upload or generation request was rejected before any side effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    /// Declared MIME type is not PNG or JPEG.
    #[error("Invalid file type '{0}'. Only PNG and JPEG files are allowed.")]
    UnsupportedMediaType(String),

    /// File exceeds the configured size limit.
    #[error("File size {size} exceeds the maximum of {max} bytes")]
    TooLarge { size: u64, max: u64 },

    /// File-name extension disagrees with the declared MIME type.
    #[error("File extension '{extension}' does not match file type '{mime}'")]
    InvalidExtension { extension: String, mime: String },

    /// A required field was absent or empty.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Request body failed validation.
    #[error("{0}")]
    Invalid(String),
}

/// Errors surfaced by the upload, generation and read-path workflows.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Caller error; no side effects were performed.
    #[error(transparent)]
    InvalidInput(#[from] InputError),

    /// Unknown project or artifact, or one owned by another user.
    #[error("Project not found")]
    NotFound,

    /// The object store rejected a write.
    #[error("Failed to upload file to storage")]
    StorageWriteFailed(#[source] anyhow::Error),

    /// The object store failed to read or sign an object.
    #[error("Failed to read from storage")]
    StorageReadFailed(#[source] anyhow::Error),

    /// Reading or creating the user profile failed during upload.
    #[error("Failed to ensure user profile")]
    ProfileError(#[source] anyhow::Error),

    /// Inserting the project record failed during upload.
    #[error("Failed to create project")]
    ProjectCreateFailed(#[source] anyhow::Error),

    /// A project status transition could not be persisted.
    #[error("Failed to update project status")]
    StatusUpdateFailed(#[source] anyhow::Error),

    /// The generated artifact could not be persisted.
    #[error("Failed to store generated artifact")]
    ArtifactStoreFailed(#[source] anyhow::Error),

    /// Transport failure or timeout talking to the generation service.
    #[error("AI service temporarily unavailable. Please try again. ({0})")]
    GenerationServiceUnavailable(String),

    /// The generation service answered with a non-success status.
    #[error("AI service error: {status} - {body}")]
    GenerationServiceError { status: u16, body: String },

    /// The monthly quota is exhausted.
    #[error("Monthly prompt quota exceeded. Please upgrade your plan or wait for next month.")]
    QuotaExceeded,

    /// The quota decrement itself failed.
    #[error("Failed to check prompt quota")]
    QuotaCheckFailed(#[source] anyhow::Error),
}

impl WorkflowError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::InvalidInput(InputError::InvalidExtension { .. }) => "InvalidExtension",
            WorkflowError::InvalidInput(_) => "InvalidInput",
            WorkflowError::NotFound => "NotFound",
            WorkflowError::StorageWriteFailed(_) => "StorageWriteFailed",
            WorkflowError::StorageReadFailed(_) => "StorageReadFailed",
            WorkflowError::ProfileError(_) => "ProfileError",
            WorkflowError::ProjectCreateFailed(_) => "ProjectCreateFailed",
            WorkflowError::StatusUpdateFailed(_) => "StatusUpdateFailed",
            WorkflowError::ArtifactStoreFailed(_) => "ArtifactStoreFailed",
            WorkflowError::GenerationServiceUnavailable(_) => "GenerationServiceUnavailable",
            WorkflowError::GenerationServiceError { .. } => "GenerationServiceError",
            WorkflowError::QuotaExceeded => "QuotaExceeded",
            WorkflowError::QuotaCheckFailed(_) => "QuotaCheckFailed",
        }
    }

    /// Return the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            WorkflowError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            WorkflowError::NotFound => StatusCode::NOT_FOUND,
            WorkflowError::GenerationServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            WorkflowError::GenerationServiceError { .. } => StatusCode::BAD_GATEWAY,
            WorkflowError::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            WorkflowError::StorageWriteFailed(_)
            | WorkflowError::StorageReadFailed(_)
            | WorkflowError::ProfileError(_)
            | WorkflowError::ProjectCreateFailed(_)
            | WorkflowError::StatusUpdateFailed(_)
            | WorkflowError::ArtifactStoreFailed(_)
            | WorkflowError::QuotaCheckFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether resubmitting the same request can succeed without the
    /// caller changing anything.
    ///
    /// Input errors, unknown projects and exhausted quota are futile to
    /// retry; transport failures and transient store failures are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkflowError::InvalidInput(_)
            | WorkflowError::NotFound
            | WorkflowError::QuotaExceeded => false,
            WorkflowError::GenerationServiceError { status, .. } => *status >= 500,
            _ => true,
        }
    }
}

/// Upstream status and body pass through; every other failure is a
/// temporary unavailability.
impl From<GenerationFailure> for WorkflowError {
    fn from(failure: GenerationFailure) -> Self {
        match failure {
            GenerationFailure::Upstream { status, body } => {
                WorkflowError::GenerationServiceError { status, body }
            }
            other => WorkflowError::GenerationServiceUnavailable(other.to_string()),
        }
    }
}

impl IntoResponse for WorkflowError {
    fn into_response(self) -> Response {
        let request_id = generate_request_id();
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(
                request_id = %request_id,
                code = self.code(),
                error = ?self,
                "request failed"
            );
        }

        let body = serde_json::json!({
            "success": false,
            "error": self.code(),
            "message": self.to_string(),
            "retryable": self.is_retryable(),
            "requestId": request_id,
        });

        (
            status,
            [
                ("content-type", "application/json".to_string()),
                ("x-request-id", request_id),
            ],
            body.to_string(),
        )
            .into_response()
    }
}
