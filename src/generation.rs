//! Client for the external code-generation service.
//!
//! The service exposes `POST {endpoint}/scaffold`, which takes a prompt
//! plus an optional inline screenshot and answers with the id of the
//! artifact it produced.  Any non-2xx answer is a hard failure carrying
//! the upstream status and body.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Outbound generation request.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScaffoldRequest {
    pub prompt: String,
    pub project_id: String,
    /// `data:{mime};base64,{payload}` when the source image could be fetched.
    pub image_base64: Option<String>,
    pub preferences: serde_json::Map<String, serde_json::Value>,
}

/// Successful generation result.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ScaffoldResponse {
    pub artifact_id: String,
    pub preview_url: String,
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    /// Generated markup, when the service returns the payloads inline.
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub css: Option<String>,
    #[serde(default)]
    pub js: Option<String>,
}

/// Why a generation call produced no result.
#[derive(Debug, Error)]
pub enum GenerationFailure {
    /// The call did not finish within its time bound.
    #[error("generation request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection or protocol failure before a response was received.
    #[error("generation request failed: {0}")]
    Transport(String),

    /// The service answered with a non-success status.
    #[error("generation service returned {status}: {body}")]
    Upstream { status: u16, body: String },

    /// A success status whose body was not a valid result.
    #[error("invalid generation response: {0}")]
    Decode(String),
}

/// Sends generation requests to the external service.
pub trait GenerationClient: Send + Sync + 'static {
    fn scaffold(
        &self,
        request: ScaffoldRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ScaffoldResponse, GenerationFailure>> + Send + '_>>;
}

/// `reqwest`-based [`GenerationClient`].
#[derive(Clone)]
pub struct HttpGenerationClient {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpGenerationClient {
    /// Create a client targeting `base_url` with a per-request `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into(),
            timeout,
            client,
        })
    }

    fn scaffold_url(&self) -> String {
        format!("{}/scaffold", self.base_url.trim_end_matches('/'))
    }
}

impl GenerationClient for HttpGenerationClient {
    fn scaffold(
        &self,
        request: ScaffoldRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ScaffoldResponse, GenerationFailure>> + Send + '_>>
    {
        Box::pin(async move {
            let response = self
                .client
                .post(self.scaffold_url())
                .json(&request)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        GenerationFailure::Timeout(self.timeout)
                    } else {
                        GenerationFailure::Transport(e.to_string())
                    }
                })?;

            let status = response.status();
            if status.is_success() {
                return response
                    .json::<ScaffoldResponse>()
                    .await
                    .map_err(|e| GenerationFailure::Decode(e.to_string()));
            }

            let body = response.text().await.unwrap_or_default();
            Err(GenerationFailure::Upstream {
                status: status.as_u16(),
                body,
            })
        })
    }
}
