//! Client for the screenshot analysis service.
//!
//! A vision model looks at a project's screenshot and writes a prompt that
//! the generation service can turn into code.  The service speaks the
//! chat-completions protocol; the model is asked for a JSON object and its
//! reply is parsed into a [`PromptSuggestion`].

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::config::AnalysisConfig;
use crate::generation::GenerationFailure;

const SYSTEM_INSTRUCTIONS: &str = "You are a senior UI engineer. Study the screenshot and write a \
prompt that lets a developer rebuild the same interface with HTML, Tailwind CSS and JavaScript. \
Cover layout and positioning, every component, colors as Tailwind classes, typography, spacing, \
hover states, responsive behavior and image or icon placeholders. Reply with one JSON object: \
{\"prompt\": string, \"components\": [string], \"colors\": [string], \"typography\": [string], \
\"layout\": string}.";

const USER_INSTRUCTIONS: &str =
    "Analyze this UI screenshot and write a complete prompt for recreating it.";

/// A generation prompt derived from a screenshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSuggestion {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub colors: Vec<String>,
    #[serde(default)]
    pub typography: Vec<String>,
    #[serde(default)]
    pub layout: String,
}

impl PromptSuggestion {
    /// Parse the model's reply.
    ///
    /// A reply that is not a JSON object is used verbatim as the prompt with
    /// generic descriptors.  A JSON reply without a prompt is rejected.
    pub fn from_model_output(content: &str) -> Result<Self, GenerationFailure> {
        let trimmed = strip_code_fence(content.trim());
        match serde_json::from_str::<PromptSuggestion>(trimmed) {
            Ok(parsed) if parsed.prompt.trim().is_empty() => Err(GenerationFailure::Decode(
                "analysis reply has no prompt".to_string(),
            )),
            Ok(parsed) => Ok(parsed),
            Err(_) if content.trim().is_empty() => Err(GenerationFailure::Decode(
                "analysis reply is empty".to_string(),
            )),
            Err(_) => Ok(Self {
                prompt: content.trim().to_string(),
                components: vec!["UI Elements".to_string()],
                colors: vec!["Various colors detected".to_string()],
                typography: vec!["Multiple font styles".to_string()],
                layout: "Complex layout structure".to_string(),
            }),
        }
    }
}

/// Models sometimes wrap JSON in a Markdown fence.
fn strip_code_fence(content: &str) -> &str {
    content
        .strip_prefix("```json")
        .or_else(|| content.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(content)
}

/// Turns a screenshot into the raw text of a model reply.
pub trait PromptAnalyzer: Send + Sync + 'static {
    /// `image` is a `data:{mime};base64,...` URI.
    fn analyze(
        &self,
        image: String,
    ) -> Pin<Box<dyn Future<Output = Result<String, GenerationFailure>> + Send + '_>>;
}

#[derive(Deserialize)]
struct Completion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// `reqwest`-based [`PromptAnalyzer`] for chat-completions services.
#[derive(Clone)]
pub struct HttpPromptAnalyzer {
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpPromptAnalyzer {
    pub fn new(config: &AnalysisConfig) -> anyhow::Result<Self> {
        let timeout = config.timeout();
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            max_tokens: config.max_tokens,
            timeout,
            client,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn request_body(&self, image: &str) -> serde_json::Value {
        json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": 0.1,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": SYSTEM_INSTRUCTIONS},
                {"role": "user", "content": [
                    {"type": "text", "text": USER_INSTRUCTIONS},
                    {"type": "image_url", "image_url": {"url": image, "detail": "high"}}
                ]}
            ]
        })
    }
}

impl PromptAnalyzer for HttpPromptAnalyzer {
    fn analyze(
        &self,
        image: String,
    ) -> Pin<Box<dyn Future<Output = Result<String, GenerationFailure>> + Send + '_>> {
        Box::pin(async move {
            let mut request = self
                .client
                .post(self.completions_url())
                .json(&self.request_body(&image));
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            let response = request.send().await.map_err(|e| {
                if e.is_timeout() {
                    GenerationFailure::Timeout(self.timeout)
                } else {
                    GenerationFailure::Transport(e.to_string())
                }
            })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(GenerationFailure::Upstream {
                    status: status.as_u16(),
                    body,
                });
            }

            let completion = response
                .json::<Completion>()
                .await
                .map_err(|e| GenerationFailure::Decode(e.to_string()))?;
            completion
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .filter(|content| !content.trim().is_empty())
                .ok_or_else(|| GenerationFailure::Decode("no completion content".to_string()))
        })
    }
}
