//! Inference gateway: the one place the daemon talks to a language model.
//!
//! Callers build an [`InferenceRequest`], hand it to an
//! [`InferenceGateway`], and get back an [`InferenceOutcome`].  Transport
//! errors, timeouts and unparsable structured output are all folded into
//! [`InferenceOutcome::Failed`]; the gateway never returns `Err` for a single
//! bad call, so a flaky model can never take down a daemon cycle.

mod ollama;
pub mod scripted;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

pub use ollama::OllamaClient;
pub use scripted::ScriptedGateway;

/// A single prompt sent to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    pub prompt: String,
    /// Optional system preamble.
    pub system: Option<String>,
    /// Ask the model for JSON and parse the reply.
    pub structured: bool,
    /// Overrides the gateway's default sampling temperature.
    pub temperature: Option<f32>,
    /// Overrides the gateway's default output length.
    pub max_tokens: Option<u32>,
}

impl InferenceRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            structured: false,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn structured(mut self) -> Self {
        self.structured = true;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Why a call produced nothing usable.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InferenceFailure {
    #[error("inference request timed out after {0:?}")]
    Timeout(Duration),
    #[error("inference transport error: {0}")]
    Transport(String),
    #[error("inference service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode inference response: {0}")]
    Decode(String),
    #[error("model reply is not valid JSON: {error}")]
    StructuredParse { error: String, preview: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum InferenceOutcome {
    /// Free-text reply (unstructured requests).
    Text(String),
    /// Parsed JSON reply (structured requests).
    Structured(Value),
    /// The model answered with nothing.
    Empty,
    Failed(InferenceFailure),
}

impl InferenceOutcome {
    /// The parsed JSON reply, if there is one.
    pub fn into_structured(self) -> Option<Value> {
        match self {
            Self::Structured(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Request/response capability the daemon is built against.  The production
/// implementation is [`OllamaClient`]; tests inject [`ScriptedGateway`].
#[async_trait]
pub trait InferenceGateway: Send + Sync {
    /// Name of the model requests are routed to.
    fn model(&self) -> &str;

    async fn generate(&self, request: InferenceRequest) -> InferenceOutcome;

    /// Whether the service is reachable and (ideally) has the expected model.
    async fn is_available(&self) -> bool;
}

/// Remove Markdown code fences from a model reply.
///
/// Models asked for JSON frequently wrap it in ` ```json ... ``` ` anyway.
/// Every line that starts with a fence marker is dropped.
pub fn strip_markdown_fences(raw: &str) -> String {
    let text = raw.trim();
    if !text.starts_with("```") {
        return text.to_string();
    }
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Extract the first valid JSON value from an LLM response.
///
/// Tries a ` ```json ` fenced block first, then the span between the first
/// `{` and the last `}`.  Returns `None` when neither parses.
///
/// ```rust
/// use subconscious_llm::extract_json_output;
///
/// let raw = "Sure!\n```json\n{\"observations\":[]}\n```";
/// let value: serde_json::Value = extract_json_output(raw).unwrap();
/// assert!(value["observations"].is_array());
/// ```
pub fn extract_json_output<T: serde::de::DeserializeOwned>(response: &str) -> Option<T> {
    if let Some(fence_start) = response.find("```json") {
        let after_fence = &response[fence_start + "```json".len()..];
        if let Some(json_start) = after_fence.find(|c: char| !c.is_whitespace()) {
            let json_body = &after_fence[json_start..];
            if let Some(fence_end) = json_body.find("```") {
                if let Ok(val) = serde_json::from_str(json_body[..fence_end].trim()) {
                    return Some(val);
                }
            }
        }
    }

    let trimmed = response.trim();
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            if let Ok(val) = serde_json::from_str(&trimmed[start..=end]) {
                return Some(val);
            }
        }
    }

    None
}

/// Turn a raw structured-mode reply into an outcome.
pub fn parse_structured_reply(raw: &str) -> InferenceOutcome {
    let text = strip_markdown_fences(raw);
    if text.is_empty() {
        return InferenceOutcome::Empty;
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(value) => InferenceOutcome::Structured(value),
        Err(err) => match extract_json_output::<Value>(&text) {
            Some(value) => InferenceOutcome::Structured(value),
            None => InferenceOutcome::Failed(InferenceFailure::StructuredParse {
                error: err.to_string(),
                preview: text.chars().take(200).collect(),
            }),
        },
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
