use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::{
    InferenceFailure, InferenceGateway, InferenceOutcome, InferenceRequest, parse_structured_reply,
};

/// Client for a local Ollama server (`/api/generate`, `/api/tags`).
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    request_timeout: Duration,
    probe_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature: 0.1,
            max_tokens: 4096,
            request_timeout: Duration::from_secs(120),
            probe_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeouts(mut self, request: Duration, probe: Duration) -> Self {
        self.request_timeout = request;
        self.probe_timeout = probe;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Names of every model the server has pulled.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let endpoint = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&endpoint)
            .timeout(self.probe_timeout)
            .send()
            .await
            .with_context(|| format!("Ollama unreachable at {}", self.base_url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Ollama /api/tags returned HTTP {status}");
        }

        let tags: TagsResponse = response.json().await.context("decode /api/tags")?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    fn payload(&self, request: &InferenceRequest) -> Value {
        let mut payload = json!({
            "model": self.model,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                "temperature": request.temperature.unwrap_or(self.temperature),
                "num_predict": request.max_tokens.unwrap_or(self.max_tokens),
            }
        });
        if let Some(system) = request.system.as_deref().filter(|s| !s.is_empty()) {
            payload["system"] = json!(system);
        }
        if request.structured {
            payload["format"] = json!("json");
        }
        payload
    }

    async fn generate_raw(&self, request: &InferenceRequest) -> Result<String, InferenceFailure> {
        let endpoint = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&endpoint)
            .timeout(self.request_timeout)
            .json(&self.payload(request))
            .send()
            .await
            .map_err(|err| self.classify(err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceFailure::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let body: GenerateResponse = response.json().await.map_err(|err| {
            if err.is_timeout() {
                InferenceFailure::Timeout(self.request_timeout)
            } else {
                InferenceFailure::Decode(err.to_string())
            }
        })?;
        Ok(body.response)
    }

    fn classify(&self, err: reqwest::Error) -> InferenceFailure {
        if err.is_timeout() {
            InferenceFailure::Timeout(self.request_timeout)
        } else {
            InferenceFailure::Transport(err.to_string())
        }
    }
}

/// Fuzzy model match: the configured name up to its tag (`qwen2.5-coder`
/// for `qwen2.5-coder:7b`) must appear in a listed model name.
pub(crate) fn model_listed(model: &str, listed: &[String]) -> bool {
    let family = model.split(':').next().unwrap_or(model);
    listed.iter().any(|name| name.contains(family))
}

#[async_trait]
impl InferenceGateway for OllamaClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: InferenceRequest) -> InferenceOutcome {
        debug!(
            model = %self.model,
            structured = request.structured,
            prompt_chars = request.prompt.len(),
            "inference request"
        );

        let raw = match self.generate_raw(&request).await {
            Ok(raw) => raw,
            Err(failure) => {
                warn!(model = %self.model, error = %failure, "inference request failed");
                return InferenceOutcome::Failed(failure);
            }
        };

        if raw.trim().is_empty() {
            return InferenceOutcome::Empty;
        }
        if !request.structured {
            return InferenceOutcome::Text(raw);
        }

        let outcome = parse_structured_reply(&raw);
        if let InferenceOutcome::Failed(failure) = &outcome {
            warn!(model = %self.model, error = %failure, "structured reply did not parse");
        }
        outcome
    }

    async fn is_available(&self) -> bool {
        let listed = match self.list_models().await {
            Ok(listed) => listed,
            Err(err) => {
                debug!(error = %err, "liveness probe failed");
                return false;
            }
        };

        if model_listed(&self.model, &listed) {
            return true;
        }
        warn!(
            model = %self.model,
            available = ?listed,
            "configured model not found on the inference server"
        );
        // The server itself is up; let the first request surface the problem.
        !listed.is_empty()
    }
}
