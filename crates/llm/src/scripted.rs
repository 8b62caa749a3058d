//! In-memory gateway that replays canned outcomes.  Used by tests and for
//! exercising the daemon without a model server.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::{InferenceGateway, InferenceOutcome, InferenceRequest};

#[derive(Debug)]
pub struct ScriptedGateway {
    model: String,
    available: bool,
    replies: Mutex<VecDeque<InferenceOutcome>>,
    requests: Mutex<Vec<InferenceRequest>>,
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            model: "scripted".to_string(),
            available: true,
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A gateway whose liveness probe fails.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    /// Queue an outcome for the next `generate` call.
    pub fn push(&self, outcome: InferenceOutcome) -> &Self {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(outcome);
        }
        self
    }

    pub fn push_json(&self, value: Value) -> &Self {
        self.push(InferenceOutcome::Structured(value))
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<InferenceRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl InferenceGateway for ScriptedGateway {
    fn model(&self) -> &str {
        &self.model
    }

    /// Pops the next queued outcome; an exhausted script answers `Empty`.
    async fn generate(&self, request: InferenceRequest) -> InferenceOutcome {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        self.replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.pop_front())
            .unwrap_or(InferenceOutcome::Empty)
    }

    async fn is_available(&self) -> bool {
        self.available
    }
}
