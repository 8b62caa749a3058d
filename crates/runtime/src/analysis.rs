//! Structured replies the model is asked for, and lenient decoding of them.
//!
//! Models drift from the requested schema in small ways (a missing field, a
//! string where a number was expected).  Each list item is decoded on its
//! own so one bad entry never discards the rest.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::taxonomy::FailureCategory;

/// Generator output for one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionAnalysis {
    pub overall_assessment: String,
    pub observations: Vec<Observation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    #[serde(default = "default_category")]
    pub category: FailureCategory,
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub recommendation: String,
    #[serde(default)]
    pub confidence: f64,
}

fn default_category() -> FailureCategory {
    FailureCategory::Other
}

/// One Reflector proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedBullet {
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_true")]
    pub is_new: bool,
    #[serde(default)]
    pub reasoning: String,
}

fn default_true() -> bool {
    true
}

fn decode_items<T: DeserializeOwned>(value: &Value, key: &str) -> Vec<T> {
    let Some(items) = value.get(key).and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<T>(item.clone()) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                debug!(key, error = %err, "dropping malformed item");
                None
            }
        })
        .collect()
}

impl SessionAnalysis {
    /// `None` when the reply is not a JSON object at all.
    pub fn from_value(value: &Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        Some(Self {
            overall_assessment: value
                .get("overall_assessment")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            observations: decode_items(value, "observations"),
        })
    }
}

/// Proposals from a Reflector reply, with the ones the model itself marked
/// as not new already dropped.
pub fn new_proposals(value: &Value) -> Vec<ProposedBullet> {
    decode_items::<ProposedBullet>(value, "proposed_bullets")
        .into_iter()
        .filter(|p| p.is_new)
        .collect()
}
