//! Persisted scheduling cursors owned by the periodic tasks.
//!
//! A missing or malformed cursor file reads as "never run", so the owning
//! task simply becomes due again.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use subconscious_core::{lenient_timestamp, read_json_or_default, write_json_atomic};

pub const REANALYSIS_FILE: &str = "reanalysis_state.json";
pub const EVALUATION_FILE: &str = "last_eval.json";

fn is_due(last: Option<DateTime<Utc>>, interval: TimeDelta, now: DateTime<Utc>) -> bool {
    last.is_none_or(|at| now - at >= interval)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReanalysisState {
    pub epoch: u64,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub last_run: Option<DateTime<Utc>>,
    pub sessions_reviewed: usize,
}

impl ReanalysisState {
    pub fn path(state_dir: &Path) -> PathBuf {
        state_dir.join(REANALYSIS_FILE)
    }

    pub fn load(state_dir: &Path) -> Self {
        read_json_or_default(&Self::path(state_dir))
    }

    pub fn save(&self, state_dir: &Path) -> Result<()> {
        write_json_atomic(&Self::path(state_dir), self)
    }

    pub fn is_due(&self, interval: TimeDelta, now: DateTime<Utc>) -> bool {
        is_due(self.last_run, interval, now)
    }
}

/// Outcome of the most recent self-evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationRecord {
    #[serde(deserialize_with = "lenient_timestamp")]
    pub last_eval: Option<DateTime<Utc>>,
    pub pruned: usize,
    pub deduped: usize,
    pub total_bullets: usize,
    pub avg_quality: f64,
}

impl EvaluationRecord {
    pub fn path(state_dir: &Path) -> PathBuf {
        state_dir.join(EVALUATION_FILE)
    }

    pub fn load(state_dir: &Path) -> Self {
        read_json_or_default(&Self::path(state_dir))
    }

    pub fn save(&self, state_dir: &Path) -> Result<()> {
        write_json_atomic(&Self::path(state_dir), self)
    }

    pub fn is_due(&self, interval: TimeDelta, now: DateTime<Utc>) -> bool {
        is_due(self.last_eval, interval, now)
    }
}
