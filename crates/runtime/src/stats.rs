use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use subconscious_core::{read_json, write_json_atomic};

pub const STATS_FILE: &str = "daemon_stats.json";

/// Where the daemon loop currently is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DaemonPhase {
    #[default]
    Starting,
    Running,
    Reflecting,
    Extracting,
    Reanalyzing,
    Evaluating,
    Sleeping,
    Stopped,
}

impl fmt::Display for DaemonPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Reflecting => "reflecting",
            Self::Extracting => "extracting",
            Self::Reanalyzing => "reanalyzing",
            Self::Evaluating => "evaluating",
            Self::Sleeping => "sleeping",
            Self::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Counters snapshotted to `daemon_stats.json` after every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStats {
    pub started_at: DateTime<Utc>,
    pub phase: DaemonPhase,
    pub sessions_analyzed: u64,
    /// New bullets added by the Curator; reinforcements are not counted.
    pub deltas_applied: u64,
    pub training_pairs_extracted: u64,
    pub cycles_completed: u64,
    pub errors: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

impl DaemonStats {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            phase: DaemonPhase::Starting,
            sessions_analyzed: 0,
            deltas_applied: 0,
            training_pairs_extracted: 0,
            cycles_completed: 0,
            errors: 0,
            last_cycle_at: None,
        }
    }

    pub fn path(state_dir: &Path) -> PathBuf {
        state_dir.join(STATS_FILE)
    }

    pub fn save(&self, state_dir: &Path) -> Result<()> {
        write_json_atomic(&Self::path(state_dir), self)
    }

    /// Last snapshot written by a running (or finished) daemon, if any.
    pub fn load_snapshot(state_dir: &Path) -> Result<Option<Self>> {
        read_json(&Self::path(state_dir))
    }
}
