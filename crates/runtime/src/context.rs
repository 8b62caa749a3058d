use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::warn;

use subconscious_config::DaemonConfig;
use subconscious_llm::InferenceGateway;
use subconscious_playbook::Playbook;
use subconscious_sessions::{IdLedger, SessionScanner, SessionTrace};

use crate::pipeline::PipelineSettings;
use crate::stats::{DaemonPhase, DaemonStats};
use crate::training::TrainingQueue;

pub const EXTRACTED_FILE: &str = "extracted_sessions.json";

/// Everything a scheduled task may read or mutate.  Owned by the daemon loop;
/// tasks borrow it mutably one at a time, so nothing here is locked.
pub struct DaemonContext {
    pub config: DaemonConfig,
    pub gateway: Arc<dyn InferenceGateway>,
    pub playbook: Playbook,
    pub scanner: SessionScanner,
    /// Sessions the Extract task has already visited.
    pub extracted: IdLedger,
    pub training: TrainingQueue,
    pub stats: DaemonStats,
}

impl DaemonContext {
    /// Open the playbook and cursors named by `config`.  Directories are
    /// expected to exist already (see [`DaemonConfig::ensure_dirs`]).
    pub fn open(config: DaemonConfig, gateway: Arc<dyn InferenceGateway>) -> Result<Self> {
        let state_dir = config.state_dir();
        let playbook = Playbook::open(config.playbook_path(), config.playbook.token_budget)
            .context("open playbook")?;
        let scanner = SessionScanner::new(config.sessions_dir(), &state_dir);
        let extracted = IdLedger::load(state_dir.join(EXTRACTED_FILE));
        let training = TrainingQueue::new(&config.training_dir());

        Ok(Self {
            config,
            gateway,
            playbook,
            scanner,
            extracted,
            training,
            stats: DaemonStats::new(Utc::now()),
        })
    }

    pub fn state_dir(&self) -> PathBuf {
        self.config.state_dir()
    }

    pub fn phase(&self) -> DaemonPhase {
        self.stats.phase
    }

    pub fn set_phase(&mut self, phase: DaemonPhase) {
        self.stats.phase = phase;
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            similarity_threshold: self.config.playbook.dedup_similarity_threshold,
            digest_per_section: self.config.playbook.reflector_digest_per_section,
        }
    }

    /// Snapshot stats to disk.  Failure is logged; it never fails a cycle.
    pub fn save_stats(&self) {
        if let Err(err) = self.stats.save(&self.state_dir()) {
            warn!(error = %err, "could not write daemon stats");
        }
    }

    /// Every complete session that still parses, in scanner order.
    pub fn complete_sessions(&self) -> Vec<SessionTrace> {
        self.scanner
            .find_all_sessions()
            .iter()
            .filter_map(|dir| self.scanner.parse_session(dir))
            .collect()
    }
}
