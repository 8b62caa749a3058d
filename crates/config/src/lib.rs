use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Inference gateway connection.  The daemon talks to a local Ollama server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL for the Ollama API.  Overridden by `SUBCONSCIOUS_OLLAMA_URL`.
    pub base_url: String,
    /// Model used for every analysis call.  Overridden by `SUBCONSCIOUS_MODEL`.
    pub model: String,
    pub temperature: f32,
    /// Upper bound on generated tokens (`num_predict`).
    pub max_tokens: u32,
    /// Per-request timeout.  A request that exceeds it resolves to a failure
    /// outcome instead of blocking the loop.
    pub request_timeout_secs: u64,
    /// Timeout for the startup liveness probe.
    pub probe_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "qwen2.5-coder:7b".to_string(),
            temperature: 0.1,
            max_tokens: 4096,
            request_timeout_secs: 120,
            probe_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Shared directory the coding agent writes finished sessions into.
    pub sessions_dir: String,
    /// The playbook document.
    pub playbook_path: String,
    /// Root of the training-pair queue (`queue/`, `ready/`, `used/`).
    pub training_dir: String,
    /// Cursor files, stats snapshot and the instance lock live here.
    pub state_dir: String,
    /// The daemon halts at the next cycle boundary while this file exists.
    pub kill_switch_path: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            sessions_dir: "/shared/sessions".to_string(),
            playbook_path: "/shared/playbook.json".to_string(),
            training_dir: "/shared/training".to_string(),
            state_dir: "/shared/daemon".to_string(),
            kill_switch_path: "/shared/STOP_SUBCONSCIOUS".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Idle sleep between cycles when no task class has pending work.
    pub scan_interval_secs: u64,
    /// Sleep after a cycle that failed.
    pub error_backoff_secs: u64,
    /// Minimum gap between two reanalysis epochs.
    pub reanalyze_interval_hours: u64,
    /// Minimum gap between two self-evaluations.
    pub self_eval_interval_hours: u64,
    /// Failed sessions revisited per reanalysis epoch.
    pub reanalyze_batch_size: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 30,
            error_backoff_secs: 60,
            reanalyze_interval_hours: 24,
            self_eval_interval_hours: 23,
            reanalyze_batch_size: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybookConfig {
    /// Token budget recorded in the playbook document for downstream renderers.
    pub token_budget: usize,
    /// Word-set Jaccard similarity at or above which two bullets are the same.
    pub dedup_similarity_threshold: f64,
    /// Bullets with enough evidence and a quality ratio below this are pruned.
    pub min_helpful_ratio: f64,
    /// A bullet not referenced within this many days counts as stale.
    pub stale_days: i64,
    /// Existing bullets per section shown to the reflector.
    pub reflector_digest_per_section: usize,
}

impl Default for PlaybookConfig {
    fn default() -> Self {
        Self {
            token_budget: 8000,
            dedup_similarity_threshold: 0.85,
            min_helpful_ratio: 0.3,
            stale_days: 14,
            reflector_digest_per_section: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Source files shorter than this many lines are not worth a training pair.
    pub min_source_lines: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self { min_source_lines: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
    /// When set, logs are also written to a daily rolling file in this directory.
    pub log_dir: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DaemonConfig {
    pub llm: LlmConfig,
    pub paths: PathsConfig,
    pub schedule: ScheduleConfig,
    pub playbook: PlaybookConfig,
    pub extract: ExtractConfig,
    pub telemetry: TelemetryConfig,
}

impl DaemonConfig {
    /// Load from a TOML file (defaults when it does not exist), then apply
    /// environment overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        config.apply_overrides(|key| env::var(key).ok());
        Ok(config)
    }

    fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(raw) => toml::from_str(&raw)
                .with_context(|| format!("invalid config file {}", path.display())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => {
                Err(err).with_context(|| format!("read config file {}", path.display()))
            }
        }
    }

    /// Apply `SUBCONSCIOUS_*` overrides from `lookup`.  Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = get("SUBCONSCIOUS_OLLAMA_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = get("SUBCONSCIOUS_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = get("SUBCONSCIOUS_SESSIONS_DIR") {
            self.paths.sessions_dir = value;
        }
        if let Some(value) = get("SUBCONSCIOUS_PLAYBOOK") {
            self.paths.playbook_path = value;
        }
        if let Some(value) = get("SUBCONSCIOUS_STATE_DIR") {
            self.paths.state_dir = value;
        }
        if let Some(value) = get("SUBCONSCIOUS_TRAINING_DIR") {
            self.paths.training_dir = value;
        }
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Create every directory the daemon writes into.
    pub fn ensure_dirs(&self) -> Result<()> {
        let training = self.training_dir();
        let mut dirs = vec![
            self.sessions_dir(),
            self.state_dir(),
            training.join("queue"),
            training.join("ready"),
            training.join("used"),
            training,
        ];
        if let Some(parent) = self.playbook_path().parent() {
            if !parent.as_os_str().is_empty() {
                dirs.push(parent.to_path_buf());
            }
        }
        for dir in dirs {
            fs::create_dir_all(&dir)
                .with_context(|| format!("create directory {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn sessions_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.sessions_dir)
    }

    pub fn playbook_path(&self) -> PathBuf {
        PathBuf::from(&self.paths.playbook_path)
    }

    pub fn training_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.training_dir)
    }

    pub fn state_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.state_dir)
    }

    pub fn kill_switch_path(&self) -> PathBuf {
        PathBuf::from(&self.paths.kill_switch_path)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.schedule.scan_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.schedule.error_backoff_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.request_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.probe_timeout_secs)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
