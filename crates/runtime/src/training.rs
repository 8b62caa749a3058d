//! Training pairs mined from successful sessions, queued as daily JSONL files
//! under `<training_dir>/queue/`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use subconscious_sessions::SessionTrace;

/// One instruction → response example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingPair {
    pub id: String,
    pub instruction: String,
    pub response: String,
    pub source_session: String,
    /// Always `"positive"`; failed sessions produce no pairs.
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
}

/// One pair per source file with at least `min_lines` lines of content.
/// Callers only pass successful sessions.
pub fn build_pairs(trace: &SessionTrace, min_lines: usize, now: DateTime<Utc>) -> Vec<TrainingPair> {
    trace
        .source_files
        .iter()
        .filter(|(_, content)| content.trim().lines().count() >= min_lines)
        .map(|(name, content)| TrainingPair {
            id: Uuid::new_v4().to_string(),
            instruction: format!("Build the file '{name}' for: {}", trace.goal),
            response: content.clone(),
            source_session: trace.session_id.clone(),
            kind: "positive".to_string(),
            timestamp: now,
        })
        .collect()
}

/// Append-only writer for `<training_dir>/queue/pairs_<YYYY-MM-DD>.jsonl`.
#[derive(Debug, Clone)]
pub struct TrainingQueue {
    queue_dir: PathBuf,
}

impl TrainingQueue {
    pub fn new(training_dir: &Path) -> Self {
        Self {
            queue_dir: training_dir.join("queue"),
        }
    }

    pub fn queue_dir(&self) -> &Path {
        &self.queue_dir
    }

    /// Day file for `at` (UTC date).
    pub fn file_for(&self, at: DateTime<Utc>) -> PathBuf {
        self.queue_dir
            .join(format!("pairs_{}.jsonl", at.format("%Y-%m-%d")))
    }

    /// Append `pairs` to the day file for `at`.  Returns how many were written.
    pub fn append(&self, pairs: &[TrainingPair], at: DateTime<Utc>) -> Result<usize> {
        if pairs.is_empty() {
            return Ok(0);
        }
        fs::create_dir_all(&self.queue_dir)
            .with_context(|| format!("create {}", self.queue_dir.display()))?;

        let path = self.file_for(at);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open training queue {}", path.display()))?;
        for pair in pairs {
            let line = serde_json::to_string(pair).context("serialize TrainingPair")?;
            writeln!(file, "{line}")?;
        }
        Ok(pairs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn trace() -> SessionTrace {
        let mut trace = SessionTrace {
            session_id: "session_042".into(),
            goal: "Build a CLI calculator".into(),
            ..Default::default()
        };
        let long: String = (0..12).map(|i| format!("line {i}\n")).collect();
        trace.source_files.insert("calc.py".into(), long);
        trace.source_files.insert("tiny.py".into(), "x = 1\n".into());
        trace
            .source_files
            .insert("padded.py".into(), format!("\n\n\n{}\n\n\n", "a\n".repeat(9)));
        trace
    }

    #[test]
    fn only_long_enough_files_become_pairs() {
        let pairs = build_pairs(&trace(), 10, Utc::now());
        assert_eq!(pairs.len(), 1);
        let pair = &pairs[0];
        assert_eq!(pair.instruction, "Build the file 'calc.py' for: Build a CLI calculator");
        assert_eq!(pair.source_session, "session_042");
        assert_eq!(pair.kind, "positive");
        assert!(pair.response.starts_with("line 0"));
        assert!(Uuid::parse_str(&pair.id).is_ok());
    }

    #[test]
    fn appends_jsonl_to_day_file() {
        let dir = TempDir::new().unwrap();
        let queue = TrainingQueue::new(dir.path());
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 23, 59, 0).unwrap();
        let pairs = build_pairs(&trace(), 1, at);
        assert_eq!(pairs.len(), 3);

        assert_eq!(queue.append(&pairs[..2], at).unwrap(), 2);
        assert_eq!(queue.append(&pairs[2..], at).unwrap(), 1);
        assert_eq!(queue.append(&[], at).unwrap(), 0);

        let path = dir.path().join("queue/pairs_2025-06-01.jsonl");
        assert_eq!(queue.file_for(at), path);
        let raw = std::fs::read_to_string(path).unwrap();
        let lines: Vec<_> = raw.lines().collect();
        assert_eq!(lines.len(), 3);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["type"], "positive");
    }
}
