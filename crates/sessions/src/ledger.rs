use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use subconscious_core::{read_json_or_default, write_json_atomic};

/// On-disk shape of a ledger file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default, alias = "processed", alias = "extracted")]
    ids: BTreeSet<String>,
    /// Informational only; kept as text so foreign timestamp formats load.
    #[serde(default)]
    last_updated: Option<String>,
}

/// A persisted set of session ids ("has this already been done?").
///
/// Used for the processed set owned by the scanner and the extracted set
/// owned by the Extract task.  An unreadable file loads as empty.
#[derive(Debug)]
pub struct IdLedger {
    path: PathBuf,
    ids: BTreeSet<String>,
}

impl IdLedger {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file: LedgerFile = read_json_or_default(&path);
        tracing::debug!(path = %path.display(), count = file.ids.len(), "loaded id ledger");
        Self { path, ids: file.ids }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    /// Insert without persisting.  Returns `true` when the id was new.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        self.ids.insert(id.into())
    }

    /// Insert and persist immediately.  Re-marking a known id is a no-op
    /// and does not touch the file.
    pub fn mark(&mut self, id: impl Into<String>) -> Result<bool> {
        if !self.insert(id) {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    pub fn save(&self) -> Result<()> {
        let file = LedgerFile {
            ids: self.ids.clone(),
            last_updated: Some(Utc::now().to_rfc3339()),
        };
        write_json_atomic(&self.path, &file)
            .with_context(|| format!("persist id ledger {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn mark_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("processed_sessions.json");

        let mut ledger = IdLedger::load(&path);
        assert!(ledger.is_empty());
        assert!(ledger.mark("s-001").unwrap());
        assert!(ledger.mark("s-002").unwrap());

        let reloaded = IdLedger::load(&path);
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains("s-001"));
        assert_eq!(reloaded.iter().collect::<Vec<_>>(), vec!["s-001", "s-002"]);
    }

    #[test]
    fn remarking_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        let mut ledger = IdLedger::load(&path);
        ledger.mark("a").unwrap();
        let before = fs::read_to_string(&path).unwrap();

        assert!(!ledger.mark("a").unwrap());
        assert_eq!(ledger.len(), 1);
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn accepts_legacy_key_and_survives_corruption() {
        let dir = TempDir::new().unwrap();
        let legacy = dir.path().join("legacy.json");
        fs::write(&legacy, r#"{"processed": ["x", "y"], "last_updated": "2025-03-01T10:00:00.123456"}"#).unwrap();
        assert_eq!(IdLedger::load(&legacy).len(), 2);

        let corrupt = dir.path().join("corrupt.json");
        fs::write(&corrupt, "{{{").unwrap();
        assert!(IdLedger::load(&corrupt).is_empty());
    }
}
