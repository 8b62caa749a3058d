use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::ledger::IdLedger;
use crate::trace::{DodCriterion, SessionTrace, TraceKind};

const MARKER: &str = ".agents/state.json";
const TRACES_DIR: &str = ".agents/traces";
/// Trace log names, preferred first.
const TRACE_LOG_NAMES: [&str; 2] = ["training_traces.jsonl", "failure_traces.jsonl"];
const FALLBACK_SUMMARY: &str = "for_claude.md";
const SOURCE_EXTENSION: &str = "py";
const TEST_PREFIX: &str = "test_";

/// Watches the shared sessions directory and owns the processed-session set.
#[derive(Debug)]
pub struct SessionScanner {
    sessions_dir: PathBuf,
    processed: IdLedger,
}

impl SessionScanner {
    pub fn new(sessions_dir: impl Into<PathBuf>, state_dir: impl AsRef<Path>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
            processed: IdLedger::load(state_dir.as_ref().join("processed_sessions.json")),
        }
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    /// Complete sessions not yet processed, oldest first by directory name.
    pub fn find_new_sessions(&self) -> Vec<PathBuf> {
        self.complete_sessions()
            .into_iter()
            .filter(|dir| !self.processed.contains(&session_id(dir)))
            .collect()
    }

    /// Every complete session, processed or not, in directory-name order.
    pub fn find_all_sessions(&self) -> Vec<PathBuf> {
        self.complete_sessions()
    }

    pub fn parse_session(&self, dir: &Path) -> Option<SessionTrace> {
        parse_session(dir)
    }

    /// Record `id` as processed.  Idempotent; the set is persisted only
    /// when it changes.
    pub fn mark_processed(&mut self, id: &str) -> Result<()> {
        if self.processed.mark(id)? {
            debug!(session = %id, "marked session processed");
        }
        Ok(())
    }

    pub fn is_processed(&self, id: &str) -> bool {
        self.processed.contains(id)
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    fn complete_sessions(&self) -> Vec<PathBuf> {
        let entries = match fs::read_dir(&self.sessions_dir) {
            Ok(entries) => entries,
            Err(err) => {
                debug!(dir = %self.sessions_dir.display(), error = %err, "sessions dir unreadable");
                return Vec::new();
            }
        };

        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .filter(|path| read_marker(path).is_some_and(|marker| is_complete(&marker)))
            .collect();
        dirs.sort_by_key(|path| path.file_name().map(|n| n.to_os_string()));
        dirs
    }
}

/// Session id = directory name.
pub fn session_id(dir: &Path) -> String {
    dir.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn read_marker(dir: &Path) -> Option<Map<String, Value>> {
    let raw = fs::read_to_string(dir.join(MARKER)).ok()?;
    match serde_json::from_str::<Value>(&raw).ok()? {
        Value::Object(map) => Some(map),
        _ => Some(Map::new()),
    }
}

fn is_complete(marker: &Map<String, Value>) -> bool {
    marker
        .get("completed_at")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.is_empty())
}

fn str_field(marker: &Map<String, Value>, key: &str) -> String {
    marker
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn parse_criteria(marker: &Map<String, Value>) -> Vec<DodCriterion> {
    let Some(criteria) = marker
        .get("dod")
        .and_then(|dod| dod.get("criteria"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    criteria
        .iter()
        .filter_map(Value::as_object)
        .map(|c| DodCriterion {
            description: c
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            passed: c.get("passed").and_then(Value::as_bool).unwrap_or(false),
        })
        .collect()
}

fn find_trace_log(dir: &Path) -> Option<PathBuf> {
    let traces = dir.join(TRACES_DIR);
    TRACE_LOG_NAMES
        .iter()
        .map(|name| traces.join(name))
        .find(|candidate| candidate.is_file())
}

fn load_trace_log(trace: &mut SessionTrace, log: &Path) {
    let raw = match fs::read_to_string(log) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(session = %trace.session_id, path = %log.display(), error = %err, "unreadable trace log");
            return;
        }
    };

    let mut skipped = 0usize;
    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let record = match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(record)) => record,
            _ => {
                skipped += 1;
                continue;
            }
        };
        let kind = record
            .get("type")
            .and_then(Value::as_str)
            .and_then(TraceKind::from_type);
        if let Some(kind) = kind {
            trace.push_record(kind, record);
        }
    }
    if skipped > 0 {
        warn!(session = %trace.session_id, skipped, "skipped malformed trace lines");
    }
}

/// Best-effort signal from the human-readable summary when no trace log
/// exists: one synthetic import-error test failure if the summary mentions
/// `import_error` at all.
fn load_fallback_summary(trace: &mut SessionTrace, dir: &Path) {
    let Ok(content) = fs::read_to_string(dir.join(TRACES_DIR).join(FALLBACK_SUMMARY)) else {
        return;
    };
    let mentions = content.to_lowercase().matches("import_error").count();
    if mentions == 0 {
        return;
    }

    let mut record = Map::new();
    record.insert("type".into(), Value::from(TraceKind::TestFailure.as_type()));
    record.insert("error_category".into(), Value::from("import_error"));
    record.insert(
        "error_output".into(),
        Value::from(format!(
            "Extracted from {FALLBACK_SUMMARY}: {mentions} import_error mentions"
        )),
    );
    record.insert("filename".into(), Value::from("unknown"));
    trace.test_failures.push(record);
}

fn load_produced_files(trace: &mut SessionTrace, dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for path in entries.filter_map(|e| e.ok()).map(|e| e.path()) {
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(SOURCE_EXTENSION) {
            continue;
        }
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        let name = session_id(&path);
        if name.starts_with(TEST_PREFIX) {
            trace.test_files.insert(name, content);
        } else {
            trace.source_files.insert(name, content);
        }
    }
}

/// Parse one session directory.  `None` only when the completion marker is
/// missing or not JSON; every other malformed part is omitted.
pub fn parse_session(dir: &Path) -> Option<SessionTrace> {
    let id = session_id(dir);
    let marker_path = dir.join(MARKER);
    let raw = match fs::read_to_string(&marker_path) {
        Ok(raw) => raw,
        Err(_) => {
            warn!(session = %id, "no completion marker");
            return None;
        }
    };
    let marker = match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => map,
        Ok(_) => Map::new(),
        Err(err) => {
            warn!(session = %id, error = %err, "invalid completion marker");
            return None;
        }
    };

    let mut trace = SessionTrace {
        session_id: id,
        session_dir: dir.to_path_buf(),
        goal: str_field(&marker, "goal"),
        iterations_used: marker.get("iteration").and_then(Value::as_u64).unwrap_or(1),
        completed: is_complete(&marker),
        dod_criteria: parse_criteria(&marker),
        failure_history: marker
            .get("failure_history")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        started_at: str_field(&marker, "started_at"),
        completed_at: str_field(&marker, "completed_at"),
        ..Default::default()
    };

    match find_trace_log(dir) {
        Some(log) => load_trace_log(&mut trace, &log),
        None => load_fallback_summary(&mut trace, dir),
    }
    load_produced_files(&mut trace, dir);

    debug!(
        session = %trace.session_id,
        success = trace.success(),
        dod = %format!("{}/{}", trace.dod_passed(), trace.dod_total()),
        build_failures = trace.build_failures.len(),
        test_failures = trace.test_failures.len(),
        source_files = trace.source_files.len(),
        "parsed session"
    );
    Some(trace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_session(root: &Path, id: &str, marker: &str) -> PathBuf {
        let dir = root.join(id);
        fs::create_dir_all(dir.join(".agents/traces")).unwrap();
        fs::write(dir.join(MARKER), marker).unwrap();
        dir
    }

    fn complete_marker(passed: &[bool]) -> String {
        let criteria: Vec<_> = passed
            .iter()
            .enumerate()
            .map(|(i, p)| json!({"description": format!("criterion {i}"), "passed": p}))
            .collect();
        json!({
            "goal": "Build a todo API",
            "iteration": 2,
            "started_at": "2025-06-01T10:00:00",
            "completed_at": "2025-06-01T10:05:00",
            "dod": {"criteria": criteria},
        })
        .to_string()
    }

    // ── discovery ──────────────────────────────────────────────────────────

    #[test]
    fn find_new_skips_incomplete_malformed_and_processed() {
        let sessions = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        let root = sessions.path();

        write_session(root, "s3", &complete_marker(&[true]));
        write_session(root, "s1", &complete_marker(&[false]));
        write_session(root, "s2", r#"{"goal": "still running", "completed_at": ""}"#);
        write_session(root, "s4", "{ not json");
        fs::create_dir_all(root.join("s5")).unwrap();
        fs::write(root.join("stray.txt"), "ignored").unwrap();

        let mut scanner = SessionScanner::new(root, state.path());
        let ids: Vec<_> = scanner.find_new_sessions().iter().map(|p| session_id(p)).collect();
        assert_eq!(ids, vec!["s1", "s3"]);

        scanner.mark_processed("s1").unwrap();
        let ids: Vec<_> = scanner.find_new_sessions().iter().map(|p| session_id(p)).collect();
        assert_eq!(ids, vec!["s3"]);
        assert_eq!(scanner.find_all_sessions().len(), 2);
    }

    #[test]
    fn processed_set_survives_restart() {
        let sessions = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        write_session(sessions.path(), "a", &complete_marker(&[true]));

        let mut scanner = SessionScanner::new(sessions.path(), state.path());
        scanner.mark_processed("a").unwrap();
        scanner.mark_processed("a").unwrap();

        let restarted = SessionScanner::new(sessions.path(), state.path());
        assert!(restarted.is_processed("a"));
        assert_eq!(restarted.processed_count(), 1);
        assert!(restarted.find_new_sessions().is_empty());
    }

    #[test]
    fn missing_sessions_dir_is_empty() {
        let state = TempDir::new().unwrap();
        let scanner = SessionScanner::new(state.path().join("nope"), state.path());
        assert!(scanner.find_new_sessions().is_empty());
        assert!(scanner.find_all_sessions().is_empty());
    }

    // ── parsing ────────────────────────────────────────────────────────────

    #[test]
    fn parses_marker_traces_and_files() {
        let sessions = TempDir::new().unwrap();
        let dir = write_session(sessions.path(), "s1", &complete_marker(&[true, true]));
        fs::write(
            dir.join(".agents/traces/training_traces.jsonl"),
            [
                r#"{"type": "build_failure", "filename": "app.py", "error_output": "boom"}"#,
                "{ corrupt line",
                r#"{"type": "test_failure", "filename": "test_app.py"}"#,
                r#"{"type": "heartbeat"}"#,
                "",
                r#"{"type": "rca_failure", "root_cause": "missing import"}"#,
                r#"{"type": "sampling_result", "winner": 2}"#,
            ]
            .join("\n"),
        )
        .unwrap();
        // Legacy log present too; the preferred name wins.
        fs::write(
            dir.join(".agents/traces/failure_traces.jsonl"),
            r#"{"type": "build_failure"}"#,
        )
        .unwrap();
        fs::write(dir.join("app.py"), "print('hi')\n").unwrap();
        fs::write(dir.join("test_app.py"), "def test_x(): pass\n").unwrap();
        fs::write(dir.join("notes.md"), "not code").unwrap();

        let trace = parse_session(&dir).unwrap();
        assert_eq!(trace.session_id, "s1");
        assert_eq!(trace.goal, "Build a todo API");
        assert_eq!(trace.iterations_used, 2);
        assert!(trace.completed);
        assert!(trace.success());
        assert_eq!(trace.test_pass_rate(), 1.0);
        assert_eq!(trace.build_failures.len(), 1);
        assert_eq!(trace.test_failures.len(), 1);
        assert_eq!(trace.rca_failures.len(), 1);
        assert_eq!(trace.sampling_results.len(), 1);
        assert_eq!(trace.source_files.keys().collect::<Vec<_>>(), vec!["app.py"]);
        assert_eq!(trace.test_files.keys().collect::<Vec<_>>(), vec!["test_app.py"]);
        assert_eq!(trace.duration().map(|d| d.num_seconds()), Some(300));
    }

    #[test]
    fn legacy_trace_log_name_is_accepted() {
        let sessions = TempDir::new().unwrap();
        let dir = write_session(sessions.path(), "s1", &complete_marker(&[false]));
        fs::write(
            dir.join(".agents/traces/failure_traces.jsonl"),
            r#"{"type": "build_failure", "filename": "db.py"}"#,
        )
        .unwrap();

        let trace = parse_session(&dir).unwrap();
        assert_eq!(trace.build_failures.len(), 1);
        assert!(!trace.success());
    }

    #[test]
    fn fallback_summary_yields_one_import_error() {
        let sessions = TempDir::new().unwrap();
        let dir = write_session(sessions.path(), "s1", &complete_marker(&[false]));
        fs::write(
            dir.join(".agents/traces/for_claude.md"),
            "IMPORT_ERROR in app.py\nanother import_error in db.py\n",
        )
        .unwrap();

        let trace = parse_session(&dir).unwrap();
        assert_eq!(trace.test_failures.len(), 1);
        let record = &trace.test_failures[0];
        assert_eq!(record["error_category"], "import_error");
        assert!(record["error_output"].as_str().unwrap().contains("2 import_error mentions"));
    }

    #[test]
    fn fallback_summary_ignored_when_trace_log_exists() {
        let sessions = TempDir::new().unwrap();
        let dir = write_session(sessions.path(), "s1", &complete_marker(&[false]));
        fs::write(dir.join(".agents/traces/training_traces.jsonl"), "").unwrap();
        fs::write(dir.join(".agents/traces/for_claude.md"), "import_error").unwrap();

        let trace = parse_session(&dir).unwrap();
        assert!(trace.test_failures.is_empty());
    }

    #[test]
    fn malformed_marker_parts_are_omitted() {
        let sessions = TempDir::new().unwrap();
        let dir = write_session(
            sessions.path(),
            "s1",
            r#"{"completed_at": "2025-06-01T10:00:00", "iteration": "three",
                "dod": {"criteria": ["bogus", {"description": "ok", "passed": true}]}}"#,
        );

        let trace = parse_session(&dir).unwrap();
        assert_eq!(trace.iterations_used, 1);
        assert_eq!(trace.goal, "");
        assert_eq!(trace.dod_total(), 1);
        assert!(trace.success());
    }

    #[test]
    fn no_criteria_means_failure() {
        let sessions = TempDir::new().unwrap();
        let dir = write_session(sessions.path(), "s1", &complete_marker(&[]));
        let trace = parse_session(&dir).unwrap();
        assert!(!trace.success());
        assert_eq!(trace.test_pass_rate(), 0.0);
    }

    #[test]
    fn unparsable_marker_returns_none() {
        let sessions = TempDir::new().unwrap();
        let dir = write_session(sessions.path(), "s1", "not json at all");
        assert!(parse_session(&dir).is_none());
        assert!(parse_session(&sessions.path().join("missing")).is_none());
    }
}
