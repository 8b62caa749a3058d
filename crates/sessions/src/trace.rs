use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::TimeDelta;
use serde::Serialize;
use serde_json::{Map, Value};

use subconscious_core::parse_timestamp;

/// One free-form record from a session's trace log.
pub type TraceRecord = Map<String, Value>;

/// Trace-log record types the daemon understands.  Anything else in the log
/// is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceKind {
    BuildFailure,
    TestFailure,
    RcaFailure,
    SamplingResult,
}

impl TraceKind {
    pub fn from_type(s: &str) -> Option<Self> {
        match s {
            "build_failure" => Some(Self::BuildFailure),
            "test_failure" => Some(Self::TestFailure),
            "rca_failure" => Some(Self::RcaFailure),
            "sampling_result" => Some(Self::SamplingResult),
            _ => None,
        }
    }

    pub fn as_type(self) -> &'static str {
        match self {
            Self::BuildFailure => "build_failure",
            Self::TestFailure => "test_failure",
            Self::RcaFailure => "rca_failure",
            Self::SamplingResult => "sampling_result",
        }
    }
}

/// One definition-of-done criterion and whether the session met it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DodCriterion {
    pub description: String,
    pub passed: bool,
}

/// A parsed session.  Built fresh by every parse; never cached.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionTrace {
    pub session_id: String,
    pub session_dir: PathBuf,
    pub goal: String,
    pub iterations_used: u64,
    pub completed: bool,
    pub dod_criteria: Vec<DodCriterion>,
    pub failure_history: Vec<Value>,
    pub build_failures: Vec<TraceRecord>,
    pub test_failures: Vec<TraceRecord>,
    pub rca_failures: Vec<TraceRecord>,
    pub sampling_results: Vec<TraceRecord>,
    /// Produced source files, name → content.
    pub source_files: BTreeMap<String, String>,
    /// Produced test files, name → content.
    pub test_files: BTreeMap<String, String>,
    pub started_at: String,
    pub completed_at: String,
}

impl SessionTrace {
    /// True iff there is at least one criterion and all of them passed.  A
    /// session with no criteria is never successful.
    pub fn success(&self) -> bool {
        !self.dod_criteria.is_empty() && self.dod_criteria.iter().all(|c| c.passed)
    }

    pub fn dod_total(&self) -> usize {
        self.dod_criteria.len()
    }

    pub fn dod_passed(&self) -> usize {
        self.dod_criteria.iter().filter(|c| c.passed).count()
    }

    /// Fraction of criteria passed; `0.0` when there are none.
    pub fn test_pass_rate(&self) -> f64 {
        match self.dod_total() {
            0 => 0.0,
            total => self.dod_passed() as f64 / total as f64,
        }
    }

    /// Wall-clock duration when both timestamps parse.
    pub fn duration(&self) -> Option<TimeDelta> {
        let start = parse_timestamp(&self.started_at)?;
        let end = parse_timestamp(&self.completed_at)?;
        Some(end - start)
    }

    pub(crate) fn push_record(&mut self, kind: TraceKind, record: TraceRecord) {
        match kind {
            TraceKind::BuildFailure => self.build_failures.push(record),
            TraceKind::TestFailure => self.test_failures.push(record),
            TraceKind::RcaFailure => self.rca_failures.push(record),
            TraceKind::SamplingResult => self.sampling_results.push(record),
        }
    }
}

/// String view of a record field; numbers and booleans are rendered,
/// anything else is empty.
pub fn record_field(record: &TraceRecord, key: &str) -> String {
    match record.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criterion(passed: bool) -> DodCriterion {
        DodCriterion {
            description: "compiles".into(),
            passed,
        }
    }

    #[test]
    fn all_criteria_passed_is_success() {
        let trace = SessionTrace {
            dod_criteria: vec![criterion(true), criterion(true)],
            ..Default::default()
        };
        assert!(trace.success());
        assert_eq!(trace.test_pass_rate(), 1.0);
    }

    #[test]
    fn no_criteria_is_never_success() {
        let trace = SessionTrace::default();
        assert!(!trace.success());
        assert_eq!(trace.test_pass_rate(), 0.0);
    }

    #[test]
    fn partial_pass() {
        let trace = SessionTrace {
            dod_criteria: vec![criterion(true), criterion(false)],
            ..Default::default()
        };
        assert!(!trace.success());
        assert_eq!(trace.dod_passed(), 1);
        assert_eq!(trace.test_pass_rate(), 0.5);
    }

    #[test]
    fn duration_from_naive_and_rfc3339() {
        let trace = SessionTrace {
            started_at: "2025-06-01T10:00:00.250000".into(),
            completed_at: "2025-06-01T10:01:30.250000".into(),
            ..Default::default()
        };
        assert_eq!(trace.duration(), Some(TimeDelta::seconds(90)));

        let trace = SessionTrace {
            started_at: "2025-06-01T10:00:00+00:00".into(),
            completed_at: "2025-06-01T12:00:00+02:00".into(),
            ..Default::default()
        };
        assert_eq!(trace.duration(), Some(TimeDelta::zero()));

        let trace = SessionTrace {
            started_at: "yesterday".into(),
            completed_at: "2025-06-01T12:00:00".into(),
            ..Default::default()
        };
        assert_eq!(trace.duration(), None);
    }

    #[test]
    fn trace_kind_labels() {
        for kind in [
            TraceKind::BuildFailure,
            TraceKind::TestFailure,
            TraceKind::RcaFailure,
            TraceKind::SamplingResult,
        ] {
            assert_eq!(TraceKind::from_type(kind.as_type()), Some(kind));
        }
        assert_eq!(TraceKind::from_type("heartbeat"), None);
    }

    #[test]
    fn record_field_renders_scalars() {
        let record: TraceRecord = serde_json::from_str(
            r#"{"filename": "app.py", "line": 12, "fatal": true, "extra": {"a": 1}}"#,
        )
        .unwrap();
        assert_eq!(record_field(&record, "filename"), "app.py");
        assert_eq!(record_field(&record, "line"), "12");
        assert_eq!(record_field(&record, "fatal"), "true");
        assert_eq!(record_field(&record, "extra"), "");
        assert_eq!(record_field(&record, "missing"), "");
    }
}
