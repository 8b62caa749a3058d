//! Prompt text for the Generator and Reflector stages.

use std::fmt::Write;

use subconscious_core::truncate_str;
use subconscious_sessions::{SessionTrace, TraceRecord, record_field};

use crate::analysis::Observation;
use crate::taxonomy::FailureCategory;

/// Failure excerpts of each kind included in a Generator prompt.
pub const MAX_FAILURE_EXCERPTS: usize = 5;
/// Per-field character cap inside a failure excerpt.
pub const EXCERPT_CHARS: usize = 300;

pub const GENERATOR_SYSTEM: &str = "You are a code failure analyst. You review session traces \
from an autonomous coding agent and extract reusable patterns. Be specific and actionable. \
Focus on patterns that would help prevent the same failure in future sessions. \
Respond ONLY with valid JSON.";

pub const REFLECTOR_SYSTEM: &str = "You are a knowledge curator for an AI coding agent. \
Your job is to identify NEW, ACTIONABLE knowledge from session analysis that should be added \
to the agent's playbook. Be highly selective: only propose bullets that capture genuinely \
useful, specific patterns. Respond ONLY with valid JSON.";

fn field_or_unknown(record: &TraceRecord, key: &str) -> String {
    let value = record_field(record, key);
    if value.is_empty() { "?".to_string() } else { value }
}

fn excerpt(record: &TraceRecord, key: &str) -> String {
    truncate_str(&field_or_unknown(record, key), EXCERPT_CHARS).to_string()
}

fn failures_section(trace: &SessionTrace) -> String {
    let mut out = String::new();
    for failure in trace.build_failures.iter().take(MAX_FAILURE_EXCERPTS) {
        let _ = write!(
            out,
            "\n--- Build Failure: {} ---\nCategory: {}\nError: {}\nCode excerpt: {}\n",
            excerpt(failure, "filename"),
            excerpt(failure, "error_category"),
            excerpt(failure, "error_output"),
            excerpt(failure, "generated_code"),
        );
    }
    for failure in trace.test_failures.iter().take(MAX_FAILURE_EXCERPTS) {
        let _ = write!(
            out,
            "\n--- Test Failure: {} ---\nError: {}\nFailures: {}/{}\n",
            excerpt(failure, "test_file"),
            excerpt(failure, "error_output"),
            excerpt(failure, "failure_count"),
            excerpt(failure, "total_tests"),
        );
    }
    out
}

fn join_names<'a>(names: impl Iterator<Item = &'a String>) -> String {
    names.map(String::as_str).collect::<Vec<_>>().join(", ")
}

/// Ask for a fixed-schema analysis of one session.
pub fn generator_prompt(trace: &SessionTrace) -> String {
    let mut criteria = String::new();
    for criterion in &trace.dod_criteria {
        let mark = if criterion.passed { "PASS" } else { "FAIL" };
        let _ = writeln!(criteria, "  [{mark}] {}", criterion.description);
    }

    let failures = failures_section(trace);
    let failures = if failures.is_empty() {
        "None (clean run)".to_string()
    } else {
        failures
    };
    let result = if trace.success() {
        "SUCCESS - all tests pass"
    } else {
        "FAILED"
    };

    format!(
        r#"Analyze this coding session and identify patterns.

TASK: {goal}
RESULT: {result}
ITERATIONS USED: {iterations}
DoD CRITERIA:
{criteria}
FAILURES ENCOUNTERED:
{failures}

SOURCE FILES: {sources}
TEST FILES: {tests}

Analyze this session. For each observation, classify it as one of:
{categories}

Respond as JSON with this structure:
{{
  "overall_assessment": "one sentence summary",
  "observations": [
    {{
      "category": "IMPORT_ERROR",
      "pattern": "specific reusable pattern description",
      "recommendation": "what should be done differently next time",
      "confidence": 0.8
    }}
  ]
}}"#,
        goal = trace.goal,
        iterations = trace.iterations_used,
        sources = join_names(trace.source_files.keys()),
        tests = join_names(trace.test_files.keys()),
        categories = FailureCategory::label_list(),
    )
}

/// Ask for genuinely new bullets given the Generator's observations and what
/// the playbook already holds.
pub fn reflector_prompt(
    trace: &SessionTrace,
    observations: &[Observation],
    digest: &str,
    sections: &[&str],
) -> String {
    let current = if digest.trim().is_empty() {
        "(empty, no existing bullets)".to_string()
    } else {
        digest.to_string()
    };
    let observations =
        serde_json::to_string_pretty(observations).unwrap_or_else(|_| "[]".to_string());
    let outcome = if trace.success() { "SUCCESSFUL" } else { "FAILED" };

    format!(
        r#"You are reviewing analysis of a coding session to create playbook entries.

CURRENT PLAYBOOK (existing knowledge):
{current}

NEW OBSERVATIONS from session:
{observations}

SESSION WAS: {outcome}

For each observation, determine:
1. Is this genuinely NEW knowledge not already in the playbook?
2. What SPECIFIC, ACTIONABLE bullet should be added?
3. Which section does it belong to?

Section options: {sections}

Respond as JSON:
{{
  "proposed_bullets": [
    {{
      "section": "import_resolution",
      "content": "When building Flask apps, import Flask before defining routes.",
      "is_new": true,
      "reasoning": "This pattern appeared in the failure but is not covered by existing bullets"
    }}
  ]
}}

IMPORTANT:
- Only propose bullets that are genuinely NEW (not duplicates of existing ones)
- Each bullet should be a single, specific, actionable instruction
- Write from the perspective of advising a coding agent
- Be concrete, not vague (bad: "handle imports carefully", good: "use absolute imports with the exact filename stem as module name")"#,
        sections = sections.join(", "),
    )
}
