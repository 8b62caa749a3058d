//! The strict-priority task table.
//!
//! Every cycle the daemon walks [`default_tasks`] in order and runs the first
//! task whose `is_pending` holds.  Adding a task class is one more entry in
//! the table.

mod evaluate;
mod extract;
mod reanalyze;
mod reflect;

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::context::DaemonContext;
use crate::stats::DaemonPhase;

pub use evaluate::{EvaluateTask, self_evaluate};
pub use extract::ExtractTask;
pub use reanalyze::ReanalyzeTask;
pub use reflect::ReflectTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Reflect,
    Extract,
    Reanalyze,
    Evaluate,
}

impl TaskKind {
    /// Phase the daemon reports while this task runs.
    pub fn phase(self) -> DaemonPhase {
        match self {
            Self::Reflect => DaemonPhase::Reflecting,
            Self::Extract => DaemonPhase::Extracting,
            Self::Reanalyze => DaemonPhase::Reanalyzing,
            Self::Evaluate => DaemonPhase::Evaluating,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Reflect => "reflect",
            Self::Extract => "extract",
            Self::Reanalyze => "reanalyze",
            Self::Evaluate => "evaluate",
        };
        f.write_str(label)
    }
}

/// One task class in the scheduler table.
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    fn kind(&self) -> TaskKind;

    /// Whether this task has work right now.  Must not mutate anything.
    fn is_pending(&self, ctx: &DaemonContext, now: DateTime<Utc>) -> bool;

    /// Run to completion.  An `Err` counts as a failed cycle.
    async fn run(&self, ctx: &mut DaemonContext, now: DateTime<Utc>) -> Result<()>;
}

/// The production table, highest priority first.
pub fn default_tasks() -> Vec<Box<dyn ScheduledTask>> {
    vec![
        Box::new(ReflectTask),
        Box::new(ExtractTask),
        Box::new(ReanalyzeTask),
        Box::new(EvaluateTask),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_in_priority_order() {
        let kinds: Vec<_> = default_tasks().iter().map(|t| t.kind()).collect();
        assert_eq!(
            kinds,
            vec![TaskKind::Reflect, TaskKind::Extract, TaskKind::Reanalyze, TaskKind::Evaluate]
        );
    }

    #[test]
    fn kinds_map_to_phases() {
        assert_eq!(TaskKind::Reflect.phase(), DaemonPhase::Reflecting);
        assert_eq!(TaskKind::Evaluate.phase(), DaemonPhase::Evaluating);
        assert_eq!(TaskKind::Reanalyze.to_string(), "reanalyze");
    }
}
