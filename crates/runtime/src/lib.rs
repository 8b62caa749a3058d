pub mod analysis;
mod context;
pub mod cursors;
mod daemon;
pub mod pipeline;
pub mod prompts;
mod stats;
pub mod tasks;
pub mod taxonomy;
pub mod training;

pub use analysis::{Observation, ProposedBullet, SessionAnalysis};
pub use context::{DaemonContext, EXTRACTED_FILE};
pub use cursors::{EvaluationRecord, ReanalysisState};
pub use daemon::{CycleOutcome, StopReason, SubconsciousDaemon};
pub use pipeline::{CurationSummary, PipelineSettings, analyze_session};
pub use stats::{DaemonPhase, DaemonStats};
pub use tasks::{ScheduledTask, TaskKind, default_tasks, self_evaluate};
pub use taxonomy::FailureCategory;
pub use training::{TrainingPair, TrainingQueue};
