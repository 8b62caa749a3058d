use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use subconscious_sessions::session_id;

use super::{ScheduledTask, TaskKind};
use crate::context::DaemonContext;
use crate::training::build_pairs;

/// Queue training pairs from successful sessions not yet visited.
pub struct ExtractTask;

#[async_trait]
impl ScheduledTask for ExtractTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Extract
    }

    fn is_pending(&self, ctx: &DaemonContext, _now: DateTime<Utc>) -> bool {
        ctx.scanner
            .find_all_sessions()
            .iter()
            .filter(|dir| !ctx.extracted.contains(&session_id(dir)))
            .filter_map(|dir| ctx.scanner.parse_session(dir))
            .any(|trace| trace.success())
    }

    async fn run(&self, ctx: &mut DaemonContext, now: DateTime<Utc>) -> Result<()> {
        let min_lines = ctx.config.extract.min_source_lines;
        let mut written = 0usize;
        let mut visited = 0usize;

        for dir in ctx.scanner.find_all_sessions() {
            let id = session_id(&dir);
            if ctx.extracted.contains(&id) {
                continue;
            }
            visited += 1;

            if let Some(trace) = ctx.scanner.parse_session(&dir).filter(|t| t.success()) {
                let pairs = build_pairs(&trace, min_lines, now);
                match ctx.training.append(&pairs, now) {
                    Ok(count) => written += count,
                    Err(err) => {
                        // Sessions already queued must not be queued again.
                        ctx.stats.training_pairs_extracted += written as u64;
                        if let Err(save_err) = ctx.extracted.save() {
                            warn!(error = %save_err, "could not save extracted sessions");
                        }
                        return Err(err.context(format!("queue training pairs for {id}")));
                    }
                }
                debug!(session = %id, pairs = pairs.len(), "extracted session");
            }
            ctx.extracted.insert(id);
        }

        ctx.extracted.save().context("save extracted sessions")?;
        ctx.stats.training_pairs_extracted += written as u64;
        info!(sessions = visited, pairs = written, "extracted training pairs");
        Ok(())
    }
}
