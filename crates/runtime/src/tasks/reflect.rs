use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use subconscious_core::truncate_str;
use subconscious_sessions::session_id;

use super::{ScheduledTask, TaskKind};
use crate::context::DaemonContext;
use crate::pipeline::analyze_session;

/// Analyze the oldest new session and curate the lessons into the playbook.
pub struct ReflectTask;

#[async_trait]
impl ScheduledTask for ReflectTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Reflect
    }

    fn is_pending(&self, ctx: &DaemonContext, _now: DateTime<Utc>) -> bool {
        !ctx.scanner.find_new_sessions().is_empty()
    }

    async fn run(&self, ctx: &mut DaemonContext, _now: DateTime<Utc>) -> Result<()> {
        let Some(dir) = ctx.scanner.find_new_sessions().into_iter().next() else {
            return Ok(());
        };
        let id = session_id(&dir);

        let Some(trace) = ctx.scanner.parse_session(&dir) else {
            warn!(session = %id, "session marker unreadable, skipping");
            return ctx.scanner.mark_processed(&id);
        };

        info!(
            session = %id,
            goal = %truncate_str(&trace.goal, 100),
            success = trace.success(),
            dod = %format!("{}/{}", trace.dod_passed(), trace.dod_total()),
            iterations = trace.iterations_used,
            build_failures = trace.build_failures.len(),
            test_failures = trace.test_failures.len(),
            "reflecting on session"
        );

        let settings = ctx.pipeline_settings();
        let outcome =
            analyze_session(ctx.gateway.as_ref(), &mut ctx.playbook, &trace, settings).await;

        match outcome {
            Some(summary) => {
                ctx.playbook.record_session_analyzed();
                ctx.playbook.save().context("save playbook after reflection")?;
                ctx.stats.sessions_analyzed += 1;
                ctx.stats.deltas_applied += summary.added as u64;
            }
            None => warn!(session = %id, "generator produced no analysis"),
        }

        ctx.scanner.mark_processed(&id)
    }
}
