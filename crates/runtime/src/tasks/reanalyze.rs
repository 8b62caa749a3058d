use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::info;

use super::{ScheduledTask, TaskKind};
use crate::context::DaemonContext;
use crate::cursors::ReanalysisState;
use crate::pipeline::analyze_batch;

/// Revisit failed sessions against the grown playbook, one epoch per day.
pub struct ReanalyzeTask;

#[async_trait]
impl ScheduledTask for ReanalyzeTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Reanalyze
    }

    fn is_pending(&self, ctx: &DaemonContext, now: DateTime<Utc>) -> bool {
        let interval = TimeDelta::hours(ctx.config.schedule.reanalyze_interval_hours as i64);
        ReanalysisState::load(&ctx.state_dir()).is_due(interval, now)
            && !ctx.scanner.find_all_sessions().is_empty()
    }

    async fn run(&self, ctx: &mut DaemonContext, now: DateTime<Utc>) -> Result<()> {
        let state_dir = ctx.state_dir();
        let mut state = ReanalysisState::load(&state_dir);
        state.epoch += 1;

        let batch: Vec<_> = ctx
            .complete_sessions()
            .into_iter()
            .filter(|trace| !trace.success())
            .take(ctx.config.schedule.reanalyze_batch_size)
            .collect();
        info!(epoch = state.epoch, sessions = batch.len(), "reanalysis epoch");

        let settings = ctx.pipeline_settings();
        let (summary, analyzed) =
            analyze_batch(ctx.gateway.as_ref(), &mut ctx.playbook, &batch, settings).await;
        ctx.playbook.save().context("save playbook after reanalysis")?;
        ctx.stats.deltas_applied += summary.added as u64;

        state.last_run = Some(now);
        state.sessions_reviewed = batch.len();
        state.save(&state_dir).context("save reanalysis state")?;

        info!(
            epoch = state.epoch,
            analyzed,
            added = summary.added,
            bullets = ctx.playbook.total_bullets(),
            "reanalysis epoch complete"
        );
        Ok(())
    }
}
