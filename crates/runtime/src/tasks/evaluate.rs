use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::info;

use subconscious_config::PlaybookConfig;
use subconscious_playbook::Playbook;

use super::{ScheduledTask, TaskKind};
use crate::context::DaemonContext;
use crate::cursors::EvaluationRecord;

/// Prune then deduplicate the playbook and record the outcome in
/// `last_eval.json`.  Needs no inference, so the CLI runs it directly too.
pub fn self_evaluate(
    playbook: &mut Playbook,
    settings: &PlaybookConfig,
    state_dir: &Path,
    now: DateTime<Utc>,
) -> Result<EvaluationRecord> {
    let pruned = playbook
        .prune_stale_at(now, settings.stale_days, settings.min_helpful_ratio)
        .context("prune playbook")?;
    let deduped = playbook
        .deduplicate(settings.dedup_similarity_threshold)
        .context("deduplicate playbook")?;
    let stats = playbook.stats();

    let record = EvaluationRecord {
        last_eval: Some(now),
        pruned,
        deduped,
        total_bullets: stats.total_bullets,
        avg_quality: stats.avg_quality,
    };
    record.save(state_dir).context("save evaluation record")?;

    info!(
        pruned,
        deduped,
        total_bullets = record.total_bullets,
        avg_quality = %format!("{:.2}", record.avg_quality),
        "playbook self-evaluation complete"
    );
    Ok(record)
}

pub struct EvaluateTask;

#[async_trait]
impl ScheduledTask for EvaluateTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Evaluate
    }

    fn is_pending(&self, ctx: &DaemonContext, now: DateTime<Utc>) -> bool {
        let interval = TimeDelta::hours(ctx.config.schedule.self_eval_interval_hours as i64);
        EvaluationRecord::load(&ctx.state_dir()).is_due(interval, now)
    }

    async fn run(&self, ctx: &mut DaemonContext, now: DateTime<Utc>) -> Result<()> {
        let state_dir = ctx.state_dir();
        self_evaluate(&mut ctx.playbook, &ctx.config.playbook, &state_dir, now)?;
        Ok(())
    }
}
