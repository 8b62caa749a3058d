//! The cooperative scheduling loop.
//!
//! One task per cycle, run to completion.  The stop signal and the kill
//! switch are honoured at cycle boundaries; the idle and backoff sleeps also
//! wake early when a stop is signalled.

use std::time::Duration;

use anyhow::{Result, bail};
use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::context::DaemonContext;
use crate::stats::DaemonPhase;
use crate::tasks::{ScheduledTask, TaskKind, default_tasks};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Ran(TaskKind),
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// SIGINT / SIGTERM, or any other sender on the shutdown channel.
    Signal,
    KillSwitch,
}

pub struct SubconsciousDaemon {
    ctx: DaemonContext,
    tasks: Vec<Box<dyn ScheduledTask>>,
    shutdown: watch::Receiver<bool>,
}

/// Resolves once `true` is sent.  A closed channel never resolves.
async fn stop_signalled(rx: &mut watch::Receiver<bool>) {
    let closed = rx.wait_for(|stop| *stop).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

impl SubconsciousDaemon {
    pub fn new(ctx: DaemonContext, shutdown: watch::Receiver<bool>) -> Self {
        Self::with_tasks(ctx, default_tasks(), shutdown)
    }

    pub fn with_tasks(
        ctx: DaemonContext,
        tasks: Vec<Box<dyn ScheduledTask>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            ctx,
            tasks,
            shutdown,
        }
    }

    pub fn context(&self) -> &DaemonContext {
        &self.ctx
    }

    pub fn into_context(self) -> DaemonContext {
        self.ctx
    }

    /// Probe the gateway once.  An unreachable gateway stops the daemon
    /// before the loop starts; there is no retry.
    pub async fn startup(&mut self) -> Result<()> {
        self.ctx.set_phase(DaemonPhase::Starting);
        let model = self.ctx.gateway.model().to_string();
        info!(
            model = %model,
            sessions_dir = %self.ctx.scanner.sessions_dir().display(),
            bullets = self.ctx.playbook.total_bullets(),
            "subconscious daemon starting"
        );

        if !self.ctx.gateway.is_available().await {
            self.ctx.set_phase(DaemonPhase::Stopped);
            self.ctx.save_stats();
            bail!("inference gateway unavailable (model {model})");
        }

        self.ctx.set_phase(DaemonPhase::Running);
        self.ctx.save_stats();
        Ok(())
    }

    fn stop_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn kill_switch_present(&self) -> bool {
        self.ctx.config.kill_switch_path().exists()
    }

    /// Run the first pending task, if any.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        let now = Utc::now();
        let Some(task) = self.tasks.iter().find(|t| t.is_pending(&self.ctx, now)) else {
            return Ok(CycleOutcome::Idle);
        };

        let kind = task.kind();
        self.ctx.set_phase(kind.phase());
        info!(task = %kind, "running task");
        let result = task.run(&mut self.ctx, now).await;
        self.ctx.set_phase(DaemonPhase::Running);
        result.map(|()| CycleOutcome::Ran(kind))
    }

    fn record_cycle(&mut self) {
        self.ctx.stats.cycles_completed += 1;
        self.ctx.stats.last_cycle_at = Some(Utc::now());
        self.ctx.save_stats();
    }

    fn record_error(&mut self, err: &anyhow::Error) {
        error!(error = %format!("{err:#}"), "cycle failed");
        self.ctx.stats.errors += 1;
        self.ctx.save_stats();
    }

    /// Sleep for `duration` unless a stop is signalled first.  Returns true
    /// when woken by the stop signal.
    async fn sleep_or_stop(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = stop_signalled(&mut self.shutdown) => true,
        }
    }

    /// One cycle with the same bookkeeping as the loop but no sleeping.
    pub async fn run_once(&mut self) -> Result<CycleOutcome> {
        let result = self.run_cycle().await;
        match &result {
            Ok(_) => self.record_cycle(),
            Err(err) => self.record_error(err),
        }
        self.ctx.set_phase(DaemonPhase::Stopped);
        self.ctx.save_stats();
        result
    }

    /// Loop until stopped.  Task errors are counted and backed off from,
    /// never propagated.
    pub async fn run(&mut self) -> StopReason {
        let reason = loop {
            if self.stop_requested() {
                info!("stop requested, shutting down");
                break StopReason::Signal;
            }
            if self.kill_switch_present() {
                warn!(
                    path = %self.ctx.config.kill_switch_path().display(),
                    "kill switch present, shutting down"
                );
                break StopReason::KillSwitch;
            }

            match self.run_cycle().await {
                Ok(CycleOutcome::Ran(_)) => self.record_cycle(),
                Ok(CycleOutcome::Idle) => {
                    self.ctx.set_phase(DaemonPhase::Sleeping);
                    self.ctx.save_stats();
                    self.sleep_or_stop(self.ctx.config.scan_interval()).await;
                    self.ctx.set_phase(DaemonPhase::Running);
                    self.record_cycle();
                }
                Err(err) => {
                    self.record_error(&err);
                    self.sleep_or_stop(self.ctx.config.error_backoff()).await;
                }
            }
        };

        self.ctx.set_phase(DaemonPhase::Stopped);
        self.ctx.save_stats();
        info!(
            cycles = self.ctx.stats.cycles_completed,
            errors = self.ctx.stats.errors,
            "subconscious daemon stopped"
        );
        reason
    }
}
