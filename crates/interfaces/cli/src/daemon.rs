use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use fs2::FileExt;
use tokio::sync::watch;
use tracing::{info, warn};

use subconscious_config::DaemonConfig;
use subconscious_llm::{InferenceGateway, OllamaClient};
use subconscious_runtime::{DaemonContext, StopReason, SubconsciousDaemon};

const LOCK_FILE: &str = "daemon.lock";

/// Exclusive advisory lock on `<state_dir>/daemon.lock`.  Released when
/// dropped; the file itself is removed on a clean exit.
pub(crate) struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    pub(crate) fn acquire(state_dir: &Path) -> Result<Self> {
        fs::create_dir_all(state_dir)
            .with_context(|| format!("create state dir {}", state_dir.display()))?;
        let path = state_dir.join(LOCK_FILE);
        let mut file = File::create(&path)
            .with_context(|| format!("open lock file {}", path.display()))?;
        file.try_lock_exclusive().map_err(|_| {
            anyhow!(
                "another subconscious daemon already holds the lock at {}",
                path.display()
            )
        })?;
        write!(file, "{}", std::process::id())?;
        Ok(Self { file, path })
    }

    pub(crate) fn release(self) {
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = fs::remove_file(&self.path);
    }
}

/// Forward SIGINT / SIGTERM into a watch channel the daemon loop polls.
fn spawn_signal_listener(tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        let received = async {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;
            tokio::select! {
                _ = sigterm.recv() => {},
                _ = sigint.recv() => {},
            }
            Ok::<(), anyhow::Error>(())
        };

        #[cfg(not(unix))]
        let received = async {
            tokio::signal::ctrl_c().await?;
            Ok::<(), anyhow::Error>(())
        };

        match received.await {
            Ok(()) => {
                info!("shutdown signal received, finishing current cycle");
                let _ = tx.send(true);
            }
            Err(err) => warn!(error = %err, "could not install signal handlers"),
        }
    });
}

pub(crate) fn ollama_gateway(config: &DaemonConfig) -> OllamaClient {
    OllamaClient::new(&config.llm.base_url, &config.llm.model)
        .with_sampling(config.llm.temperature, config.llm.max_tokens)
        .with_timeouts(config.request_timeout(), config.probe_timeout())
}

/// `subconscious run`: lock, probe, then loop (or run one cycle).
pub(crate) async fn run_daemon(config: DaemonConfig, once: bool) -> Result<()> {
    config.ensure_dirs()?;
    let lock = InstanceLock::acquire(&config.state_dir())?;

    let (tx, rx) = watch::channel(false);
    spawn_signal_listener(tx);

    let gateway: Arc<dyn InferenceGateway> = Arc::new(ollama_gateway(&config));
    let ctx = DaemonContext::open(config, gateway)?;
    let mut daemon = SubconsciousDaemon::new(ctx, rx);

    let result = async {
        daemon.startup().await?;
        if once {
            let outcome = daemon.run_once().await?;
            info!(?outcome, "single cycle finished");
        } else {
            match daemon.run().await {
                StopReason::Signal => info!("stopped by signal"),
                StopReason::KillSwitch => info!("stopped by kill switch"),
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    lock.release();
    result
}

/// `subconscious stop`: drop the kill-switch file for a running daemon to
/// find at its next cycle boundary.
pub(crate) fn request_stop(config: &DaemonConfig) -> Result<()> {
    let path = config.kill_switch_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, chrono::Utc::now().to_rfc3339())
        .with_context(|| format!("write kill switch {}", path.display()))?;
    println!("kill switch written: {}", path.display());
    println!("the daemon stops at its next cycle boundary; remove the file before restarting");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_lock_fails_fast() {
        let dir = TempDir::new().unwrap();
        let first = InstanceLock::acquire(dir.path()).unwrap();
        assert!(InstanceLock::acquire(dir.path()).is_err());
        first.release();
        assert!(!dir.path().join(LOCK_FILE).exists());
        InstanceLock::acquire(dir.path()).unwrap().release();
    }

    #[test]
    fn stop_writes_kill_switch() {
        let dir = TempDir::new().unwrap();
        let mut config = DaemonConfig::default();
        config.paths.kill_switch_path = dir.path().join("flags/STOP").display().to_string();
        request_stop(&config).unwrap();
        assert!(config.kill_switch_path().exists());
    }
}
