mod daemon;
mod status;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use subconscious_config::{DaemonConfig, TelemetryConfig};
use subconscious_playbook::Playbook;

#[derive(Debug, Parser)]
#[command(
    name = "subconscious",
    version,
    about = "Background daemon that mines coding-agent sessions into a playbook"
)]
struct Cli {
    /// TOML configuration file.  Missing file means defaults.
    #[arg(long, global = true, default_value = "config/default.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the daemon loop until SIGINT/SIGTERM or the kill switch.
    Run {
        /// Run exactly one cycle and exit.
        #[arg(long)]
        once: bool,
    },
    /// Print the stats snapshot, cursors and playbook summary.
    Status,
    /// Print the playbook excerpt an agent role would receive.
    Export {
        #[arg(long, default_value = "general")]
        role: String,
        #[arg(long, default_value_t = 4000)]
        max_tokens: usize,
    },
    /// Prune and deduplicate the playbook now.
    Evaluate,
    /// Write the kill-switch file so a running daemon stops.
    Stop,
}

fn init_tracing(telemetry: &TelemetryConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&telemetry.log_level));

    match &telemetry.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "subconscious.log");
            let (file_writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::io::stdout.and(file_writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = DaemonConfig::load_from(&cli.config)?;
    let _log_guard = init_tracing(&config.telemetry);

    match cli.command.unwrap_or(Commands::Run { once: false }) {
        Commands::Run { once } => daemon::run_daemon(config, once).await?,
        Commands::Status => status::print_status(&config)?,
        Commands::Export { role, max_tokens } => {
            print!("{}", status::render_export(&config, &role, max_tokens));
        }
        Commands::Evaluate => {
            config.ensure_dirs()?;
            let lock = daemon::InstanceLock::acquire(&config.state_dir())?;
            let result = (|| {
                let mut playbook =
                    Playbook::open(config.playbook_path(), config.playbook.token_budget)?;
                subconscious_runtime::self_evaluate(
                    &mut playbook,
                    &config.playbook,
                    &config.state_dir(),
                    chrono::Utc::now(),
                )
            })();
            lock.release();
            let record = result?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Stop => daemon::request_stop(&config)?,
    }

    Ok(())
}
