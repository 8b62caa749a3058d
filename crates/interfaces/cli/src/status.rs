use anyhow::Result;

use subconscious_config::DaemonConfig;
use subconscious_playbook::Playbook;
use subconscious_runtime::{DaemonStats, EXTRACTED_FILE, EvaluationRecord, ReanalysisState};
use subconscious_sessions::{IdLedger, SessionScanner};

fn or_never<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "(never)".to_string(), |v| v.to_string())
}

/// `subconscious status`: stats snapshot, cursor summaries, playbook stats.
pub(crate) fn print_status(config: &DaemonConfig) -> Result<()> {
    let state_dir = config.state_dir();

    println!("── daemon ───────────────────────────────────────────");
    match DaemonStats::load_snapshot(&state_dir)? {
        Some(stats) => {
            println!("  phase                    : {}", stats.phase);
            println!("  started_at               : {}", stats.started_at.to_rfc3339());
            println!("  last_cycle_at            : {}", or_never(stats.last_cycle_at.map(|t| t.to_rfc3339())));
            println!("  cycles_completed         : {}", stats.cycles_completed);
            println!("  errors                   : {}", stats.errors);
            println!("  sessions_analyzed        : {}", stats.sessions_analyzed);
            println!("  deltas_applied           : {}", stats.deltas_applied);
            println!("  training_pairs_extracted : {}", stats.training_pairs_extracted);
        }
        None => println!("  (no stats snapshot yet)"),
    }
    if config.kill_switch_path().exists() {
        println!("  kill switch present      : {}", config.kill_switch_path().display());
    }

    let scanner = SessionScanner::new(config.sessions_dir(), &state_dir);
    let extracted = IdLedger::load(state_dir.join(EXTRACTED_FILE));
    let reanalysis = ReanalysisState::load(&state_dir);
    let evaluation = EvaluationRecord::load(&state_dir);

    println!("── cursors ──────────────────────────────────────────");
    println!("  complete sessions        : {}", scanner.find_all_sessions().len());
    println!("  pending reflection       : {}", scanner.find_new_sessions().len());
    println!("  processed                : {}", scanner.processed_count());
    println!("  extracted                : {}", extracted.len());
    println!("  reanalysis epoch         : {}", reanalysis.epoch);
    println!("  reanalysis last_run      : {}", or_never(reanalysis.last_run.map(|t| t.to_rfc3339())));
    println!("  last self-evaluation     : {}", or_never(evaluation.last_eval.map(|t| t.to_rfc3339())));

    println!("── playbook ─────────────────────────────────────────");
    let playbook_path = config.playbook_path();
    if !playbook_path.exists() {
        println!("  (no playbook at {})", playbook_path.display());
        return Ok(());
    }
    let playbook = Playbook::load(&playbook_path, config.playbook.token_budget);
    let stats = playbook.stats();
    println!("  path                     : {}", playbook_path.display());
    println!("  total_bullets            : {}", stats.total_bullets);
    println!("  avg_quality              : {:.2}", stats.avg_quality);
    println!("  sessions_analyzed        : {}", stats.metadata.total_sessions_analyzed);
    println!("  deltas_applied           : {}", stats.metadata.total_deltas_applied);
    println!("  bullets_pruned           : {}", stats.metadata.total_bullets_pruned);
    for (section, count) in stats.sections.iter().filter(|(_, count)| **count > 0) {
        println!("  {section:<24} : {count}");
    }
    if !stats.most_helpful.is_empty() {
        println!("  most helpful:");
        for bullet in &stats.most_helpful {
            println!(
                "    [{}] +{}/-{} {}",
                bullet.id, bullet.helpful_count, bullet.harmful_count, bullet.content
            );
        }
    }
    Ok(())
}

/// `subconscious export`: the rendered excerpt, read without taking ownership
/// of the playbook file.
pub(crate) fn render_export(config: &DaemonConfig, role: &str, max_tokens: usize) -> String {
    Playbook::load(config.playbook_path(), config.playbook.token_budget)
        .export_for_agent(role, max_tokens)
}
