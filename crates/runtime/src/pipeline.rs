//! Generator → Reflector → Curator: turning one session into playbook deltas.
//!
//! The two model stages never fail the cycle.  A timeout, an empty reply or
//! unparsable JSON yields no analysis (or no proposals) and the caller moves
//! on.  Only persistence errors propagate.

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use subconscious_llm::{InferenceGateway, InferenceOutcome, InferenceRequest};
use subconscious_playbook::Playbook;
use subconscious_sessions::SessionTrace;

use crate::analysis::{ProposedBullet, SessionAnalysis, new_proposals};
use crate::prompts::{GENERATOR_SYSTEM, REFLECTOR_SYSTEM, generator_prompt, reflector_prompt};
use crate::taxonomy::FailureCategory;

/// Tunables for one pass through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    pub similarity_threshold: f64,
    pub digest_per_section: usize,
}

/// What the Curator did with a batch of proposals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CurationSummary {
    pub added: usize,
    pub reinforced: usize,
    /// Matched an existing bullet but the session failed, so nothing changed.
    pub unchanged: usize,
}

impl CurationSummary {
    fn absorb(&mut self, other: CurationSummary) {
        self.added += other.added;
        self.reinforced += other.reinforced;
        self.unchanged += other.unchanged;
    }
}

fn structured_reply(stage: &str, outcome: InferenceOutcome) -> Option<serde_json::Value> {
    match outcome {
        InferenceOutcome::Structured(value) => Some(value),
        InferenceOutcome::Empty => {
            warn!(stage, "empty reply");
            None
        }
        InferenceOutcome::Text(text) => {
            let parsed = subconscious_llm::parse_structured_reply(&text).into_structured();
            if parsed.is_none() {
                warn!(stage, "reply was not JSON");
            }
            parsed
        }
        InferenceOutcome::Failed(failure) => {
            warn!(stage, error = %failure, "inference failed");
            None
        }
    }
}

/// Generator stage.  `None` when the model gave nothing usable.
#[instrument(skip_all, fields(session = %trace.session_id))]
pub async fn generate_analysis(
    gateway: &dyn InferenceGateway,
    trace: &SessionTrace,
) -> Option<SessionAnalysis> {
    let request = InferenceRequest::new(generator_prompt(trace))
        .with_system(GENERATOR_SYSTEM)
        .structured();
    let value = structured_reply("generator", gateway.generate(request).await)?;
    let analysis = SessionAnalysis::from_value(&value);
    match &analysis {
        Some(a) => debug!(observations = a.observations.len(), "analysis ready"),
        None => warn!("generator reply was not an object"),
    }
    analysis
}

/// Reflector stage.  Returned proposals carry a section that exists in the
/// playbook; unknown or empty sections are rewritten to the catch-all.
#[instrument(skip_all, fields(session = %trace.session_id))]
pub async fn reflect(
    gateway: &dyn InferenceGateway,
    playbook: &Playbook,
    trace: &SessionTrace,
    analysis: &SessionAnalysis,
    digest_per_section: usize,
) -> Vec<ProposedBullet> {
    if analysis.observations.is_empty() {
        debug!("no observations, skipping reflector");
        return Vec::new();
    }

    let sections: Vec<&str> = playbook.section_names().collect();
    let digest = playbook.digest(digest_per_section);
    let request = InferenceRequest::new(reflector_prompt(
        trace,
        &analysis.observations,
        &digest,
        &sections,
    ))
    .with_system(REFLECTOR_SYSTEM)
    .structured();

    let Some(value) = structured_reply("reflector", gateway.generate(request).await) else {
        return Vec::new();
    };

    let fallback = FailureCategory::Other.section();
    new_proposals(&value)
        .into_iter()
        .map(|mut proposal| {
            let section = proposal.section.trim();
            if section.is_empty() || !sections.contains(&section) {
                debug!(section = %proposal.section, fallback, "unknown section");
                proposal.section = fallback.to_string();
            } else {
                proposal.section = section.to_string();
            }
            proposal
        })
        .collect()
}

/// Curator stage.  Applies proposals to the playbook in memory; the caller
/// saves.
pub fn curate(
    playbook: &mut Playbook,
    trace: &SessionTrace,
    proposals: &[ProposedBullet],
    similarity_threshold: f64,
) -> CurationSummary {
    let success = trace.success();
    let mut summary = CurationSummary::default();

    for proposal in proposals {
        let content = proposal.content.trim();
        if content.is_empty() {
            continue;
        }
        let existing = playbook
            .find_similar(&proposal.section, content, similarity_threshold)
            .map(|b| b.id.clone());
        match existing {
            Some(id) if success => {
                playbook.update_counts(&id, true);
                summary.reinforced += 1;
            }
            Some(id) => {
                debug!(bullet = %id, "similar bullet exists, session failed");
                summary.unchanged += 1;
            }
            None => {
                playbook.push_bullet(
                    &proposal.section,
                    content,
                    &trace.session_id,
                    u32::from(success),
                );
                summary.added += 1;
            }
        }
    }
    summary
}

/// Run all three stages for one session.  `None` when the Generator gave
/// nothing usable.  Does not save the playbook.
#[instrument(skip_all, fields(session = %trace.session_id))]
pub async fn analyze_session(
    gateway: &dyn InferenceGateway,
    playbook: &mut Playbook,
    trace: &SessionTrace,
    settings: PipelineSettings,
) -> Option<CurationSummary> {
    let analysis = generate_analysis(gateway, trace).await?;
    let proposals = reflect(gateway, playbook, trace, &analysis, settings.digest_per_section).await;
    let summary = curate(playbook, trace, &proposals, settings.similarity_threshold);
    info!(
        added = summary.added,
        reinforced = summary.reinforced,
        unchanged = summary.unchanged,
        "curated session"
    );
    Some(summary)
}

/// Run the pipeline over several sessions, one after the other.  Returns the
/// combined summary and how many sessions produced an analysis.
pub async fn analyze_batch(
    gateway: &dyn InferenceGateway,
    playbook: &mut Playbook,
    traces: &[SessionTrace],
    settings: PipelineSettings,
) -> (CurationSummary, usize) {
    let mut total = CurationSummary::default();
    let mut analyzed = 0;
    for trace in traces {
        if let Some(summary) = analyze_session(gateway, playbook, trace, settings).await {
            total.absorb(summary);
            analyzed += 1;
        }
    }
    (total, analyzed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use subconscious_llm::{InferenceFailure, ScriptedGateway};
    use subconscious_sessions::DodCriterion;
    use tempfile::TempDir;

    const SETTINGS: PipelineSettings = PipelineSettings {
        similarity_threshold: 0.85,
        digest_per_section: 10,
    };

    fn trace(passed: bool) -> SessionTrace {
        SessionTrace {
            session_id: "session_001".into(),
            goal: "Build a todo API".into(),
            completed: true,
            completed_at: "2025-06-01T10:00:00".into(),
            dod_criteria: vec![DodCriterion {
                description: "tests pass".into(),
                passed,
            }],
            ..Default::default()
        }
    }

    fn playbook(dir: &TempDir) -> Playbook {
        Playbook::open(dir.path().join("playbook.json"), 8000).unwrap()
    }

    fn analysis_reply() -> serde_json::Value {
        json!({
            "overall_assessment": "imports broke the build",
            "observations": [{
                "category": "IMPORT_ERROR",
                "pattern": "relative imports",
                "recommendation": "use absolute imports",
                "confidence": 0.9
            }]
        })
    }

    #[tokio::test]
    async fn full_pipeline_adds_bullets() {
        let dir = TempDir::new().unwrap();
        let mut pb = playbook(&dir);
        let gateway = ScriptedGateway::new();
        gateway.push_json(analysis_reply()).push_json(json!({
            "proposed_bullets": [
                {"section": "import_resolution", "content": "Use absolute imports with the module stem."},
                {"section": "made_up_section", "content": "Keep modules small."},
                {"section": "general", "content": "Duplicate idea", "is_new": false},
                {"section": "general", "content": "   "}
            ]
        }));

        let summary = analyze_session(&gateway, &mut pb, &trace(true), SETTINGS)
            .await
            .unwrap();
        assert_eq!(summary.added, 2);
        assert_eq!(summary.reinforced, 0);

        let imports = pb.bullets("import_resolution");
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].helpful_count, 1);
        assert_eq!(imports[0].source_session, "session_001");
        assert_eq!(pb.bullets("general")[0].content, "Keep modules small.");

        let requests = gateway.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.structured));
        assert!(requests[1].prompt.contains("relative imports"));
    }

    #[tokio::test]
    async fn generator_failure_skips_reflector() {
        let dir = TempDir::new().unwrap();
        let mut pb = playbook(&dir);
        let gateway = ScriptedGateway::new();
        gateway.push(InferenceOutcome::Failed(InferenceFailure::Timeout(
            std::time::Duration::from_secs(1),
        )));

        let summary = analyze_session(&gateway, &mut pb, &trace(false), SETTINGS).await;
        assert!(summary.is_none());
        assert_eq!(gateway.requests().len(), 1);
        assert_eq!(pb.total_bullets(), 0);
    }

    #[tokio::test]
    async fn text_replies_are_parsed_leniently() {
        let gateway = ScriptedGateway::new();
        gateway.push(InferenceOutcome::Text(format!(
            "```json\n{}\n```",
            analysis_reply()
        )));
        let analysis = generate_analysis(&gateway, &trace(false)).await.unwrap();
        assert_eq!(analysis.observations.len(), 1);

        gateway.push(InferenceOutcome::Text("no json here".into()));
        assert!(generate_analysis(&gateway, &trace(false)).await.is_none());
    }

    #[tokio::test]
    async fn no_observations_means_no_reflector_call() {
        let dir = TempDir::new().unwrap();
        let mut pb = playbook(&dir);
        let gateway = ScriptedGateway::new();
        gateway.push_json(json!({"overall_assessment": "fine", "observations": []}));

        let summary = analyze_session(&gateway, &mut pb, &trace(true), SETTINGS).await;
        assert_eq!(summary, Some(CurationSummary::default()));
        assert_eq!(gateway.requests().len(), 1);
    }

    #[test]
    fn curator_reinforces_only_on_success() {
        let dir = TempDir::new().unwrap();
        let mut pb = playbook(&dir);
        let id = pb.push_bullet("general", "always pin dependency versions", "s0", 0).id;
        let proposals = vec![ProposedBullet {
            section: "general".into(),
            content: "always pin dependency versions".into(),
            is_new: true,
            reasoning: String::new(),
        }];

        let failed = curate(&mut pb, &trace(false), &proposals, 0.85);
        assert_eq!(failed.unchanged, 1);
        assert_eq!(pb.get_bullet(&id).unwrap().helpful_count, 0);
        assert!(pb.get_bullet(&id).unwrap().last_referenced.is_none());

        let ok = curate(&mut pb, &trace(true), &proposals, 0.85);
        assert_eq!(ok.reinforced, 1);
        let bullet = pb.get_bullet(&id).unwrap();
        assert_eq!(bullet.helpful_count, 1);
        assert!(bullet.last_referenced.is_some());
        assert_eq!(pb.total_bullets(), 1);
    }

    #[test]
    fn failed_session_adds_with_zero_helpful() {
        let dir = TempDir::new().unwrap();
        let mut pb = playbook(&dir);
        let proposals = vec![ProposedBullet {
            section: "error_recovery".into(),
            content: "retry once after a timeout".into(),
            is_new: true,
            reasoning: String::new(),
        }];
        curate(&mut pb, &trace(false), &proposals, 0.85);
        let bullet = &pb.bullets("error_recovery")[0];
        assert_eq!(bullet.helpful_count, 0);
        assert_eq!(bullet.id, "ER-001");
    }
}
