use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use subconscious_core::{lenient_timestamp, read_json, truncate_str, write_json_atomic};

use crate::bullet::Bullet;
use crate::section::{AgentRole, DEFAULT_SECTIONS, section_prefix};
use crate::similarity::jaccard_similarity;

/// First line of every rendered excerpt.
pub const EXPORT_HEADER: &str = "## Coding Playbook (learned patterns — follow these)\n";

const PLAYBOOK_VERSION: &str = "0.1.0";
const CHARS_PER_TOKEN: usize = 4;
/// Bullets with fewer references than this are never pruned.
const MIN_EVIDENCE: u32 = 5;
const STALE_MAX_REFERENCES: u32 = 3;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybookMetadata {
    pub total_sessions_analyzed: u64,
    pub total_deltas_applied: u64,
    pub total_bullets_pruned: u64,
}

/// The persisted document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlaybookDocument {
    #[serde(default = "default_version")]
    version: String,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    token_budget: usize,
    #[serde(default)]
    metadata: PlaybookMetadata,
    /// Next sequence number per section.  Persisted so ids never repeat.
    #[serde(default)]
    next_ids: BTreeMap<String, u32>,
    #[serde(default)]
    sections: BTreeMap<String, Vec<Bullet>>,
}

fn default_version() -> String {
    PLAYBOOK_VERSION.to_string()
}

impl PlaybookDocument {
    fn empty(token_budget: usize) -> Self {
        Self {
            version: default_version(),
            last_updated: None,
            token_budget,
            metadata: PlaybookMetadata::default(),
            next_ids: DEFAULT_SECTIONS.iter().map(|s| (s.to_string(), 1)).collect(),
            sections: DEFAULT_SECTIONS.iter().map(|s| (s.to_string(), Vec::new())).collect(),
        }
    }

    /// Make sure every section's counter is past its highest existing id.
    fn reconcile_next_ids(&mut self) {
        for (name, bullets) in &self.sections {
            let floor = bullets
                .iter()
                .filter_map(Bullet::sequence)
                .max()
                .map_or(1, |max| max + 1);
            let next = self.next_ids.entry(name.clone()).or_insert(floor);
            if *next < floor {
                warn!(section = %name, stored = *next, floor, "next id behind existing bullets, advancing");
                *next = floor;
            }
        }
    }
}

/// Summary for status output and self-evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct PlaybookStats {
    pub total_bullets: usize,
    pub sections: BTreeMap<String, usize>,
    pub avg_quality: f64,
    pub metadata: PlaybookMetadata,
    pub most_helpful: Vec<Bullet>,
}

/// The knowledge store.  Single writer: the daemon owns the only instance.
#[derive(Debug)]
pub struct Playbook {
    path: PathBuf,
    doc: PlaybookDocument,
}

impl Playbook {
    /// Load the playbook at `path`, or create an empty one with the default
    /// sections.  A corrupt document is set aside as `<name>.corrupt` and
    /// replaced by an empty playbook.
    pub fn open(path: impl Into<PathBuf>, token_budget: usize) -> Result<Self> {
        let path = path.into();
        match read_json::<PlaybookDocument>(&path) {
            Ok(Some(doc)) => Ok(Self::loaded(path, doc, token_budget)),
            Ok(None) => Self::initialize(path, token_budget),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "corrupt playbook, reinitializing");
                let aside = path.with_extension("json.corrupt");
                if let Err(copy_err) = fs::copy(&path, &aside) {
                    warn!(error = %copy_err, "could not preserve corrupt playbook");
                }
                Self::initialize(path, token_budget)
            }
        }
    }

    /// Read-only view for processes that do not own the playbook.  Never
    /// touches the file: a missing or corrupt document reads as empty.
    pub fn load(path: impl Into<PathBuf>, token_budget: usize) -> Self {
        let path = path.into();
        match read_json::<PlaybookDocument>(&path) {
            Ok(Some(doc)) => Self::loaded(path, doc, token_budget),
            Ok(None) => Self {
                path,
                doc: PlaybookDocument::empty(token_budget),
            },
            Err(err) => {
                warn!(path = %path.display(), error = %err, "unreadable playbook, showing it empty");
                Self {
                    path,
                    doc: PlaybookDocument::empty(token_budget),
                }
            }
        }
    }

    fn loaded(path: PathBuf, mut doc: PlaybookDocument, token_budget: usize) -> Self {
        if doc.token_budget == 0 {
            doc.token_budget = token_budget;
        }
        doc.reconcile_next_ids();
        let playbook = Self { path, doc };
        info!(
            path = %playbook.path.display(),
            bullets = playbook.total_bullets(),
            "loaded playbook"
        );
        playbook
    }

    fn initialize(path: PathBuf, token_budget: usize) -> Result<Self> {
        let mut playbook = Self {
            path,
            doc: PlaybookDocument::empty(token_budget),
        };
        playbook.save()?;
        info!(path = %playbook.path.display(), "initialized empty playbook");
        Ok(playbook)
    }

    /// Persist the whole document atomically.
    pub fn save(&mut self) -> Result<()> {
        self.doc.last_updated = Some(Utc::now());
        write_json_atomic(&self.path, &self.doc)
            .with_context(|| format!("save playbook {}", self.path.display()))?;
        debug!(
            bullets = self.total_bullets(),
            sections = self.doc.sections.len(),
            "playbook saved"
        );
        Ok(())
    }

    // ── Accessors ──────────────────────────────────────────────────────────

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> &str {
        &self.doc.version
    }

    pub fn token_budget(&self) -> usize {
        self.doc.token_budget
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.doc.last_updated
    }

    pub fn metadata(&self) -> &PlaybookMetadata {
        &self.doc.metadata
    }

    pub fn total_bullets(&self) -> usize {
        self.doc.sections.values().map(Vec::len).sum()
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.doc.sections.keys().map(String::as_str)
    }

    pub fn bullets(&self, section: &str) -> &[Bullet] {
        self.doc.sections.get(section).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn all_bullets(&self) -> impl Iterator<Item = &Bullet> {
        self.doc.sections.values().flatten()
    }

    pub fn next_id(&self, section: &str) -> u32 {
        self.doc.next_ids.get(section).copied().unwrap_or(1)
    }

    pub fn get_bullet(&self, id: &str) -> Option<&Bullet> {
        self.all_bullets().find(|b| b.id == id)
    }

    fn get_bullet_mut(&mut self, id: &str) -> Option<&mut Bullet> {
        self.doc.sections.values_mut().flatten().find(|b| b.id == id)
    }

    /// Count one more analyzed session.  Not persisted until the next save.
    pub fn record_session_analyzed(&mut self) {
        self.doc.metadata.total_sessions_analyzed += 1;
    }

    // ── Delta updates ──────────────────────────────────────────────────────

    fn mint_id(&mut self, section: &str) -> String {
        self.doc.sections.entry(section.to_string()).or_default();
        let next = self.doc.next_ids.entry(section.to_string()).or_insert(1);
        let id = format!("{}-{:03}", section_prefix(section), *next);
        *next += 1;
        id
    }

    /// Append a bullet without persisting.  The caller is responsible for
    /// calling [`Playbook::save`]; used when several deltas land together.
    pub fn push_bullet(
        &mut self,
        section: &str,
        content: &str,
        source_session: &str,
        helpful_count: u32,
    ) -> Bullet {
        let id = self.mint_id(section);
        let mut bullet = Bullet::new(id, section, content.trim(), source_session, Utc::now());
        bullet.helpful_count = helpful_count;

        info!(
            bullet = %bullet.id,
            section,
            content = %truncate_str(&bullet.content, 80),
            "added bullet"
        );
        self.doc
            .sections
            .entry(section.to_string())
            .or_default()
            .push(bullet.clone());
        self.doc.metadata.total_deltas_applied += 1;
        bullet
    }

    /// Append a new bullet and persist before returning.
    pub fn add_bullet(&mut self, section: &str, content: &str, source_session: &str) -> Result<Bullet> {
        self.add_bullet_seeded(section, content, source_session, 0)
    }

    /// [`Playbook::add_bullet`] with a preset helpful count.
    pub fn add_bullet_seeded(
        &mut self,
        section: &str,
        content: &str,
        source_session: &str,
        helpful_count: u32,
    ) -> Result<Bullet> {
        let bullet = self.push_bullet(section, content, source_session, helpful_count);
        self.save()?;
        Ok(bullet)
    }

    /// Count one helpful or harmful reference.  Returns whether `id` exists.
    pub fn update_counts(&mut self, id: &str, helpful: bool) -> bool {
        let Some(bullet) = self.get_bullet_mut(id) else {
            return false;
        };
        if helpful {
            bullet.helpful_count += 1;
        } else {
            bullet.harmful_count += 1;
        }
        bullet.last_referenced = Some(Utc::now());
        true
    }

    /// Edit content in place, keeping the accumulated counters.
    pub fn update_content(&mut self, id: &str, content: &str) -> bool {
        let Some(bullet) = self.get_bullet_mut(id) else {
            return false;
        };
        info!(
            bullet = %id,
            old = %truncate_str(&bullet.content, 60),
            new = %truncate_str(content.trim(), 60),
            "updated bullet"
        );
        bullet.content = content.trim().to_string();
        bullet.last_validated = Some(Utc::now());
        true
    }

    pub fn remove_bullet(&mut self, id: &str) -> Option<Bullet> {
        for bullets in self.doc.sections.values_mut() {
            if let Some(pos) = bullets.iter().position(|b| b.id == id) {
                let removed = bullets.remove(pos);
                self.doc.metadata.total_bullets_pruned += 1;
                info!(bullet = %id, "removed bullet");
                return Some(removed);
            }
        }
        None
    }

    /// First bullet in `section` whose content is at least `threshold`
    /// similar to `content`.
    pub fn find_similar(&self, section: &str, content: &str, threshold: f64) -> Option<&Bullet> {
        self.bullets(section)
            .iter()
            .find(|b| jaccard_similarity(content, &b.content) >= threshold)
    }

    // ── Deduplication & pruning ────────────────────────────────────────────

    /// Merge near-duplicate bullets within each section.  The higher quality
    /// ratio survives (ties keep the earlier bullet) and absorbs the loser's
    /// counters.  Returns the number of bullets removed.
    pub fn deduplicate(&mut self, threshold: f64) -> Result<usize> {
        let mut removed = 0usize;

        for (section, bullets) in self.doc.sections.iter_mut() {
            let n = bullets.len();
            if n < 2 {
                continue;
            }
            let mut lost = vec![false; n];

            for i in 0..n {
                if lost[i] {
                    continue;
                }
                for j in (i + 1)..n {
                    if lost[j] {
                        continue;
                    }
                    if jaccard_similarity(&bullets[i].content, &bullets[j].content) < threshold {
                        continue;
                    }
                    let (winner, loser) =
                        if bullets[i].quality_ratio() >= bullets[j].quality_ratio() {
                            (i, j)
                        } else {
                            (j, i)
                        };
                    let (helpful, harmful) =
                        (bullets[loser].helpful_count, bullets[loser].harmful_count);
                    bullets[winner].helpful_count += helpful;
                    bullets[winner].harmful_count += harmful;
                    lost[loser] = true;
                    debug!(
                        section = %section,
                        kept = %bullets[winner].id,
                        merged = %bullets[loser].id,
                        "merged duplicate bullets"
                    );
                    if loser == i {
                        break;
                    }
                }
            }

            let mut flags = lost.iter();
            bullets.retain(|_| !flags.next().copied().unwrap_or(false));
            removed += lost.iter().filter(|l| **l).count();
        }

        if removed > 0 {
            self.doc.metadata.total_bullets_pruned += removed as u64;
            self.save()?;
            info!(removed, "deduplicated playbook");
        }
        Ok(removed)
    }

    pub fn prune_stale(&mut self, stale_days: i64, min_quality: f64) -> Result<usize> {
        self.prune_stale_at(Utc::now(), stale_days, min_quality)
    }

    /// Remove bullets with enough evidence that are harmful, or stale and
    /// barely used.  Returns the number removed.
    pub fn prune_stale_at(
        &mut self,
        now: DateTime<Utc>,
        stale_days: i64,
        min_quality: f64,
    ) -> Result<usize> {
        let cutoff = now - TimeDelta::days(stale_days);
        let mut pruned = 0usize;

        for bullets in self.doc.sections.values_mut() {
            let before = bullets.len();
            bullets.retain(|b| !should_prune(b, cutoff, min_quality));
            pruned += before - bullets.len();
        }

        if pruned > 0 {
            self.doc.metadata.total_bullets_pruned += pruned as u64;
            self.save()?;
            info!(pruned, "pruned stale or harmful bullets");
        }
        Ok(pruned)
    }

    // ── Selection & export ─────────────────────────────────────────────────

    /// Top `n` bullets by score, optionally from a single section.
    pub fn get_top_bullets(&self, n: usize, section_filter: Option<&str>) -> Vec<&Bullet> {
        let candidates = self
            .doc
            .sections
            .iter()
            .filter(|(name, _)| section_filter.is_none_or(|f| f == name.as_str()))
            .flat_map(|(_, bullets)| bullets);
        let mut ranked = rank(candidates);
        ranked.truncate(n);
        ranked
    }

    /// Render the excerpt for an agent role.  Unknown roles see every section.
    pub fn export_for_agent(&self, role: &str, max_tokens: usize) -> String {
        match AgentRole::from_label(role) {
            Some(role) => self.export_sections(role.sections(), max_tokens),
            None => {
                let all: Vec<&str> = self.section_names().collect();
                self.export_sections(&all, max_tokens)
            }
        }
    }

    /// Render bullets from `sections`, best first, within `max_tokens`
    /// (approximated as four characters per token).  Never cuts a bullet.
    pub fn export_sections(&self, sections: &[&str], max_tokens: usize) -> String {
        let candidates = sections
            .iter()
            .filter_map(|s| self.doc.sections.get(*s))
            .flatten();
        let budget = max_tokens.saturating_mul(CHARS_PER_TOKEN);

        let mut out = String::from(EXPORT_HEADER);
        let mut used = EXPORT_HEADER.chars().count();
        for bullet in rank(candidates) {
            let line = format!("- [{}] {}\n", bullet.id, bullet.content);
            let len = line.chars().count();
            if used + len > budget {
                break;
            }
            out.push_str(&line);
            used += len;
        }
        out
    }

    /// Best bullets of every non-empty section, for showing the model what
    /// the playbook already knows.
    pub fn digest(&self, per_section: usize) -> String {
        let mut out = String::new();
        for name in self.section_names() {
            let top = self.get_top_bullets(per_section, Some(name));
            if top.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!("[{name}]\n"));
            for bullet in top {
                out.push_str(&format!("  - [{}] {}\n", bullet.id, bullet.content));
            }
        }
        out
    }

    pub fn stats(&self) -> PlaybookStats {
        let all: Vec<&Bullet> = self.all_bullets().collect();
        let avg_quality = if all.is_empty() {
            0.0
        } else {
            all.iter().map(|b| b.quality_ratio()).sum::<f64>() / all.len() as f64
        };
        let mut most_helpful = all.clone();
        most_helpful.sort_by(|a, b| b.helpful_count.cmp(&a.helpful_count));

        PlaybookStats {
            total_bullets: all.len(),
            sections: self
                .doc
                .sections
                .iter()
                .map(|(name, bullets)| (name.clone(), bullets.len()))
                .collect(),
            avg_quality,
            metadata: self.doc.metadata.clone(),
            most_helpful: most_helpful.into_iter().take(5).cloned().collect(),
        }
    }
}

fn should_prune(bullet: &Bullet, cutoff: DateTime<Utc>, min_quality: f64) -> bool {
    let references = bullet.total_references();
    if references < MIN_EVIDENCE {
        return false;
    }
    if bullet.quality_ratio() < min_quality {
        debug!(bullet = %bullet.id, quality = bullet.quality_ratio(), "pruning harmful bullet");
        return true;
    }
    let stale = bullet.last_referenced.is_none_or(|at| at < cutoff);
    // Unused and unproven.
    if stale && references < STALE_MAX_REFERENCES {
        debug!(bullet = %bullet.id, "pruning stale bullet");
        return true;
    }
    false
}

/// Sort by score, best first.  Stable, so equal scores keep document order.
fn rank<'a>(bullets: impl Iterator<Item = &'a Bullet>) -> Vec<&'a Bullet> {
    let mut ranked: Vec<&Bullet> = bullets.collect();
    ranked.sort_by(|a, b| b.score().total_cmp(&a.score()));
    ranked
}
