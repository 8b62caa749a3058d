use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use subconscious_core::lenient_timestamp;

/// A single knowledge unit, e.g. `IR-003` in `import_resolution`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bullet {
    pub id: String,
    pub content: String,
    pub section: String,
    /// Times this bullet was in context during a success.
    #[serde(default)]
    pub helpful_count: u32,
    /// Times this bullet was in context during a failure.
    #[serde(default)]
    pub harmful_count: u32,
    #[serde(default)]
    pub source_session: String,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub added: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub last_referenced: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub last_validated: Option<DateTime<Utc>>,
}

impl Bullet {
    pub fn new(
        id: impl Into<String>,
        section: impl Into<String>,
        content: impl Into<String>,
        source_session: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            section: section.into(),
            helpful_count: 0,
            harmful_count: 0,
            source_session: source_session.into(),
            added: Some(now),
            last_referenced: Some(now),
            last_validated: None,
        }
    }

    pub fn total_references(&self) -> u32 {
        self.helpful_count + self.harmful_count
    }

    /// `helpful / (helpful + harmful)`, or exactly `0.5` for a bullet that
    /// has never been referenced.
    pub fn quality_ratio(&self) -> f64 {
        match self.total_references() {
            0 => 0.5,
            total => f64::from(self.helpful_count) / f64::from(total),
        }
    }

    /// Ranking score: confidence weighted by how often it was validated.
    pub fn score(&self) -> f64 {
        self.quality_ratio() * f64::from(self.total_references()).ln_1p()
    }

    /// Numeric suffix of the id (`IR-012` → 12).
    pub fn sequence(&self) -> Option<u32> {
        self.id.rsplit_once('-').and_then(|(_, n)| n.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bullet(helpful: u32, harmful: u32) -> Bullet {
        Bullet {
            helpful_count: helpful,
            harmful_count: harmful,
            ..Bullet::new("GE-001", "general", "x", "", Utc::now())
        }
    }

    #[test]
    fn unreferenced_bullet_is_neutral() {
        assert_eq!(bullet(0, 0).quality_ratio(), 0.5);
        assert_eq!(bullet(0, 0).score(), 0.0);
    }

    #[test]
    fn quality_ratio_stays_in_unit_interval() {
        for (h, x) in [(1, 0), (0, 1), (3, 1), (7, 13), (100, 0)] {
            let r = bullet(h, x).quality_ratio();
            assert!((0.0..=1.0).contains(&r), "{h}/{x} gave {r}");
        }
        assert_eq!(bullet(3, 1).quality_ratio(), 0.75);
    }

    #[test]
    fn score_rewards_volume_at_equal_ratio() {
        assert!(bullet(10, 0).score() > bullet(1, 0).score());
        assert!((bullet(1, 0).score() - 2f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn sequence_parses_suffix() {
        assert_eq!(bullet(0, 0).sequence(), Some(1));
        let odd = Bullet {
            id: "custom".into(),
            ..bullet(0, 0)
        };
        assert_eq!(odd.sequence(), None);
    }

    #[test]
    fn loads_foreign_timestamps() {
        let raw = r#"{
            "id": "IR-001", "content": "c", "section": "import_resolution",
            "helpful_count": 2, "added": "2025-05-01T09:30:00.123456",
            "last_referenced": "", "last_validated": "2025-05-02T00:00:00+00:00",
            "unknown_field": 1
        }"#;
        let b: Bullet = serde_json::from_str(raw).unwrap();
        assert_eq!(b.helpful_count, 2);
        assert_eq!(b.harmful_count, 0);
        assert_eq!(b.added.unwrap().to_rfc3339(), "2025-05-01T09:30:00.123456+00:00");
        assert!(b.last_referenced.is_none());
        assert!(b.last_validated.is_some());
    }
}
