//! The playbook: a durable, section-partitioned set of short heuristics
//! ("bullets") learned from past sessions, each with helpful/harmful
//! counters.  Grows by delta appends and edits; shrinks only through
//! deduplication and pruning.

pub mod bullet;
pub mod section;
pub mod similarity;
pub mod store;

pub use bullet::Bullet;
pub use section::{AgentRole, DEFAULT_SECTIONS, section_prefix};
pub use similarity::jaccard_similarity;
pub use store::{EXPORT_HEADER, Playbook, PlaybookMetadata, PlaybookStats};
