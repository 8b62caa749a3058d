//! Plumbing shared by every subconscious crate: crash-safe JSON documents,
//! tolerant timestamp parsing and prompt-safe string truncation.

pub mod persist;
pub mod text;
pub mod time;

pub use persist::{read_json, read_json_or_default, write_json_atomic};
pub use text::truncate_str;
pub use time::{lenient_timestamp, parse_timestamp};
