//! Session ingestion.
//!
//! The coding agent leaves one directory per finished task under a shared
//! sessions root.  This crate finds the complete ones, parses them into
//! [`SessionTrace`] records and remembers which have already been consumed.

pub mod ledger;
pub mod scanner;
pub mod trace;

pub use ledger::IdLedger;
pub use scanner::{SessionScanner, parse_session, session_id};
pub use trace::{DodCriterion, SessionTrace, TraceKind, TraceRecord, record_field};
