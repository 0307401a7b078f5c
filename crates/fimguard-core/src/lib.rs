//! fimguard core - host-based file integrity monitoring
//!
//! Captures a baseline of filesystem attributes selected by path rules,
//! persists it as a database and reports additions, removals and attribute
//! changes against a later scan or a second database.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  GuardConfig ──compile──> RunContext (immutable)            │
//! │    ├── GroupResolver  (named attribute sets)                │
//! │    └── RuleTree       (path -> attribute mask)              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ActionController                                           │
//! │    ├── TreePopulator  (parallel walk, FsProbe)              │
//! │    ├── DatabaseReader / DatabaseWriter                      │
//! │    └── DiffEngine     (linear merge of two trees)           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod action;
pub mod attributes;
pub mod config;
pub mod database;
pub mod diff;
pub mod entry;
pub mod error;
pub mod groups;
pub mod populate;
pub mod probe;
pub mod rules;

// Re-exports
pub use action::{ActionController, ActionFlags, DegradedEntry, RunMode, RunOutcome};
pub use attributes::{AttrSet, AttrValue, Attribute, FileType};
pub use config::{GuardConfig, RunContext};
pub use database::{DatabaseLocation, DatabaseReader, DatabaseWriter};
pub use diff::{AttrChange, DiffEngine, DiffRecord, DiffSummary, ReportPolicy, Verdict};
pub use entry::{AttributeStateTree, Entry, Origin};
pub use error::{GuardError, Result};
pub use groups::GroupResolver;
pub use populate::{PopulateOptions, PopulateStats, TreePopulator};
pub use probe::{FsProbe, LocalProbe, ProbeError};
pub use rules::{RuleKind, RuleMatch, RuleTree, RuleTreeBuilder, TypeRestriction};
