//! Comparison of two attribute state trees
//!
//! The engine walks both trees in path order in a single merge pass and
//! emits one [`DiffRecord`] per path that was added, removed or changed.
//! Identical inputs always produce identical output.

use crate::attributes::{AttrSet, AttrValue, Attribute, FileType};
use crate::entry::{AttributeStateTree, Entry};
use crate::error::{EXIT_ADDED, EXIT_CHANGED, EXIT_OK, EXIT_REMOVED};
use regex::Regex;
use serde::Serialize;
use std::cmp::Ordering;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Added,
    Removed,
    Changed,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Changed => "changed",
        }
    }
}

/// One differing attribute. A missing side means the attribute was not
/// captured there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrChange {
    pub attr: Attribute,
    pub old: Option<AttrValue>,
    pub new: Option<AttrValue>,
    /// Listed because of the force policy, not because it differs
    pub forced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffRecord {
    pub path: String,
    pub verdict: Verdict,
    pub file_type: Option<FileType>,
    /// Empty for added and removed paths
    pub changes: Vec<AttrChange>,
}

/// Per-run policies deciding which attribute differences count
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportPolicy {
    /// Attributes captured only in the new tree that are not changes
    pub ignore_added: AttrSet,
    /// Attributes captured only in the old tree that are not changes
    pub ignore_removed: AttrSet,
    /// Attributes whose value changes are not reported
    pub ignore_changed: AttrSet,
    /// Attributes always listed on changed paths
    pub force: AttrSet,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
}

impl DiffSummary {
    pub fn from_records(records: &[DiffRecord]) -> Self {
        let mut summary = DiffSummary::default();
        for record in records {
            match record.verdict {
                Verdict::Added => summary.added += 1,
                Verdict::Removed => summary.removed += 1,
                Verdict::Changed => summary.changed += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.added + self.removed + self.changed
    }

    pub fn is_clean(&self) -> bool {
        self.total() == 0
    }

    /// Exit code bit-field: 1 added, 2 removed, 4 changed
    pub fn exit_code(&self) -> i32 {
        let mut code = EXIT_OK;
        if self.added > 0 {
            code |= EXIT_ADDED;
        }
        if self.removed > 0 {
            code |= EXIT_REMOVED;
        }
        if self.changed > 0 {
            code |= EXIT_CHANGED;
        }
        code
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiffEngine {
    policy: ReportPolicy,
    limit: Option<Regex>,
}

impl DiffEngine {
    pub fn new(policy: ReportPolicy) -> Self {
        Self {
            policy,
            limit: None,
        }
    }

    /// Restrict the comparison to paths matching `limit`
    pub fn with_limit(mut self, limit: Option<Regex>) -> Self {
        self.limit = limit;
        self
    }

    fn in_scope(&self, entry: &Entry) -> bool {
        self.limit
            .as_ref()
            .map_or(true, |limit| limit.is_match(&entry.path))
    }

    /// Compare `old` against `new`
    pub fn diff(&self, old: &AttributeStateTree, new: &AttributeStateTree) -> Vec<DiffRecord> {
        let mut records = Vec::new();
        let mut left = old.iter().filter(|e| self.in_scope(e)).peekable();
        let mut right = new.iter().filter(|e| self.in_scope(e)).peekable();

        loop {
            let order = match (left.peek(), right.peek()) {
                (None, None) => break,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.path.cmp(&b.path),
            };
            match order {
                Ordering::Less => {
                    if let Some(a) = left.next() {
                        records.push(DiffRecord {
                            path: a.path.clone(),
                            verdict: Verdict::Removed,
                            file_type: a.file_type,
                            changes: Vec::new(),
                        });
                    }
                }
                Ordering::Greater => {
                    if let Some(b) = right.next() {
                        records.push(DiffRecord {
                            path: b.path.clone(),
                            verdict: Verdict::Added,
                            file_type: b.file_type,
                            changes: Vec::new(),
                        });
                    }
                }
                Ordering::Equal => {
                    if let (Some(a), Some(b)) = (left.next(), right.next()) {
                        if let Some(record) = self.compare(a, b) {
                            records.push(record);
                        }
                    }
                }
            }
        }

        let summary = DiffSummary::from_records(&records);
        info!(
            added = summary.added,
            removed = summary.removed,
            changed = summary.changed,
            "comparison finished"
        );
        records
    }

    /// Compare two entries for the same path
    pub fn compare(&self, old: &Entry, new: &Entry) -> Option<DiffRecord> {
        let growing = old.requested.union(new.requested).contains(Attribute::SizeGrowing);
        let mut changes = Vec::new();

        for attr in old.captured().union(new.captured()).iter() {
            let change = match (old.get(attr), new.get(attr)) {
                (Some(a), Some(b)) => {
                    if a == b || self.policy.ignore_changed.contains(attr) {
                        false
                    } else {
                        !(attr == Attribute::Size && growing && grew(a, b))
                    }
                }
                (Some(_), None) => !self.policy.ignore_removed.contains(attr),
                (None, Some(_)) => !self.policy.ignore_added.contains(attr),
                (None, None) => false,
            };
            if change {
                changes.push(AttrChange {
                    attr,
                    old: old.get(attr).cloned(),
                    new: new.get(attr).cloned(),
                    forced: false,
                });
            }
        }

        if changes.is_empty() {
            return None;
        }

        for attr in self.policy.force.iter() {
            if changes.iter().any(|c| c.attr == attr) {
                continue;
            }
            let (a, b) = (old.get(attr), new.get(attr));
            if a.is_some() || b.is_some() {
                changes.push(AttrChange {
                    attr,
                    old: a.cloned(),
                    new: b.cloned(),
                    forced: true,
                });
            }
        }

        debug!(path = %new.path, changed = changes.len(), "entry changed");
        Some(DiffRecord {
            path: new.path.clone(),
            verdict: Verdict::Changed,
            file_type: new.file_type.or(old.file_type),
            changes,
        })
    }
}

fn grew(old: &AttrValue, new: &AttrValue) -> bool {
    matches!((old, new), (AttrValue::Number(a), AttrValue::Number(b)) if b >= a)
}
