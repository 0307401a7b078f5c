//! Building an [`AttributeStateTree`] from the live filesystem
//!
//! The walk decides every path against the rule tree and probes the paths
//! that are monitored. The immediate subtrees of the root are walked in
//! parallel; each worker fills its own partial tree and the partial trees are
//! merged once every worker is done.

use crate::attributes::{AttrSet, FileType};
use crate::entry::{AttributeStateTree, Entry, Origin};
use crate::error::{GuardError, Result};
use crate::probe::{FsProbe, ProbeError, Stat};
use crate::rules::{RuleKind, RuleTree};
use parking_lot::Mutex;
use rayon::prelude::*;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone)]
pub struct PopulateOptions {
    /// Directory the recorded path `/` refers to
    pub root_prefix: PathBuf,
    /// Only paths matching this are captured
    pub limit: Option<Regex>,
    /// Decide paths without reading any file content
    pub dry_run: bool,
}

impl Default for PopulateOptions {
    fn default() -> Self {
        Self {
            root_prefix: PathBuf::from("/"),
            limit: None,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PopulateStats {
    pub visited: usize,
    pub captured: usize,
    pub skipped: usize,
    pub degraded: usize,
}

impl PopulateStats {
    fn add(&mut self, other: &PopulateStats) {
        self.visited += other.visited;
        self.captured += other.captured;
        self.skipped += other.skipped;
        self.degraded += other.degraded;
    }
}

/// A path that failed to probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DegradedEntry {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct Populated {
    pub tree: AttributeStateTree,
    pub stats: PopulateStats,
    /// Failures on paths that have no entry in `tree`, such as an
    /// unmonitored directory that could not be listed
    pub unreadable: Vec<DegradedEntry>,
}

impl Populated {
    /// Every failure of the scan, degraded entries and unreadable paths
    /// alike, in path order. Its length equals `stats.degraded`.
    pub fn degraded(&self) -> Vec<DegradedEntry> {
        let mut all: Vec<DegradedEntry> = self
            .tree
            .degraded()
            .map(|e| DegradedEntry {
                path: e.path.clone(),
                reason: e.degraded.clone().unwrap_or_default(),
            })
            .chain(self.unreadable.iter().cloned())
            .collect();
        all.sort_by(|a, b| a.path.cmp(&b.path));
        all
    }
}

pub struct TreePopulator<'a, P: FsProbe> {
    rules: &'a RuleTree,
    probe: &'a P,
    options: &'a PopulateOptions,
    seen: Mutex<HashSet<(u64, u64)>>,
}

/// Partial result of one worker
#[derive(Default)]
struct Partial {
    tree: AttributeStateTree,
    stats: PopulateStats,
    unreadable: Vec<DegradedEntry>,
}

impl<'a, P: FsProbe> TreePopulator<'a, P> {
    pub fn new(rules: &'a RuleTree, probe: &'a P, options: &'a PopulateOptions) -> Self {
        Self {
            rules,
            probe,
            options,
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Walk the whole tree below the root prefix
    pub fn populate(&self) -> Result<Populated> {
        info!(
            root = %self.options.root_prefix.display(),
            dry_run = self.options.dry_run,
            "scanning filesystem"
        );
        let root_stat = self
            .probe
            .stat(&self.options.root_prefix)
            .map_err(|e| {
                GuardError::io(
                    &self.options.root_prefix,
                    std::io::Error::new(std::io::ErrorKind::Other, e),
                )
            })?;

        let mut root = Partial::default();
        let children = self
            .visit("/", root_stat, &mut root)
            .unwrap_or_default();

        let partials: Vec<Partial> = children
            .par_iter()
            .map(|name| self.walk_subtree(join("/", name)))
            .collect();

        let mut tree = root.tree;
        let mut stats = root.stats;
        let mut unreadable = root.unreadable;
        for partial in partials {
            tree.merge(partial.tree);
            stats.add(&partial.stats);
            unreadable.extend(partial.unreadable);
        }
        info!(
            visited = stats.visited,
            captured = stats.captured,
            skipped = stats.skipped,
            degraded = stats.degraded,
            "filesystem scan finished"
        );
        Ok(Populated {
            tree,
            stats,
            unreadable,
        })
    }

    /// Depth-first walk of one subtree with an explicit stack
    fn walk_subtree(&self, start: String) -> Partial {
        let mut partial = Partial::default();
        let mut stack = vec![start];
        while let Some(path) = stack.pop() {
            let fs_path = self.fs_path(&path);
            let stat = match self.probe.stat(&fs_path) {
                Ok(stat) => stat,
                Err(ProbeError::Vanished(_)) => {
                    trace!(path = %path, "vanished before it could be examined");
                    continue;
                }
                Err(e) => {
                    self.record_unexamined(&path, e, &mut partial);
                    continue;
                }
            };
            if let Some(children) = self.visit(&path, stat, &mut partial) {
                // reversed so the lexicographically first child is visited first
                stack.extend(children.iter().rev().map(|name| join(&path, name)));
            }
        }
        partial
    }

    /// Decide and capture one path. Returns the children to descend into.
    fn visit(&self, path: &str, stat: Stat, partial: &mut Partial) -> Option<Vec<String>> {
        partial.stats.visited += 1;
        let decision = self.rules.match_path(path, stat.file_type);

        match &decision {
            Some(m) if m.is_monitored() && self.within_limit(path) => {
                debug!(path, rule = %m.pattern, node = %m.node, attrs = %m.attrs, "monitored");
                let entry = self.capture(path, stat.file_type, m.attrs);
                if entry.is_degraded() {
                    partial.stats.degraded += 1;
                }
                partial.stats.captured += 1;
                partial.tree.insert(entry);
            }
            Some(m) => {
                debug!(path, rule = %m.pattern, kind = m.kind.as_str(), "not captured");
                partial.stats.skipped += 1;
            }
            None => {
                trace!(path, "no rule matches");
                partial.stats.skipped += 1;
            }
        }

        if stat.file_type != FileType::Directory {
            return None;
        }
        if let Some(m) = &decision {
            if m.kind == RuleKind::Negate && !self.rules.has_rules_below(path) {
                debug!(path, "pruned by negate rule");
                return None;
            }
        }
        if !self.first_visit(stat) {
            warn!(path, "directory already visited, not descending again");
            return None;
        }

        match self.probe.list_dir(&self.fs_path(path)) {
            Ok(names) => Some(names),
            Err(ProbeError::Vanished(_)) => None,
            Err(e) => {
                warn!(path, error = %e, "cannot list directory");
                let reason = format!("cannot list directory: {}", e);
                match partial.tree.get_mut(path) {
                    Some(entry) if entry.is_degraded() => {}
                    Some(entry) => {
                        entry.degraded = Some(reason);
                        partial.stats.degraded += 1;
                    }
                    None => {
                        partial.unreadable.push(DegradedEntry {
                            path: path.to_string(),
                            reason,
                        });
                        partial.stats.degraded += 1;
                    }
                }
                None
            }
        }
    }

    /// A path whose metadata could not be read. Its file type is unknown,
    /// so it is recorded as a degraded entry when a rule would monitor it
    /// as any type.
    fn record_unexamined(&self, path: &str, error: ProbeError, partial: &mut Partial) {
        partial.stats.visited += 1;
        partial.stats.degraded += 1;
        let decision = FileType::ALL
            .iter()
            .filter_map(|t| self.rules.match_path(path, *t))
            .find(|m| m.is_monitored());

        match decision {
            Some(m) if self.within_limit(path) => {
                warn!(path, error = %error, "cannot examine path, recording degraded entry");
                let mut entry = Entry::new(path, Origin::Filesystem).with_requested(m.attrs);
                entry.degraded = Some(error.to_string());
                partial.stats.captured += 1;
                partial.tree.insert(entry);
            }
            _ => {
                warn!(path, error = %error, "cannot examine path");
                partial.unreadable.push(DegradedEntry {
                    path: path.to_string(),
                    reason: error.to_string(),
                });
            }
        }
    }

    fn capture(&self, path: &str, file_type: FileType, attrs: AttrSet) -> Entry {
        let fresh = || {
            Entry::new(path, Origin::Filesystem)
                .with_file_type(file_type)
                .with_requested(attrs)
        };
        if self.options.dry_run {
            return fresh();
        }

        let fs_path = self.fs_path(path);
        let mut entry = fresh();
        let first = match self.probe.probe(&fs_path, attrs, &mut entry) {
            Ok(()) => return entry,
            Err(e) => e,
        };
        let failure = if first.is_transient() {
            debug!(path, error = %first, "probe interrupted, retrying once");
            entry = fresh();
            match self.probe.probe(&fs_path, attrs, &mut entry) {
                Ok(()) => return entry,
                Err(e) => e,
            }
        } else {
            first
        };
        warn!(path, error = %failure, "recording degraded entry");
        entry.degraded = Some(failure.to_string());
        entry
    }

    fn within_limit(&self, path: &str) -> bool {
        self.options
            .limit
            .as_ref()
            .map_or(true, |limit| limit.is_match(path))
    }

    /// Record a directory in the cycle guard; false if it was seen before
    fn first_visit(&self, stat: Stat) -> bool {
        if stat.dev == 0 && stat.inode == 0 {
            return true;
        }
        self.seen.lock().insert((stat.dev, stat.inode))
    }

    fn fs_path(&self, path: &str) -> PathBuf {
        let relative = path.trim_start_matches('/');
        if relative.is_empty() {
            self.options.root_prefix.clone()
        } else {
            self.options.root_prefix.join(Path::new(relative))
        }
    }
}

fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}
