//! Run orchestration
//!
//! Action flags select one of a fixed set of run modes. The controller
//! validates the databases a mode needs before doing any I/O, then runs the
//! phases of that mode in order: load, scan, compare, write.

use crate::config::RunContext;
use crate::database::{self, DatabaseLocation, DatabaseRole};
use crate::diff::{DiffEngine, DiffRecord, DiffSummary};
use crate::entry::AttributeStateTree;
use crate::error::{GuardError, Result};
use crate::populate::{PopulateOptions, PopulateStats, Populated, TreePopulator};
use crate::probe::FsProbe;
use serde::Serialize;
use std::fmt;
use std::ops::BitOr;
use tracing::{debug, info, warn};

pub use crate::populate::DegradedEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActionFlags(u8);

impl ActionFlags {
    pub const NONE: ActionFlags = ActionFlags(0);
    pub const INIT: ActionFlags = ActionFlags(1);
    pub const COMPARE: ActionFlags = ActionFlags(1 << 1);
    pub const DIFF: ActionFlags = ActionFlags(1 << 2);
    pub const DRY_RUN: ActionFlags = ActionFlags(1 << 3);

    pub fn contains(self, other: ActionFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ActionFlags {
    type Output = ActionFlags;

    fn bitor(self, rhs: ActionFlags) -> ActionFlags {
        ActionFlags(self.0 | rhs.0)
    }
}

impl fmt::Display for ActionFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (Self::INIT, "INIT"),
            (Self::COMPARE, "COMPARE"),
            (Self::DIFF, "DIFF"),
            (Self::DRY_RUN, "DRY_RUN"),
        ]
        .iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| *name)
        .collect();
        if names.is_empty() {
            f.write_str("NONE")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Scan and write the output database
    Init,
    /// Scan only, nothing is opened or written
    DryInit,
    /// Compare the input database with the filesystem
    Check,
    /// Check, then write the fresh scan as the output database
    Update,
    /// Compare the input and new databases
    Compare,
    /// Configuration compiled, nothing else to do
    ConfigCheck,
}

impl RunMode {
    pub fn from_flags(flags: ActionFlags) -> Result<Self> {
        let mode = match flags.0 {
            f if f == ActionFlags::INIT.0 => Self::Init,
            f if f == (ActionFlags::INIT | ActionFlags::DRY_RUN).0 => Self::DryInit,
            f if f == ActionFlags::COMPARE.0 => Self::Check,
            f if f == (ActionFlags::INIT | ActionFlags::COMPARE).0 => Self::Update,
            f if f == ActionFlags::DIFF.0 => Self::Compare,
            f if f == ActionFlags::DRY_RUN.0 => Self::ConfigCheck,
            _ => {
                return Err(GuardError::InvalidAction(format!(
                    "unsupported flag combination {}",
                    flags
                )))
            }
        };
        Ok(mode)
    }

    pub fn flags(&self) -> ActionFlags {
        match self {
            Self::Init => ActionFlags::INIT,
            Self::DryInit => ActionFlags::INIT | ActionFlags::DRY_RUN,
            Self::Check => ActionFlags::COMPARE,
            Self::Update => ActionFlags::INIT | ActionFlags::COMPARE,
            Self::Compare => ActionFlags::DIFF,
            Self::ConfigCheck => ActionFlags::DRY_RUN,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::DryInit => "dry-init",
            Self::Check => "check",
            Self::Update => "update",
            Self::Compare => "compare",
            Self::ConfigCheck => "config-check",
        }
    }

    /// Databases this mode opens
    pub fn required_databases(&self) -> &'static [DatabaseRole] {
        match self {
            Self::Init => &[DatabaseRole::Output],
            Self::Check => &[DatabaseRole::Input],
            Self::Update => &[DatabaseRole::Input, DatabaseRole::Output],
            Self::Compare => &[DatabaseRole::Input, DatabaseRole::New],
            Self::DryInit | Self::ConfigCheck => &[],
        }
    }
}

/// Everything a run produced
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub mode: RunMode,
    pub records: Vec<DiffRecord>,
    pub summary: DiffSummary,
    pub degraded: Vec<DegradedEntry>,
    /// Records written to the output database
    pub written: Option<usize>,
    /// Filesystem scan statistics, when the mode scans
    pub scan: Option<PopulateStats>,
}

impl RunOutcome {
    fn new(mode: RunMode) -> Self {
        Self {
            mode,
            records: Vec::new(),
            summary: DiffSummary::default(),
            degraded: Vec::new(),
            written: None,
            scan: None,
        }
    }

    /// Process exit code for a successful run
    pub fn exit_code(&self) -> i32 {
        self.summary.exit_code()
    }
}

pub struct ActionController<'a, P: FsProbe> {
    ctx: &'a RunContext,
    probe: &'a P,
}

impl<'a, P: FsProbe> ActionController<'a, P> {
    pub fn new(ctx: &'a RunContext, probe: &'a P) -> Self {
        Self { ctx, probe }
    }

    /// Check that every database the mode needs is configured and that no
    /// two of them are the same file. Touches nothing on disk.
    pub fn validate(&self, mode: RunMode) -> Result<Vec<&'a DatabaseLocation>> {
        let mut locations: Vec<(DatabaseRole, &'a DatabaseLocation)> = Vec::new();
        for role in mode.required_databases() {
            let location = self.ctx.location(*role).ok_or_else(|| {
                GuardError::InvalidDatabases(format!(
                    "{} requires {} to be configured",
                    mode.as_str(),
                    role
                ))
            })?;
            if let Some((other, _)) = locations.iter().find(|(_, l)| l.same_as(location)) {
                return Err(GuardError::InvalidDatabases(format!(
                    "{} and {} refer to the same file {}",
                    other,
                    role,
                    location.resolved().display()
                )));
            }
            locations.push((*role, location));
        }
        Ok(locations.into_iter().map(|(_, l)| l).collect())
    }

    pub fn run(&self, flags: ActionFlags) -> Result<RunOutcome> {
        let mode = RunMode::from_flags(flags)?;
        self.validate(mode)?;
        info!(mode = mode.as_str(), flags = %flags, "starting run");

        let mut outcome = RunOutcome::new(mode);
        match mode {
            RunMode::ConfigCheck => {
                info!(rules = self.ctx.rules.rule_count(), "configuration is valid");
            }
            RunMode::DryInit => {
                outcome.scan = Some(self.scan(true)?.stats);
            }
            RunMode::Init => {
                let scanned = self.scan(false)?;
                outcome.degraded = scanned.degraded();
                outcome.scan = Some(scanned.stats);
                outcome.written = Some(self.write(&scanned.tree)?);
            }
            RunMode::Check => {
                let baseline = database::load(&self.ctx.database_in)?;
                let scanned = self.scan(false)?;
                outcome.degraded = scanned.degraded();
                outcome.scan = Some(scanned.stats);
                outcome.records = self.compare(&baseline, &self.stored_view(&scanned.tree));
            }
            RunMode::Update => {
                let baseline = database::load(&self.ctx.database_in)?;
                let scanned = self.scan(false)?;
                outcome.degraded = scanned.degraded();
                outcome.scan = Some(scanned.stats);
                outcome.records = self.compare(&baseline, &self.stored_view(&scanned.tree));
                let mut tree = scanned.tree;
                self.carry_over(&baseline, &mut tree);
                outcome.written = Some(self.write(&tree)?);
            }
            RunMode::Compare => {
                let old = database::load(&self.ctx.database_in)?;
                let new = match &self.ctx.database_new {
                    Some(location) => database::load(location)?,
                    None => AttributeStateTree::new(),
                };
                outcome.records = self.compare(&old, &new);
            }
        }

        outcome.summary = DiffSummary::from_records(&outcome.records);
        for entry in &outcome.degraded {
            warn!(path = %entry.path, reason = %entry.reason, "entry is degraded");
        }
        info!(
            mode = mode.as_str(),
            added = outcome.summary.added,
            removed = outcome.summary.removed,
            changed = outcome.summary.changed,
            degraded = outcome.degraded.len(),
            "run finished"
        );
        Ok(outcome)
    }

    fn scan(&self, dry_run: bool) -> Result<Populated> {
        let options = PopulateOptions {
            root_prefix: self.ctx.root_prefix.clone(),
            limit: self.ctx.limit.clone(),
            dry_run,
        };
        TreePopulator::new(&self.ctx.rules, self.probe, &options).populate()
    }

    /// The scan as it would read back from a database
    fn stored_view(&self, tree: &AttributeStateTree) -> AttributeStateTree {
        tree.iter()
            .map(|e| e.restricted_to(self.ctx.stored_attrs))
            .collect()
    }

    fn compare(&self, old: &AttributeStateTree, new: &AttributeStateTree) -> Vec<DiffRecord> {
        DiffEngine::new(self.ctx.policy)
            .with_limit(self.ctx.limit.clone())
            .diff(old, new)
    }

    /// Keep baseline entries outside the limit so a limited update does not
    /// drop them from the new database
    fn carry_over(&self, baseline: &AttributeStateTree, tree: &mut AttributeStateTree) {
        let limit = match &self.ctx.limit {
            Some(limit) => limit,
            None => return,
        };
        let mut kept = 0usize;
        for entry in baseline.iter() {
            if !limit.is_match(&entry.path) && !tree.contains(&entry.path) {
                tree.insert(entry.clone());
                kept += 1;
            }
        }
        debug!(entries = kept, "carried over baseline entries outside the limit");
    }

    fn write(&self, tree: &AttributeStateTree) -> Result<usize> {
        database::store(&self.ctx.database_out, tree, self.ctx.stored_attrs)
    }
}
