//! Configuration document and the run context compiled from it
//!
//! The document is JSON. Compiling it defines the groups in document order,
//! compiles every rule against the finished group table and resolves the
//! database locations. The resulting [`RunContext`] is immutable and is
//! passed by reference to everything that runs afterwards.

use crate::attributes::{AttrSet, Attribute};
use crate::database::{DatabaseLocation, DatabaseRole};
use crate::diff::ReportPolicy;
use crate::error::{GuardError, Result};
use crate::groups::GroupResolver;
use crate::rules::{RuleKind, RuleTree, RuleTreeBuilder, TypeRestriction};
use directories::ProjectDirs;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const APP_QUALIFIER: &str = "org";
pub const APP_ORG: &str = "fimguard";
pub const APP_NAME: &str = "fimguard";

pub const CONFIG_FILE: &str = "fimguard.json";
pub const DEFAULT_DATABASE: &str = "fimguard.db";
pub const DEFAULT_DATABASE_OUT: &str = "fimguard.db.new";

/// Default directory holding the databases
pub fn data_dir() -> Option<PathBuf> {
    ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME).map(|dirs| dirs.data_dir().to_path_buf())
}

/// Configuration file used when none is given
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupDef {
    pub name: String,
    pub expr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDef {
    pub kind: RuleKind,
    pub pattern: String,
    /// Group expression; ignored for negate rules
    #[serde(default)]
    pub attrs: Option<String>,
    /// File type characters such as `f,d`
    #[serde(default)]
    pub types: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportDef {
    #[serde(default)]
    pub ignore_added: String,
    #[serde(default)]
    pub ignore_removed: String,
    #[serde(default)]
    pub ignore_changed: String,
    #[serde(default)]
    pub force: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GuardConfig {
    #[serde(default)]
    pub root_prefix: Option<PathBuf>,
    #[serde(default)]
    pub database_in: Option<DatabaseLocation>,
    #[serde(default)]
    pub database_out: Option<DatabaseLocation>,
    #[serde(default)]
    pub database_new: Option<DatabaseLocation>,
    /// Group expression of the attributes persisted in the output database
    #[serde(default)]
    pub database_attrs: Option<String>,
    #[serde(default = "default_true")]
    pub allow_group_redefinition: bool,
    #[serde(default)]
    pub groups: Vec<GroupDef>,
    #[serde(default)]
    pub rules: Vec<RuleDef>,
    #[serde(default)]
    pub report: ReportDef,
    #[serde(default)]
    pub limit: Option<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            root_prefix: None,
            database_in: None,
            database_out: None,
            database_new: None,
            database_attrs: None,
            allow_group_redefinition: true,
            groups: Vec::new(),
            rules: Vec::new(),
            report: ReportDef::default(),
            limit: None,
        }
    }
}

/// Replace the key of a configuration error, or wrap any other error
fn keyed(key: String) -> impl FnOnce(GuardError) -> GuardError {
    move |err| match err {
        GuardError::Config { message, .. } => GuardError::Config { key, message },
        rule @ GuardError::InvalidRule { .. } => rule,
        other => GuardError::Config {
            key,
            message: other.to_string(),
        },
    }
}

impl GuardConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| GuardError::config("$", e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| GuardError::config(path.display().to_string(), e.to_string()))?;
        let config = Self::from_json(&text).map_err(|e| match e {
            GuardError::Config { message, .. } => {
                GuardError::config(path.display().to_string(), message)
            }
            other => other,
        })?;
        debug!(config = %path.display(), rules = config.rules.len(), "configuration loaded");
        Ok(config)
    }

    /// Compile into a run context. `limit` overrides the document's limit.
    pub fn compile(&self, limit: Option<&str>) -> Result<RunContext> {
        let mut groups = GroupResolver::new().with_redefinition(self.allow_group_redefinition);
        for (i, def) in self.groups.iter().enumerate() {
            groups
                .define_expr(&def.name, &def.expr)
                .map_err(keyed(format!("groups[{}]", i)))?;
        }
        groups.freeze();

        let mut builder = RuleTreeBuilder::new();
        for (i, def) in self.rules.iter().enumerate() {
            let location = format!("rules[{}]", i);
            let attrs = match (def.kind, def.attrs.as_deref()) {
                (RuleKind::Negate, _) => AttrSet::EMPTY,
                (_, Some(expr)) => groups
                    .evaluate(expr)
                    .map_err(keyed(format!("{}.attrs", location)))?,
                (_, None) => {
                    return Err(GuardError::config(
                        format!("{}.attrs", location),
                        "select and equal rules need an attribute expression",
                    ))
                }
            };
            let restriction = match def.types.as_deref() {
                Some(types) => TypeRestriction::parse(types)
                    .map_err(keyed(format!("{}.types", location)))?,
                None => TypeRestriction::ANY,
            };
            builder.insert(&def.pattern, def.kind, attrs, restriction, &location)?;
        }
        let rules = builder.build();

        let policy = ReportPolicy {
            ignore_added: evaluate_key(&groups, &self.report.ignore_added, "report.ignore_added")?,
            ignore_removed: evaluate_key(
                &groups,
                &self.report.ignore_removed,
                "report.ignore_removed",
            )?,
            ignore_changed: evaluate_key(
                &groups,
                &self.report.ignore_changed,
                "report.ignore_changed",
            )?,
            force: evaluate_key(&groups, &self.report.force, "report.force")?,
        };

        let requested = rules.requested_attrs();
        let mut stored_attrs = match &self.database_attrs {
            Some(expr) => evaluate_key(&groups, expr, "database_attrs")?,
            None => requested,
        }
        .with(Attribute::FType);
        if requested.contains(Attribute::SizeGrowing) {
            stored_attrs = stored_attrs.with(Attribute::Size);
        }

        let limit_source = limit.map(str::to_string).or_else(|| self.limit.clone());
        let limit = match &limit_source {
            Some(pattern) => Some(compile_limit(pattern)?),
            None => None,
        };

        let context = RunContext {
            root_prefix: self.root_prefix.clone().unwrap_or_else(|| PathBuf::from("/")),
            database_in: resolve_location(&self.database_in, DEFAULT_DATABASE),
            database_out: resolve_location(&self.database_out, DEFAULT_DATABASE_OUT),
            database_new: self.database_new.clone(),
            stored_attrs,
            policy,
            limit,
            limit_source,
            groups,
            rules,
        };
        info!(
            rules = context.rules.rule_count(),
            stored = %context.stored_attrs,
            "configuration compiled"
        );
        debug!("rule tree:\n{}", context.rules.render());
        Ok(context)
    }
}

fn evaluate_key(groups: &GroupResolver, expr: &str, key: &str) -> Result<AttrSet> {
    groups.evaluate(expr).map_err(keyed(key.to_string()))
}

fn resolve_location(configured: &Option<DatabaseLocation>, file_name: &str) -> DatabaseLocation {
    if let Some(location) = configured {
        return location.clone();
    }
    let dir = data_dir().unwrap_or_else(|| {
        debug!("no data directory available, using the working directory");
        PathBuf::from(".")
    });
    DatabaseLocation::plain(dir.join(file_name))
}

/// Compile a limit expression anchored at the start of the path
pub fn compile_limit(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})", pattern)).map_err(|e| GuardError::InvalidLimit {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

/// Everything configuration decides for one run
#[derive(Debug)]
pub struct RunContext {
    pub root_prefix: PathBuf,
    pub database_in: DatabaseLocation,
    pub database_out: DatabaseLocation,
    pub database_new: Option<DatabaseLocation>,
    /// Attributes persisted in written databases
    pub stored_attrs: AttrSet,
    pub policy: ReportPolicy,
    pub limit: Option<Regex>,
    /// Limit as written by the user, before anchoring
    pub limit_source: Option<String>,
    pub groups: GroupResolver,
    pub rules: RuleTree,
}

impl RunContext {
    pub fn location(&self, role: DatabaseRole) -> Option<&DatabaseLocation> {
        match role {
            DatabaseRole::Input => Some(&self.database_in),
            DatabaseRole::Output => Some(&self.database_out),
            DatabaseRole::New => self.database_new.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::FileType;

    const SAMPLE: &str = r#"{
        "root_prefix": "/srv/app",
        "database_in":  { "path": "/var/lib/fimguard/db", "compressed": true },
        "database_out": { "path": "/var/lib/fimguard/db.new" },
        "groups": [ { "name": "Logs", "expr": ">-ftype" } ],
        "rules": [
            { "kind": "select", "pattern": "/etc", "attrs": "R" },
            { "kind": "negate", "pattern": "/etc/mtab" },
            { "kind": "equal",  "pattern": "/var/log", "attrs": "Logs", "types": "d" }
        ],
        "report": { "ignore_changed": "a" }
    }"#;

    #[test]
    fn sample_document_compiles() {
        let config = GuardConfig::from_json(SAMPLE).unwrap();
        let ctx = config.compile(None).unwrap();
        assert_eq!(ctx.root_prefix, PathBuf::from("/srv/app"));
        assert!(ctx.database_in.compressed);
        assert!(!ctx.database_out.compressed);
        assert!(ctx.database_new.is_none());
        assert_eq!(ctx.rules.rule_count(), 3);
        assert_eq!(ctx.policy.ignore_changed, AttrSet::from(Attribute::Atime));
        assert!(ctx.groups.is_frozen());

        let (mask, monitored) = ctx.rules.resolve("/var/log", FileType::Directory);
        assert!(monitored);
        assert!(mask.contains(Attribute::SizeGrowing));
        let (_, monitored) = ctx.rules.resolve("/etc/mtab", FileType::Regular);
        assert!(!monitored);

        // growing size forces size into the stored set
        assert!(ctx.stored_attrs.contains(Attribute::Size));
        assert!(ctx.stored_attrs.contains(Attribute::FType));
        assert!(ctx.stored_attrs.contains(Attribute::Sha256));
    }

    #[test]
    fn errors_carry_their_key() {
        let bad_group = r#"{ "rules": [
            { "kind": "select", "pattern": "/etc", "attrs": "R" },
            { "kind": "select", "pattern": "/usr", "attrs": "R+Nope" }
        ] }"#;
        let err = GuardConfig::from_json(bad_group).unwrap().compile(None).unwrap_err();
        match &err {
            GuardError::Config { key, message } => {
                assert_eq!(key, "rules[1].attrs");
                assert!(message.contains("Nope"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(err.exit_code(), crate::error::EXIT_CONFIG_ERROR);

        let bad_regex = r#"{ "rules": [ { "kind": "select", "pattern": "/etc/(", "attrs": "p" } ] }"#;
        let err = GuardConfig::from_json(bad_regex).unwrap().compile(None).unwrap_err();
        assert!(err.to_string().contains("rules[0]"));

        let bad_types = r#"{ "rules": [ { "kind": "select", "pattern": "/etc", "attrs": "p", "types": "q" } ] }"#;
        let err = GuardConfig::from_json(bad_types).unwrap().compile(None).unwrap_err();
        assert!(err.to_string().contains("rules[0].types"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = GuardConfig::from_json(r#"{ "rulez": [] }"#).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_CONFIG_ERROR);
    }

    #[test]
    fn group_redefinition_can_be_forbidden() {
        let doc = r#"{
            "allow_group_redefinition": false,
            "groups": [ { "name": "R", "expr": "p" } ]
        }"#;
        let err = GuardConfig::from_json(doc).unwrap().compile(None).unwrap_err();
        assert!(err.to_string().contains("groups[0]"));
    }

    #[test]
    fn limit_override_and_anchoring() {
        let doc = r#"{ "limit": "/etc" }"#;
        let config = GuardConfig::from_json(doc).unwrap();
        let ctx = config.compile(None).unwrap();
        let limit = ctx.limit.unwrap();
        assert!(limit.is_match("/etc/passwd"));
        assert!(!limit.is_match("/usr/etc"));

        let ctx = config.compile(Some("/usr")).unwrap();
        assert_eq!(ctx.limit_source.as_deref(), Some("/usr"));

        let err = config.compile(Some("(")).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_INVALID_ARGUMENT);
    }

    #[test]
    fn database_attrs_restrict_storage() {
        let doc = r#"{
            "database_attrs": "p+sha256",
            "rules": [ { "kind": "select", "pattern": "/", "attrs": "R" } ]
        }"#;
        let ctx = GuardConfig::from_json(doc).unwrap().compile(None).unwrap();
        assert_eq!(
            ctx.stored_attrs,
            AttrSet::of(&[Attribute::Perm, Attribute::Sha256, Attribute::FType])
        );
    }
}
