//! Named attribute groups
//!
//! The group table maps a name to an [`AttrSet`]. It starts with one group
//! per catalog attribute plus the predefined compound groups, accepts user
//! definitions while the configuration is compiled, and is frozen before the
//! first scan.

use crate::attributes::{AttrSet, Attribute};
use crate::error::{GuardError, Result};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Hash used by the full-content group `R`
pub const DEFAULT_CONTENT_HASH: Attribute = Attribute::Sha256;

/// Names of the predefined compound groups, in listing order
pub const PREDEFINED_GROUPS: [&str; 6] = ["R", "L", ">", "H", "X", "E"];

#[derive(Debug, Clone)]
pub struct GroupResolver {
    groups: BTreeMap<String, AttrSet>,
    allow_redefinition: bool,
    frozen: bool,
}

impl Default for GroupResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupResolver {
    /// Create the table with the catalog and predefined groups
    pub fn new() -> Self {
        let mut groups = BTreeMap::new();
        for attr in Attribute::ALL {
            groups.insert(attr.config_name().to_string(), AttrSet::from(attr));
        }

        let available = AttrSet::available();
        let extras = AttrSet::of(&[
            Attribute::Acl,
            Attribute::Xattrs,
            Attribute::Selinux,
            Attribute::E2fsAttrs,
            Attribute::Capabilities,
        ])
        .intersection(available);
        let common = AttrSet::of(&[
            Attribute::Perm,
            Attribute::FType,
            Attribute::Inode,
            Attribute::LinkCount,
            Attribute::Uid,
            Attribute::Gid,
        ]);
        let content_hash = AttrSet::from(DEFAULT_CONTENT_HASH).intersection(available);

        let full = common
            .union(AttrSet::of(&[
                Attribute::Size,
                Attribute::LinkName,
                Attribute::Mtime,
                Attribute::Ctime,
            ]))
            .union(content_hash)
            .union(extras);
        let link = common.with(Attribute::LinkName).union(extras);
        let growing = link.with(Attribute::SizeGrowing);

        groups.insert("R".to_string(), full);
        groups.insert("L".to_string(), link);
        groups.insert(">".to_string(), growing);
        groups.insert("H".to_string(), available.hashes());
        groups.insert("X".to_string(), extras);
        groups.insert("E".to_string(), AttrSet::EMPTY);

        Self {
            groups,
            allow_redefinition: true,
            frozen: false,
        }
    }

    /// Set whether an existing name may be defined again
    pub fn with_redefinition(mut self, allow: bool) -> Self {
        self.allow_redefinition = allow;
        self
    }

    pub fn define(&mut self, name: &str, mask: AttrSet) -> Result<()> {
        if self.frozen {
            return Err(GuardError::GroupsFrozen(name.to_string()));
        }
        validate_name(name)?;
        if self.groups.contains_key(name) {
            if !self.allow_redefinition {
                return Err(GuardError::DuplicateGroup(name.to_string()));
            }
            debug!(group = name, "redefining group");
        }
        self.groups.insert(name.to_string(), mask);
        Ok(())
    }

    /// Evaluate `expr` and define `name` as the result
    pub fn define_expr(&mut self, name: &str, expr: &str) -> Result<AttrSet> {
        let mask = self.evaluate(expr)?;
        self.define(name, mask)?;
        Ok(mask)
    }

    pub fn resolve(&self, name: &str) -> Result<AttrSet> {
        self.groups
            .get(name)
            .copied()
            .ok_or_else(|| GuardError::UnknownGroup(name.to_string()))
    }

    /// Evaluate a compound expression such as `R+sha512-sha256`.
    ///
    /// Terms are applied left to right; `+` is union and `-` is difference.
    /// Hashes this build cannot compute are dropped with a warning.
    pub fn evaluate(&self, expr: &str) -> Result<AttrSet> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Ok(AttrSet::EMPTY);
        }

        let mut mask = AttrSet::EMPTY;
        let mut op = '+';
        let mut term = String::new();
        let mut first = true;

        for c in expr.chars().chain(std::iter::once('\0')) {
            if c == '+' || c == '-' || c == '\0' {
                let name = term.trim();
                if name.is_empty() {
                    // only a leading '+' may stand without a term
                    if !(first && c == '+') {
                        return Err(GuardError::config(
                            expr,
                            "empty term in group expression",
                        ));
                    }
                } else {
                    let value = self.resolve(name)?;
                    mask = if op == '+' {
                        mask.union(value)
                    } else {
                        mask.difference(value)
                    };
                }
                first = false;
                op = c;
                term.clear();
            } else {
                term.push(c);
            }
        }

        let missing = mask.unavailable();
        if !missing.is_empty() {
            warn!(
                expression = expr,
                dropped = %missing,
                "attributes not available in this build are ignored"
            );
            mask = mask.difference(missing);
        }
        Ok(mask)
    }

    /// Reject all further definitions
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Predefined compound groups with their current value
    pub fn available_groups(&self) -> Vec<(&'static str, AttrSet)> {
        PREDEFINED_GROUPS
            .iter()
            .filter_map(|n| self.groups.get(*n).map(|m| (*n, *m)))
            .collect()
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name
            .chars()
            .any(|c| c == '+' || c == '-' || c == ',' || c.is_whitespace())
    {
        return Err(GuardError::config(name, "invalid group name"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_content_group() {
        let groups = GroupResolver::new();
        let r = groups.resolve("R").unwrap();
        let expected = AttrSet::of(&[
            Attribute::Perm,
            Attribute::FType,
            Attribute::Inode,
            Attribute::LinkCount,
            Attribute::Uid,
            Attribute::Gid,
            Attribute::Size,
            Attribute::LinkName,
            Attribute::Mtime,
            Attribute::Ctime,
            Attribute::Sha256,
        ]);
        assert_eq!(r, expected);
        assert!(groups.resolve("E").unwrap().is_empty());
        assert!(groups.resolve(">").unwrap().contains(Attribute::SizeGrowing));
        assert!(!groups.resolve(">").unwrap().contains(Attribute::Size));
    }

    #[test]
    fn expressions_apply_left_to_right() {
        let groups = GroupResolver::new();
        let m = groups.evaluate("p+u-p+g").unwrap();
        assert_eq!(m, AttrSet::of(&[Attribute::Uid, Attribute::Gid]));
        let m = groups.evaluate("R+sha512-sha256").unwrap();
        assert!(m.contains(Attribute::Sha512));
        assert!(!m.contains(Attribute::Sha256));
        let m = groups.evaluate(">-ftype").unwrap();
        assert!(!m.contains(Attribute::FType));
        assert!(m.contains(Attribute::SizeGrowing));
    }

    #[test]
    fn unknown_and_malformed_expressions() {
        let groups = GroupResolver::new();
        assert!(matches!(
            groups.evaluate("R+Nope"),
            Err(GuardError::UnknownGroup(n)) if n == "Nope"
        ));
        assert!(groups.evaluate("p++u").is_err());
        assert!(groups.evaluate("-p").is_err());
        assert!(groups.evaluate("p-").is_err());
    }

    #[test]
    fn unavailable_hashes_are_dropped() {
        let groups = GroupResolver::new();
        let m = groups.evaluate("p+md5").unwrap();
        assert_eq!(m, AttrSet::from(Attribute::Perm));
    }

    #[test]
    fn redefinition_only_affects_later_lookups() {
        let mut groups = GroupResolver::new();
        let before = groups.resolve("R").unwrap();
        groups.define_expr("Mine", "R").unwrap();
        groups.define_expr("R", "p").unwrap();
        assert_eq!(groups.resolve("Mine").unwrap(), before);
        assert_eq!(groups.resolve("R").unwrap(), AttrSet::from(Attribute::Perm));
    }

    #[test]
    fn redefinition_policy_and_freeze() {
        let mut groups = GroupResolver::new().with_redefinition(false);
        groups.define_expr("Web", "p+u").unwrap();
        assert!(matches!(
            groups.define_expr("Web", "g"),
            Err(GuardError::DuplicateGroup(_))
        ));
        groups.freeze();
        assert!(matches!(
            groups.define("Other", AttrSet::EMPTY),
            Err(GuardError::GroupsFrozen(_))
        ));
    }

    #[test]
    fn undefined_reference_fails_at_definition() {
        let mut groups = GroupResolver::new();
        assert!(groups.define_expr("A", "B+p").is_err());
        assert!(groups.resolve("A").is_err());
    }
}
