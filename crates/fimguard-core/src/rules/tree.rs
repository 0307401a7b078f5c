//! Rule tree
//!
//! Rules hang off the node for their literal prefix. Matching walks the
//! literal segments of a path from the root; every visited node evaluates
//! its own rules against the full path and the deepest node with a matching
//! rule decides. Inside one node a negate rule beats an equal rule, which
//! beats a select rule; among rules of the same kind the first one defined
//! wins.
//!
//! Nodes live in an arena addressed by [`NodeId`]. [`RuleTreeBuilder`] is the
//! only mutable phase; [`RuleTree`] is read-only and shared freely between
//! walker threads.

use crate::attributes::{AttrSet, FileType};
use crate::error::Result;
use crate::rules::rule::{Rule, RuleKind, TypeRestriction};
use std::collections::BTreeMap;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(usize);

const ROOT: NodeId = NodeId(0);

#[derive(Debug)]
struct Node {
    path: String,
    rules: Vec<Rule>,
    children: BTreeMap<String, NodeId>,
}

impl Node {
    fn new(path: String) -> Self {
        Self {
            path,
            rules: Vec::new(),
            children: BTreeMap::new(),
        }
    }

    /// Strongest rule of this node matching `path`
    fn decide(&self, path: &str, file_type: FileType) -> Option<&Rule> {
        let mut best: Option<&Rule> = None;
        for rule in self.rules.iter().filter(|r| r.matches(path, file_type)) {
            match best {
                Some(b) if b.kind >= rule.kind => {}
                _ => best = Some(rule),
            }
        }
        best
    }
}

/// Outcome of matching one path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub kind: RuleKind,
    pub attrs: AttrSet,
    /// Node the deciding rule lives at
    pub node: String,
    pub pattern: String,
    pub location: String,
}

impl RuleMatch {
    /// Whether the path is monitored at all
    pub fn is_monitored(&self) -> bool {
        self.kind != RuleKind::Negate
    }

    pub fn mask(&self) -> AttrSet {
        if self.is_monitored() {
            self.attrs
        } else {
            AttrSet::EMPTY
        }
    }
}

/// Mutable phase of the rule tree
#[derive(Debug)]
pub struct RuleTreeBuilder {
    nodes: Vec<Node>,
    rule_count: usize,
}

impl Default for RuleTreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleTreeBuilder {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new("/".to_string())],
            rule_count: 0,
        }
    }

    /// Compile a rule and attach it to the node for its literal prefix
    pub fn insert(
        &mut self,
        pattern: &str,
        kind: RuleKind,
        attrs: AttrSet,
        restriction: TypeRestriction,
        location: &str,
    ) -> Result<()> {
        let rule = Rule::compile(pattern, kind, attrs, restriction, location)?;
        let node = self.node_for(&rule.node_path());
        tracing::trace!(rule = %rule, node = %self.nodes[node.0].path, "rule added");
        self.nodes[node.0].rules.push(rule);
        self.rule_count += 1;
        Ok(())
    }

    fn node_for(&mut self, path: &str) -> NodeId {
        let mut current = ROOT;
        for segment in segments(path) {
            let existing = self.nodes[current.0].children.get(segment).copied();
            current = match existing {
                Some(id) => id,
                None => {
                    let parent_path = &self.nodes[current.0].path;
                    let child_path = if parent_path == "/" {
                        format!("/{}", segment)
                    } else {
                        format!("{}/{}", parent_path, segment)
                    };
                    let id = NodeId(self.nodes.len());
                    self.nodes.push(Node::new(child_path));
                    self.nodes[current.0].children.insert(segment.to_string(), id);
                    id
                }
            };
        }
        current
    }

    pub fn rule_count(&self) -> usize {
        self.rule_count
    }

    /// Freeze the tree
    pub fn build(self) -> RuleTree {
        RuleTree {
            nodes: self.nodes,
            rule_count: self.rule_count,
        }
    }
}

/// Immutable rule tree
#[derive(Debug)]
pub struct RuleTree {
    nodes: Vec<Node>,
    rule_count: usize,
}

impl RuleTree {
    /// Decide how `path` is monitored. `None` means no rule applies.
    pub fn match_path(&self, path: &str, file_type: FileType) -> Option<RuleMatch> {
        let mut current = ROOT;
        let mut decided = self.nodes[ROOT.0].decide(path, file_type);
        let mut decided_at = ROOT;

        for segment in segments(path) {
            match self.nodes[current.0].children.get(segment) {
                Some(child) => current = *child,
                None => break,
            }
            if let Some(rule) = self.nodes[current.0].decide(path, file_type) {
                decided = Some(rule);
                decided_at = current;
            }
        }

        decided.map(|rule| RuleMatch {
            kind: rule.kind,
            attrs: rule.attrs,
            node: self.nodes[decided_at.0].path.clone(),
            pattern: rule.pattern.clone(),
            location: rule.location.clone(),
        })
    }

    /// Effective mask for `path` and whether it is monitored at all
    pub fn resolve(&self, path: &str, file_type: FileType) -> (AttrSet, bool) {
        match self.match_path(path, file_type) {
            Some(m) if m.is_monitored() => (m.attrs, true),
            _ => (AttrSet::EMPTY, false),
        }
    }

    /// Whether rules exist strictly below the node for `path`
    pub fn has_rules_below(&self, path: &str) -> bool {
        let mut current = ROOT;
        for segment in segments(path) {
            match self.nodes[current.0].children.get(segment) {
                Some(child) => current = *child,
                None => return false,
            }
        }
        !self.nodes[current.0].children.is_empty()
    }

    pub fn rule_count(&self) -> usize {
        self.rule_count
    }

    pub fn is_empty(&self) -> bool {
        self.rule_count == 0
    }

    /// Every attribute any rule can request
    pub fn requested_attrs(&self) -> AttrSet {
        self.nodes
            .iter()
            .flat_map(|n| n.rules.iter())
            .filter(|r| r.kind != RuleKind::Negate)
            .fold(AttrSet::EMPTY, |acc, r| acc.union(r.attrs))
    }

    /// Indented dump of the tree, one node per line followed by its rules
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut stack = vec![(ROOT, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            let node = &self.nodes[id.0];
            let _ = writeln!(out, "{:indent$}{}", "", node.path, indent = depth * 2);
            for rule in &node.rules {
                let _ = writeln!(out, "{:indent$}  {}", "", rule, indent = depth * 2);
            }
            for child in node.children.values().rev() {
                stack.push((*child, depth + 1));
            }
        }
        out
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}
