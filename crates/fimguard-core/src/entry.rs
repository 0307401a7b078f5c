//! Captured attribute state
//!
//! An [`Entry`] is the state of one path, either probed from the live
//! filesystem or decoded from a database. An [`AttributeStateTree`] holds the
//! entries of one scan or one database in lexicographic path order.

use crate::attributes::{AttrSet, AttrValue, Attribute, FileType};
use std::collections::btree_map;
use std::collections::BTreeMap;

/// Where the values of an entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Filesystem,
    Database,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub path: String,
    pub file_type: Option<FileType>,
    /// Mask of the rule the entry was captured under
    pub requested: AttrSet,
    pub origin: Origin,
    /// Set when probing failed for part of the requested attributes
    pub degraded: Option<String>,
    values: BTreeMap<Attribute, AttrValue>,
}

impl Entry {
    pub fn new(path: impl Into<String>, origin: Origin) -> Self {
        Self {
            path: path.into(),
            file_type: None,
            requested: AttrSet::EMPTY,
            origin,
            degraded: None,
            values: BTreeMap::new(),
        }
    }

    pub fn with_file_type(mut self, file_type: FileType) -> Self {
        self.file_type = Some(file_type);
        self
    }

    pub fn with_requested(mut self, requested: AttrSet) -> Self {
        self.requested = requested;
        self
    }

    pub fn set(&mut self, attr: Attribute, value: AttrValue) {
        if let AttrValue::FileType(t) = value {
            self.file_type = Some(t);
        }
        self.values.insert(attr, value);
    }

    pub fn get(&self, attr: Attribute) -> Option<&AttrValue> {
        self.values.get(&attr)
    }

    /// Attributes that actually hold a value
    pub fn captured(&self) -> AttrSet {
        self.values.keys().fold(AttrSet::EMPTY, |acc, a| acc.with(*a))
    }

    pub fn values(&self) -> impl Iterator<Item = (Attribute, &AttrValue)> {
        self.values.iter().map(|(a, v)| (*a, v))
    }

    /// Copy keeping only the values in `attrs`
    pub fn restricted_to(&self, attrs: AttrSet) -> Entry {
        let mut copy = self.clone();
        copy.values.retain(|a, _| attrs.contains(*a));
        copy
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

/// Path-ordered collection of entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeStateTree {
    entries: BTreeMap<String, Entry>,
}

impl AttributeStateTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, returning the one it replaced
    pub fn insert(&mut self, entry: Entry) -> Option<Entry> {
        self.entries.insert(entry.path.clone(), entry)
    }

    pub fn get(&self, path: &str) -> Option<&Entry> {
        self.entries.get(path)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut Entry> {
        self.entries.get_mut(path)
    }

    pub fn remove(&mut self, path: &str) -> Option<Entry> {
        self.entries.remove(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in lexicographic path order
    pub fn iter(&self) -> btree_map::Values<'_, String, Entry> {
        self.entries.values()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Absorb a partial tree built from a disjoint subtree
    pub fn merge(&mut self, other: AttributeStateTree) {
        for (path, entry) in other.entries {
            let replaced = self.entries.insert(path, entry);
            debug_assert!(replaced.is_none(), "partial trees overlap");
        }
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&Entry) -> bool) {
        self.entries.retain(|_, e| keep(e));
    }

    pub fn degraded(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values().filter(|e| e.is_degraded())
    }
}

impl IntoIterator for AttributeStateTree {
    type Item = Entry;
    type IntoIter = btree_map::IntoValues<String, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_values()
    }
}

impl FromIterator<Entry> for AttributeStateTree {
    fn from_iter<I: IntoIterator<Item = Entry>>(iter: I) -> Self {
        let mut tree = AttributeStateTree::new();
        for entry in iter {
            tree.insert(entry);
        }
        tree
    }
}
