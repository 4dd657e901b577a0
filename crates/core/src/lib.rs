//! Roster core types: object references and inventory sets.

#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod codec;

pub mod prelude {
    pub use super::{GroupKind, InventorySet, ObjectReference, ReferenceParseError};
    pub use super::codec::{CodecError, Payload};
}

/// API group + kind. An empty group is the core ("v1") group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKind {
    pub group: String,
    pub kind: String,
}

impl GroupKind {
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { group: group.into(), kind: kind.into() }
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() { write!(f, "{}", self.kind) } else { write!(f, "{}.{}", self.kind, self.group) }
    }
}

/// Identity of a managed resource. Cluster-scoped objects carry an empty namespace.
///
/// Ordering is (group, kind, namespace, name); duplicate-anchor resolution and
/// set iteration rely on it being total and stable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectReference {
    pub group_kind: GroupKind,
    pub namespace: String,
    pub name: String,
}

impl ObjectReference {
    pub fn new(group: &str, kind: &str, namespace: &str, name: &str) -> Self {
        Self { group_kind: GroupKind::new(group, kind), namespace: namespace.to_string(), name: name.to_string() }
    }

    pub fn is_cluster_scoped(&self) -> bool { self.namespace.is_empty() }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceParseError {
    #[error("invalid object reference {0:?} (expect group/kind/namespace/name)")]
    Shape(String),
    #[error("object reference {0:?} is missing kind or name")]
    MissingField(String),
}

/// Text form `group/kind/namespace/name`; core group and cluster scope are empty segments.
impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.group_kind.group, self.group_kind.kind, self.namespace, self.name)
    }
}

impl FromStr for ObjectReference {
    type Err = ReferenceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [group, kind, namespace, name] => {
                if kind.is_empty() || name.is_empty() {
                    return Err(ReferenceParseError::MissingField(s.to_string()));
                }
                Ok(ObjectReference::new(group, kind, namespace, name))
            }
            _ => Err(ReferenceParseError::Shape(s.to_string())),
        }
    }
}

/// A set of object references. Set operations return new sets and leave their inputs untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InventorySet {
    items: BTreeSet<ObjectReference>,
}

impl InventorySet {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn contains(&self, r: &ObjectReference) -> bool { self.items.contains(r) }
    pub fn iter(&self) -> impl Iterator<Item = &ObjectReference> { self.items.iter() }

    /// Returns false when the reference was already present.
    pub fn insert(&mut self, r: ObjectReference) -> bool { self.items.insert(r) }

    pub fn union(&self, other: &InventorySet) -> InventorySet {
        InventorySet { items: self.items.union(&other.items).cloned().collect() }
    }

    /// Elements of `self` that are not in `other`.
    pub fn difference(&self, other: &InventorySet) -> InventorySet {
        InventorySet { items: self.items.difference(&other.items).cloned().collect() }
    }

    pub fn set_equals(&self, other: &InventorySet) -> bool { self.items == other.items }
}

impl FromIterator<ObjectReference> for InventorySet {
    fn from_iter<I: IntoIterator<Item = ObjectReference>>(iter: I) -> Self {
        InventorySet { items: iter.into_iter().collect() }
    }
}

impl IntoIterator for InventorySet {
    type Item = ObjectReference;
    type IntoIter = std::collections::btree_set::IntoIter<ObjectReference>;
    fn into_iter(self) -> Self::IntoIter { self.items.into_iter() }
}

impl<'a> IntoIterator for &'a InventorySet {
    type Item = &'a ObjectReference;
    type IntoIter = std::collections::btree_set::Iter<'a, ObjectReference>;
    fn into_iter(self) -> Self::IntoIter { self.items.iter() }
}
