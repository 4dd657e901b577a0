use std::collections::BTreeMap;
use std::fmt;

use anyhow::Result;
use roster_core::codec::Payload;
use roster_core::{GroupKind, ObjectReference};

use crate::InventoryInfo;

/// Exact-match label selector (`key=value`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSelector {
    pub key: String,
    pub value: String,
}

impl LabelSelector {
    pub fn new(key: &str, value: &str) -> Self { Self { key: key.to_string(), value: value.to_string() } }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        labels.get(&self.key).map(|v| v == &self.value).unwrap_or(false)
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}={}", self.key, self.value) }
}

/// Handle to an inventory anchor object as seen in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub reference: ObjectReference,
    pub labels: BTreeMap<String, String>,
    pub payload: Payload,
    /// Opaque store version, if the store tracks one.
    pub resource_version: Option<String>,
    /// Creation order key (seconds or a store sequence), if known.
    pub created_at: Option<i64>,
}

impl Anchor {
    /// Fresh, not-yet-stored anchor for a local descriptor.
    pub fn for_info(info: &InventoryInfo, label_key: &str) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(label_key.to_string(), info.inventory_id.clone());
        Self {
            reference: ObjectReference {
                group_kind: info.group_kind.clone(),
                namespace: info.namespace.clone(),
                name: info.name.clone(),
            },
            labels,
            payload: Payload::new(),
            resource_version: None,
            created_at: None,
        }
    }
}

/// CRUD + label query over the cluster object store. Errors are opaque and
/// surface unchanged through the inventory client.
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    async fn find(&self, group_kind: &GroupKind, namespace: &str, selector: &LabelSelector) -> Result<Vec<Anchor>>;
    async fn create(&self, anchor: &Anchor, payload: &Payload) -> Result<Anchor>;
    async fn replace(&self, anchor: &Anchor, payload: &Payload) -> Result<Anchor>;
    async fn delete(&self, anchor: &Anchor) -> Result<()>;
}
