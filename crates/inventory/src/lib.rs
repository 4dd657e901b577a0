//! Roster inventory: tracks which objects an apply set owns so that objects
//! dropped from the desired set can be pruned later.
//!
//! The tracked set is persisted in a single anchor object found by label
//! (`<label key>=<inventory id>`). [`InventoryClient`] fetches, merges and
//! replaces that set through a [`RemoteStore`], heals duplicated anchors and
//! honours dry-run.

#![forbid(unsafe_code)]

use roster_core::codec::CodecError;
use roster_core::GroupKind;
use serde::{Deserialize, Serialize};

mod client;
pub mod memory;
mod store;

pub use client::{InventoryClient, MergePlan};
pub use memory::{MemoryStore, StoreOp, WriteCounts};
pub use store::{Anchor, LabelSelector, RemoteStore};

/// Label key used when neither config nor environment overrides it.
pub const DEFAULT_INVENTORY_LABEL: &str = "cli-utils.sigs.k8s.io/inventory-id";

/// Local inventory descriptor: which anchor object to use and which inventory id it carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryInfo {
    pub group_kind: GroupKind,
    pub namespace: String,
    pub name: String,
    pub inventory_id: String,
}

impl InventoryInfo {
    /// Descriptor for the usual ConfigMap-backed anchor.
    pub fn config_map(namespace: &str, name: &str, inventory_id: &str) -> Self {
        Self {
            group_kind: GroupKind::new("", "ConfigMap"),
            namespace: namespace.to_string(),
            name: name.to_string(),
            inventory_id: inventory_id.to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), InventoryError> {
        if self.group_kind.kind.is_empty() { return Err(InventoryError::InvalidDescriptor("missing kind")); }
        if self.name.is_empty() { return Err(InventoryError::InvalidDescriptor("missing name")); }
        if self.inventory_id.is_empty() { return Err(InventoryError::InvalidDescriptor("missing inventory id")); }
        Ok(())
    }
}

/// Client configuration, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryConfig {
    /// Compute everything, mutate nothing.
    pub dry_run: bool,
    /// Label key whose value is the inventory id.
    pub label_key: String,
}

impl Default for InventoryConfig {
    fn default() -> Self { Self { dry_run: false, label_key: DEFAULT_INVENTORY_LABEL.to_string() } }
}

impl InventoryConfig {
    /// Reads `ROSTER_DRY_RUN` (`1`/`true`) and `ROSTER_INVENTORY_LABEL`.
    pub fn from_env() -> Self {
        let dry_run = std::env::var("ROSTER_DRY_RUN")
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let label_key = std::env::var("ROSTER_INVENTORY_LABEL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_INVENTORY_LABEL.to_string());
        Self { dry_run, label_key }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("invalid inventory descriptor: {0}")]
    InvalidDescriptor(&'static str),
    /// The anchor payload could not be decoded; never treated as an empty set.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// Store failure, passed through as-is.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
