use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use roster_core::codec;
use roster_core::InventorySet;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::store::{Anchor, LabelSelector, RemoteStore};
use crate::{InventoryConfig, InventoryError, InventoryInfo};

/// Outcome of a merge: what to prune and what the anchor holds afterwards
/// (or would hold, under dry-run).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergePlan {
    pub prune: InventorySet,
    pub merged: InventorySet,
    /// True when no anchor existed and one was (or would have been) created.
    pub created: bool,
}

/// Reads and writes the inventory anchor for a local descriptor.
///
/// Not safe against concurrent merge/replace on the same descriptor: the last
/// writer wins. Callers run one inventory update per apply.
pub struct InventoryClient {
    store: Arc<dyn RemoteStore>,
    config: InventoryConfig,
}

impl InventoryClient {
    pub fn new(store: Arc<dyn RemoteStore>, config: InventoryConfig) -> Self { Self { store, config } }

    pub fn config(&self) -> &InventoryConfig { &self.config }
    pub fn dry_run(&self) -> bool { self.config.dry_run }

    /// Needs `&mut self`, so it can only change before the client is shared.
    pub fn set_dry_run(&mut self, dry_run: bool) { self.config.dry_run = dry_run; }

    /// Objects recorded by the previous apply; empty when no anchor exists yet.
    pub async fn get_cluster_objects(&self, info: &InventoryInfo) -> Result<InventorySet, InventoryError> {
        match self.resolve_anchor(info).await? {
            Some(anchor) => Ok(codec::decode(&anchor.payload)?),
            None => Ok(InventorySet::new()),
        }
    }

    /// Stores the union of `desired` and the recorded set, returning the recorded
    /// objects missing from `desired` (the prune candidates).
    pub async fn merge(&self, info: &InventoryInfo, desired: &InventorySet) -> Result<InventorySet, InventoryError> {
        Ok(self.merge_plan(info, desired).await?.prune)
    }

    pub async fn merge_plan(&self, info: &InventoryInfo, desired: &InventorySet) -> Result<MergePlan, InventoryError> {
        let started = Instant::now();
        counter!("inventory_merge_total", 1u64);
        let plan = self.reconcile_merge(info, desired).await;
        histogram!("inventory_op_ms", started.elapsed().as_secs_f64() * 1000.0, "op" => "merge");
        plan
    }

    async fn reconcile_merge(&self, info: &InventoryInfo, desired: &InventorySet) -> Result<MergePlan, InventoryError> {
        // refuse objects the anchor could not hold before touching the store
        codec::encode(desired)?;
        let anchor = match self.resolve_anchor(info).await? {
            Some(anchor) => anchor,
            None => {
                debug!(inv = %info.name, objects = desired.len(), "creating initial inventory object");
                self.persist_create(info, desired).await?;
                return Ok(MergePlan { prune: InventorySet::new(), merged: desired.clone(), created: true });
            }
        };
        let stored = codec::decode(&anchor.payload)?;
        if desired.set_equals(&stored) {
            debug!(inv = %info.name, "applied objects same as cluster inventory: nothing to do");
            return Ok(MergePlan { prune: InventorySet::new(), merged: stored, created: false });
        }
        let prune = stored.difference(desired);
        let merged = stored.union(desired);
        debug!(inv = %info.name, prune = prune.len(), merged = merged.len(), "merging cluster inventory");
        self.persist_replace(&anchor, &merged).await?;
        Ok(MergePlan { prune, merged, created: false })
    }

    /// Overwrites the recorded set with `objects`, creating the anchor if needed.
    pub async fn replace(&self, info: &InventoryInfo, objects: &InventorySet) -> Result<(), InventoryError> {
        let started = Instant::now();
        let res = self.reconcile_replace(info, objects).await;
        histogram!("inventory_op_ms", started.elapsed().as_secs_f64() * 1000.0, "op" => "replace");
        res
    }

    async fn reconcile_replace(&self, info: &InventoryInfo, objects: &InventorySet) -> Result<(), InventoryError> {
        codec::encode(objects)?;
        let anchor = match self.resolve_anchor(info).await? {
            Some(anchor) => anchor,
            None => return self.persist_create(info, objects).await,
        };
        let stored = codec::decode(&anchor.payload)?;
        if objects.set_equals(&stored) {
            debug!(inv = %info.name, "replace: cluster inventory already matches");
            return Ok(());
        }
        debug!(inv = %info.name, objects = objects.len(), "replacing cluster inventory");
        self.persist_replace(&anchor, objects).await
    }

    /// Deletes every anchor carrying this descriptor's inventory id. Nothing to
    /// delete is success; under dry-run the store is never contacted.
    pub async fn delete_inventory_object(&self, info: &InventoryInfo) -> Result<(), InventoryError> {
        info.validate()?;
        if self.config.dry_run {
            debug!(ns = %info.namespace, inv = %info.name, "dry-run delete inventory object: not deleted");
            counter!("inventory_dry_run_skipped_total", 1u64);
            return Ok(());
        }
        let candidates = self.find_candidates(info).await?;
        if candidates.is_empty() {
            debug!(ns = %info.namespace, inv = %info.name, "no inventory object to delete");
        }
        for anchor in candidates.iter() {
            self.persist_delete(anchor).await?;
        }
        Ok(())
    }

    async fn find_candidates(&self, info: &InventoryInfo) -> Result<Vec<Anchor>, InventoryError> {
        let selector = LabelSelector::new(&self.config.label_key, &info.inventory_id);
        debug!(gk = %info.group_kind, ns = %info.namespace, selector = %selector, "inventory object fetch");
        Ok(self.store.find(&info.group_kind, &info.namespace, &selector).await?)
    }

    /// The single anchor for `info`, healing duplicates on the way.
    async fn resolve_anchor(&self, info: &InventoryInfo) -> Result<Option<Anchor>, InventoryError> {
        info.validate()?;
        let mut candidates = self.find_candidates(info).await?;
        match candidates.len() {
            0 => Ok(None),
            1 => Ok(candidates.pop()),
            _ => {
                sort_candidates(&mut candidates);
                let duplicates = candidates.split_off(1);
                let retained = candidates.remove(0);
                self.heal_duplicates(retained, duplicates).await.map(Some)
            }
        }
    }

    /// Folds every candidate's set into the first one (by age, then namespace/name),
    /// stores it, and only then deletes the rest. A decode failure aborts before any write.
    async fn heal_duplicates(&self, mut retained: Anchor, duplicates: Vec<Anchor>) -> Result<Anchor, InventoryError> {
        warn!(count = duplicates.len() + 1, retained = %retained.reference, "multiple inventory objects found; merging into one");
        let mut union = codec::decode(&retained.payload)?;
        for dup in duplicates.iter() {
            union = union.union(&codec::decode(&dup.payload)?);
        }
        let payload = codec::encode(&union)?;

        if self.config.dry_run {
            debug!(retained = %retained.reference, "dry-run: duplicate inventory objects left in place");
            counter!("inventory_dry_run_skipped_total", 1u64);
            retained.payload = payload;
            return Ok(retained);
        }

        // Write-before-delete: the union must be durable before any duplicate goes away.
        let mut stored = self.store.replace(&retained, &payload).await?;
        counter!("inventory_write_total", 1u64);
        stored.payload = payload;
        for dup in duplicates.iter() {
            info!(duplicate = %dup.reference, retained = %stored.reference, "deleting duplicate inventory object");
            self.persist_delete(dup).await?;
        }
        counter!("inventory_duplicates_healed_total", 1u64);
        Ok(stored)
    }

    /// Encodes before the dry-run check so a set that cannot be stored fails either way.
    async fn persist_create(&self, info: &InventoryInfo, objects: &InventorySet) -> Result<(), InventoryError> {
        let payload = codec::encode(objects)?;
        if self.config.dry_run {
            debug!(inv = %info.name, "dry-run create inventory object: not created");
            counter!("inventory_dry_run_skipped_total", 1u64);
            return Ok(());
        }
        let anchor = Anchor::for_info(info, &self.config.label_key);
        info!(ns = %info.namespace, inv = %info.name, objects = objects.len(), "creating inventory object");
        self.store.create(&anchor, &payload).await?;
        counter!("inventory_write_total", 1u64);
        Ok(())
    }

    async fn persist_replace(&self, anchor: &Anchor, objects: &InventorySet) -> Result<(), InventoryError> {
        let payload = codec::encode(objects)?;
        if self.config.dry_run {
            debug!(inv = %anchor.reference, "dry-run apply inventory object: not applied");
            counter!("inventory_dry_run_skipped_total", 1u64);
            return Ok(());
        }
        info!(inv = %anchor.reference, objects = objects.len(), "replacing inventory object");
        self.store.replace(anchor, &payload).await?;
        counter!("inventory_write_total", 1u64);
        Ok(())
    }

    async fn persist_delete(&self, anchor: &Anchor) -> Result<(), InventoryError> {
        info!(inv = %anchor.reference, "deleting inventory object");
        self.store.delete(anchor).await?;
        counter!("inventory_write_total", 1u64);
        Ok(())
    }
}

fn sort_candidates(candidates: &mut [Anchor]) {
    let by_age = candidates.iter().all(|a| a.created_at.is_some());
    candidates.sort_by(|a, b| {
        let age = if by_age { a.created_at.cmp(&b.created_at) } else { Ordering::Equal };
        age.then_with(|| a.reference.cmp(&b.reference))
    });
}
