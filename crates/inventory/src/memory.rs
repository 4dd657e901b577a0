//! In-process [`RemoteStore`]. Counts successful writes and can fail the next
//! call of a given kind, which is how reconciliation is observed in tests.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use roster_core::codec::Payload;
use roster_core::{GroupKind, ObjectReference};
use tracing::debug;

use crate::store::{Anchor, LabelSelector, RemoteStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp { Find, Create, Replace, Delete }

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounts {
    pub creates: u64,
    pub replaces: u64,
    pub deletes: u64,
}

impl WriteCounts {
    pub fn total(&self) -> u64 { self.creates + self.replaces + self.deletes }
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<ObjectReference, Anchor>,
    counts: WriteCounts,
    seq: u64,
    fail: Option<(StoreOp, String)>,
}

impl Inner {
    fn take_failure(&mut self, op: StoreOp) -> Result<()> {
        if matches!(&self.fail, Some((want, _)) if *want == op) {
            if let Some((_, msg)) = self.fail.take() { return Err(anyhow!(msg)); }
        }
        Ok(())
    }

    fn bump(&mut self) -> u64 { self.seq += 1; self.seq }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, Inner> { self.inner.lock().unwrap_or_else(|e| e.into_inner()) }

    /// Insert an anchor as if another client had written it. Not counted as a write.
    pub fn seed(&self, mut anchor: Anchor) {
        let mut inner = self.lock();
        let seq = inner.bump();
        anchor.resource_version = Some(seq.to_string());
        anchor.created_at.get_or_insert(seq as i64);
        inner.objects.insert(anchor.reference.clone(), anchor);
    }

    pub fn anchors(&self) -> Vec<Anchor> { self.lock().objects.values().cloned().collect() }

    pub fn get(&self, reference: &ObjectReference) -> Option<Anchor> { self.lock().objects.get(reference).cloned() }

    pub fn write_counts(&self) -> WriteCounts { self.lock().counts }

    /// Fail the next `op` call with `message`.
    pub fn fail_next(&self, op: StoreOp, message: impl Into<String>) {
        self.lock().fail = Some((op, message.into()));
    }
}

#[async_trait::async_trait]
impl RemoteStore for MemoryStore {
    async fn find(&self, group_kind: &GroupKind, namespace: &str, selector: &LabelSelector) -> Result<Vec<Anchor>> {
        let mut inner = self.lock();
        inner.take_failure(StoreOp::Find)?;
        let out: Vec<Anchor> = inner
            .objects
            .values()
            .filter(|a| &a.reference.group_kind == group_kind && a.reference.namespace == namespace && selector.matches(&a.labels))
            .cloned()
            .collect();
        debug!(gk = %group_kind, ns = %namespace, selector = %selector, found = out.len(), "memory store find");
        Ok(out)
    }

    async fn create(&self, anchor: &Anchor, payload: &Payload) -> Result<Anchor> {
        let mut inner = self.lock();
        inner.take_failure(StoreOp::Create)?;
        if inner.objects.contains_key(&anchor.reference) {
            return Err(anyhow!("{} already exists", anchor.reference));
        }
        let seq = inner.bump();
        let mut stored = anchor.clone();
        stored.payload = payload.clone();
        stored.resource_version = Some(seq.to_string());
        stored.created_at = Some(seq as i64);
        inner.objects.insert(stored.reference.clone(), stored.clone());
        inner.counts.creates += 1;
        Ok(stored)
    }

    async fn replace(&self, anchor: &Anchor, payload: &Payload) -> Result<Anchor> {
        let mut inner = self.lock();
        inner.take_failure(StoreOp::Replace)?;
        let seq = inner.bump();
        let stored = match inner.objects.get_mut(&anchor.reference) {
            Some(existing) => {
                existing.payload = payload.clone();
                existing.labels = anchor.labels.clone();
                existing.resource_version = Some(seq.to_string());
                existing.clone()
            }
            None => return Err(anyhow!("{} not found", anchor.reference)),
        };
        inner.counts.replaces += 1;
        Ok(stored)
    }

    async fn delete(&self, anchor: &Anchor) -> Result<()> {
        let mut inner = self.lock();
        inner.take_failure(StoreOp::Delete)?;
        if inner.objects.remove(&anchor.reference).is_none() {
            return Err(anyhow!("{} not found", anchor.reference));
        }
        inner.counts.deletes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InventoryInfo;

    fn anchor(name: &str, id: &str) -> Anchor {
        Anchor::for_info(&InventoryInfo::config_map("ns", name, id), "inv")
    }

    #[tokio::test]
    async fn find_filters_by_label_and_namespace() {
        let store = MemoryStore::new();
        store.seed(anchor("a", "one"));
        store.seed(anchor("b", "two"));
        let gk = GroupKind::new("", "ConfigMap");
        let found = store.find(&gk, "ns", &LabelSelector::new("inv", "one")).await.expect("find");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].reference.name, "a");
        assert!(store.find(&gk, "other", &LabelSelector::new("inv", "one")).await.expect("find").is_empty());
    }

    #[tokio::test]
    async fn writes_are_counted_and_failures_are_one_shot() {
        let store = MemoryStore::new();
        let a = anchor("a", "one");
        store.fail_next(StoreOp::Create, "boom");
        let err = store.create(&a, &Payload::new()).await.expect_err("injected");
        assert_eq!(err.to_string(), "boom");
        store.create(&a, &Payload::new()).await.expect("create");
        assert!(store.create(&a, &Payload::new()).await.is_err());
        store.replace(&a, &Payload::new()).await.expect("replace");
        store.delete(&a).await.expect("delete");
        assert!(store.delete(&a).await.is_err());
        assert_eq!(store.write_counts(), WriteCounts { creates: 1, replaces: 1, deletes: 1 });
    }
}
