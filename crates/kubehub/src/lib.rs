//! Roster kubehub – inventory anchors stored as ordinary cluster objects

#![forbid(unsafe_code)]

use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    core::{ApiResource, DynamicObject},
    discovery::{Discovery, Scope},
    Client,
};
use metrics::counter;
use roster_core::codec::Payload;
use roster_core::{GroupKind, ObjectReference};
use roster_inventory::{Anchor, LabelSelector, RemoteStore};
use rustc_hash::FxHashMap;
use tracing::{debug, info};

/// [`RemoteStore`] over the Kubernetes API. The payload lives in the object's
/// top-level `data` map, so any ConfigMap-shaped kind works as an anchor.
pub struct KubeStore {
    client: Client,
    mappings: Mutex<FxHashMap<GroupKind, (ApiResource, bool)>>,
}

impl KubeStore {
    pub fn new(client: Client) -> Self { Self { client, mappings: Mutex::new(FxHashMap::default()) } }

    /// Connect using the ambient kubeconfig / in-cluster config.
    pub async fn connect() -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }

    async fn resolve(&self, gk: &GroupKind) -> Result<(ApiResource, bool)> {
        let cached = self.mappings.lock().unwrap_or_else(|e| e.into_inner()).get(gk).cloned();
        if let Some(hit) = cached {
            return Ok(hit);
        }
        counter!("kube_store_discovery_total", 1u64);
        let found = find_api_resource(self.client.clone(), gk).await?;
        self.mappings.lock().unwrap_or_else(|e| e.into_inner()).insert(gk.clone(), found.clone());
        Ok(found)
    }

    async fn api_for(&self, gk: &GroupKind, namespace: &str) -> Result<(Api<DynamicObject>, ApiResource)> {
        let (ar, namespaced) = self.resolve(gk).await?;
        let api = if namespaced {
            if namespace.is_empty() {
                return Err(anyhow!("namespace required for namespaced kind {}", gk));
            }
            Api::namespaced_with(self.client.clone(), namespace, &ar)
        } else {
            Api::all_with(self.client.clone(), &ar)
        };
        Ok((api, ar))
    }
}

#[async_trait::async_trait]
impl RemoteStore for KubeStore {
    async fn find(&self, group_kind: &GroupKind, namespace: &str, selector: &LabelSelector) -> Result<Vec<Anchor>> {
        let (api, _) = self.api_for(group_kind, namespace).await?;
        let lp = ListParams::default().labels(&selector.to_string());
        let list = api.list(&lp).await?;
        debug!(gk = %group_kind, ns = %namespace, selector = %selector, found = list.items.len(), "inventory list");
        list.items.iter().map(|o| anchor_from(o, group_kind)).collect()
    }

    async fn create(&self, anchor: &Anchor, payload: &Payload) -> Result<Anchor> {
        let gk = &anchor.reference.group_kind;
        let (api, ar) = self.api_for(gk, &anchor.reference.namespace).await?;
        let mut obj = object_from(anchor, payload, &ar);
        obj.metadata.resource_version = None;
        let created = api.create(&PostParams::default(), &obj).await?;
        info!(obj = %anchor.reference, "inventory object created");
        anchor_from(&created, gk)
    }

    async fn replace(&self, anchor: &Anchor, payload: &Payload) -> Result<Anchor> {
        let gk = &anchor.reference.group_kind;
        let (api, ar) = self.api_for(gk, &anchor.reference.namespace).await?;
        let obj = object_from(anchor, payload, &ar);
        let replaced = api.replace(&anchor.reference.name, &PostParams::default(), &obj).await?;
        info!(obj = %anchor.reference, rv = ?replaced.metadata.resource_version, "inventory object replaced");
        anchor_from(&replaced, gk)
    }

    async fn delete(&self, anchor: &Anchor) -> Result<()> {
        let (api, _) = self.api_for(&anchor.reference.group_kind, &anchor.reference.namespace).await?;
        let _ = api.delete(&anchor.reference.name, &DeleteParams::default()).await?;
        info!(obj = %anchor.reference, "inventory object deleted");
        Ok(())
    }
}

/// Match by group + kind only; discovery's recommended version wins.
async fn find_api_resource(client: Client, gk: &GroupKind) -> Result<(ApiResource, bool)> {
    let discovery = Discovery::new(client).run().await?;
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.group == gk.group && ar.kind == gk.kind {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                return Ok((ar.clone(), namespaced));
            }
        }
    }
    Err(anyhow!("no resource mapping for group kind: {}", gk))
}

fn anchor_from(obj: &DynamicObject, gk: &GroupKind) -> Result<Anchor> {
    let name = obj.metadata.name.clone().ok_or_else(|| anyhow!("inventory object missing metadata.name"))?;
    let payload: Payload = match obj.data.get("data") {
        None | Some(serde_json::Value::Null) => Payload::new(),
        Some(v) => serde_json::from_value(v.clone()).with_context(|| format!("reading data of inventory object {}", name))?,
    };
    Ok(Anchor {
        reference: ObjectReference {
            group_kind: gk.clone(),
            namespace: obj.metadata.namespace.clone().unwrap_or_default(),
            name,
        },
        labels: obj.metadata.labels.clone().unwrap_or_default(),
        payload,
        resource_version: obj.metadata.resource_version.clone(),
        created_at: obj.metadata.creation_timestamp.as_ref().map(|t| t.0.timestamp()),
    })
}

fn object_from(anchor: &Anchor, payload: &Payload, ar: &ApiResource) -> DynamicObject {
    let mut obj = DynamicObject::new(&anchor.reference.name, ar).data(serde_json::json!({ "data": payload }));
    if !anchor.reference.namespace.is_empty() {
        obj = obj.within(&anchor.reference.namespace);
    }
    obj.metadata.labels = Some(anchor.labels.clone());
    obj.metadata.resource_version = anchor.resource_version.clone();
    obj
}
