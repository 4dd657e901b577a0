use std::sync::Arc;

use roster_core::InventorySet;
use roster_inventory::{InventoryClient, InventoryInfo};
use tracing::debug;

use crate::{ActionKind, Task, TaskContext};

/// Deletes the inventory anchor. Schedule it after every delete/prune task for
/// member objects has finished: the anchor is the only record of what the last
/// apply owned.
pub struct DeleteInventoryTask {
    name: String,
    client: Arc<InventoryClient>,
    info: InventoryInfo,
}

impl DeleteInventoryTask {
    pub fn new(name: impl Into<String>, client: Arc<InventoryClient>, info: InventoryInfo) -> Self {
        Self { name: name.into(), client, info }
    }

    pub fn info(&self) -> &InventoryInfo { &self.info }
}

impl Task for DeleteInventoryTask {
    fn name(&self) -> &str { &self.name }

    fn action(&self) -> ActionKind { ActionKind::Inventory }

    fn identifiers(&self) -> InventorySet { InventorySet::new() }

    fn start(&self, ctx: &TaskContext) {
        let client = Arc::clone(&self.client);
        let info = self.info.clone();
        ctx.spawn_task(&self.name, self.action(), async move {
            debug!(ns = %info.namespace, inv = %info.name, "delete inventory object");
            client.delete_inventory_object(&info).await?;
            Ok(())
        });
    }

    /// Never arms a timeout: the only failure mode is a single store call.
    fn clear_timeout(&self) {}
}
