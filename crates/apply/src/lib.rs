//! Roster apply: the task contract every mutating step of an apply/prune run
//! implements, the per-run [`TaskContext`], and the inventory deletion task.

#![forbid(unsafe_code)]

use std::fmt;

use roster_core::InventorySet;
use serde::{Deserialize, Serialize};

mod context;
mod inventory_task;

pub use context::{Outcome, ResourceStatus, TaskContext, TaskResult, TaskResults, TimeoutHandle};
pub use inventory_task::DeleteInventoryTask;

/// What a task does, for observers correlating results. Never affects scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    Apply,
    Prune,
    Delete,
    Wait,
    Inventory,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Apply => "apply",
            ActionKind::Prune => "prune",
            ActionKind::Delete => "delete",
            ActionKind::Wait => "wait",
            ActionKind::Inventory => "inventory",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// A unit of work driven by an external scheduler.
///
/// `start` must return immediately and arrange for exactly one [`TaskResult`]
/// to reach the context's queue per call; failures travel in that result,
/// never out of `start` itself. [`TaskContext::spawn_task`] gives that
/// guarantee and is what implementations should use.
pub trait Task: Send + Sync {
    fn name(&self) -> &str;
    fn action(&self) -> ActionKind;
    /// Member objects this task affects; empty for tasks that touch none.
    fn identifiers(&self) -> InventorySet;
    fn start(&self, ctx: &TaskContext);
    /// Cancel a scheduler-armed timeout. Does not abort in-flight work.
    fn clear_timeout(&self);
}
