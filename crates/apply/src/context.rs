use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::anyhow;
use metrics::counter;
use roster_core::ObjectReference;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::ActionKind;

/// One task's report. `outcome` is `Ok(())` on success.
#[derive(Debug)]
pub struct TaskResult {
    pub task: String,
    pub action: ActionKind,
    pub outcome: anyhow::Result<()>,
}

impl TaskResult {
    pub fn is_ok(&self) -> bool { self.outcome.is_ok() }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Pending,
    Succeeded,
    Failed(String),
}

/// Latest known state of a member object within the current run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceStatus {
    pub action: ActionKind,
    pub outcome: Outcome,
}

type StatusTable = Arc<Mutex<FxHashMap<ObjectReference, ResourceStatus>>>;

/// Shared surface for one apply/prune run: the result queue's sending side and
/// the per-object status table. Cheap to clone; all clones feed the same queue.
#[derive(Clone)]
pub struct TaskContext {
    results: mpsc::UnboundedSender<TaskResult>,
    statuses: StatusTable,
}

/// Receiving side of the result queue. Not `Clone`: one consumer per run.
pub struct TaskResults {
    rx: mpsc::UnboundedReceiver<TaskResult>,
}

impl TaskResults {
    /// Next result in completion order; `None` once every context clone is gone.
    pub async fn recv(&mut self) -> Option<TaskResult> { self.rx.recv().await }

    pub fn try_recv(&mut self) -> Option<TaskResult> { self.rx.try_recv().ok() }
}

impl TaskContext {
    pub fn new() -> (TaskContext, TaskResults) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TaskContext { results: tx, statuses: Arc::new(Mutex::new(FxHashMap::default())) }, TaskResults { rx })
    }

    /// Push a result. Late results (e.g. after a timeout already fired) are accepted;
    /// deciding which one is authoritative is the scheduler's job.
    pub fn send_result(&self, result: TaskResult) {
        counter!("task_results_total", 1u64, "action" => result.action.as_str());
        match &result.outcome {
            Ok(()) => debug!(task = %result.task, action = %result.action, "task finished"),
            Err(e) => debug!(task = %result.task, action = %result.action, error = %e, "task failed"),
        }
        if let Err(e) = self.results.send(result) {
            warn!(task = %e.0.task, "result queue closed; dropping task result");
        }
    }

    /// Run `work` on its own tokio task and deliver exactly one result for it,
    /// including when `work` panics. Outside a tokio runtime `work` is dropped
    /// unrun and the failure is queued before this returns.
    pub fn spawn_task<F>(&self, name: &str, action: ActionKind, work: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let task = name.to_string();
        let rt = match Handle::try_current() {
            Ok(rt) => rt,
            Err(e) => {
                warn!(task = %task, error = %e, "no tokio runtime; task not started");
                self.send_result(TaskResult { task, action, outcome: Err(anyhow!("no tokio runtime: {}", e)) });
                return;
            }
        };
        let ctx = self.clone();
        rt.spawn(async move {
            let outcome = match tokio::spawn(work).await {
                Ok(res) => res,
                Err(e) => Err(anyhow!("task {} did not complete: {}", task, e)),
            };
            ctx.send_result(TaskResult { task, action, outcome });
        });
    }

    /// Deliver a timeout failure for `name` after `after` unless the returned
    /// handle is cleared (or dropped) first. Outside a tokio runtime nothing is
    /// armed and the handle is inert.
    pub fn arm_timeout(&self, name: &str, action: ActionKind, after: Duration) -> TimeoutHandle {
        let (tx, rx) = oneshot::channel::<()>();
        let task = name.to_string();
        let rt = match Handle::try_current() {
            Ok(rt) => rt,
            Err(e) => {
                warn!(task = %task, error = %e, "no tokio runtime; timeout not armed");
                return TimeoutHandle { tx: Mutex::new(None) };
            }
        };
        let ctx = self.clone();
        rt.spawn(async move {
            tokio::select! {
                _ = rx => debug!(task = %task, "timeout cleared"),
                _ = tokio::time::sleep(after) => {
                    warn!(task = %task, after_ms = after.as_millis() as u64, "task timed out");
                    ctx.send_result(TaskResult { task: task.clone(), action, outcome: Err(anyhow!("task {} timed out after {:?}", task, after)) });
                }
            }
        });
        TimeoutHandle { tx: Mutex::new(Some(tx)) }
    }

    fn table(&self) -> MutexGuard<'_, FxHashMap<ObjectReference, ResourceStatus>> {
        self.statuses.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_status(&self, reference: ObjectReference, status: ResourceStatus) {
        self.table().insert(reference, status);
    }

    pub fn status(&self, reference: &ObjectReference) -> Option<ResourceStatus> { self.table().get(reference).cloned() }

    /// Snapshot of the table, sorted by reference.
    pub fn statuses(&self) -> Vec<(ObjectReference, ResourceStatus)> {
        let mut out: Vec<_> = self.table().iter().map(|(r, s)| (r.clone(), s.clone())).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

/// Cancels an armed timeout.
#[derive(Debug)]
pub struct TimeoutHandle {
    tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl TimeoutHandle {
    pub fn clear(&self) {
        if let Some(tx) = self.tx.lock().unwrap_or_else(|e| e.into_inner()).take() { let _ = tx.send(()); }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next(results: &mut TaskResults) -> TaskResult {
        tokio::time::timeout(Duration::from_secs(2), results.recv()).await.expect("result in time").expect("queue open")
    }

    #[tokio::test]
    async fn spawn_task_delivers_exactly_one_result() {
        let (ctx, mut results) = TaskContext::new();
        ctx.spawn_task("ok", ActionKind::Apply, async { Ok(()) });
        ctx.spawn_task("bad", ActionKind::Prune, async { Err(anyhow!("nope")) });
        let mut got = vec![next(&mut results).await, next(&mut results).await];
        got.sort_by(|a, b| a.task.cmp(&b.task));
        assert_eq!(got[0].task, "bad");
        assert_eq!(got[0].outcome.as_ref().map_err(|e| e.to_string()), Err("nope".to_string()));
        assert!(got[1].is_ok());
        drop(ctx);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(results.try_recv().is_none());
    }

    #[tokio::test]
    async fn panicking_work_still_reports() {
        let (ctx, mut results) = TaskContext::new();
        ctx.spawn_task("boom", ActionKind::Apply, async {
            let fail = true;
            if fail { panic!("kaboom"); }
            Ok(())
        });
        let r = next(&mut results).await;
        assert_eq!(r.task, "boom");
        let msg = r.outcome.expect_err("panic is a failure").to_string();
        assert!(msg.contains("did not complete"), "{}", msg);
    }

    #[test]
    fn outside_a_runtime_the_failure_is_queued_synchronously() {
        let (ctx, mut results) = TaskContext::new();
        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        ctx.spawn_task("detached", ActionKind::Apply, async move {
            *flag.lock().unwrap() = true;
            Ok(())
        });
        let r = results.try_recv().expect("result queued before spawn_task returns");
        assert_eq!(r.task, "detached");
        assert!(r.outcome.expect_err("no runtime").to_string().contains("no tokio runtime"));
        assert!(results.try_recv().is_none());
        assert!(!*ran.lock().unwrap());

        let handle = ctx.arm_timeout("detached", ActionKind::Wait, Duration::from_millis(1));
        handle.clear();
        assert!(results.try_recv().is_none());
    }

    #[tokio::test]
    async fn completion_order_not_start_order() {
        let (ctx, mut results) = TaskContext::new();
        ctx.spawn_task("slow", ActionKind::Wait, async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(())
        });
        ctx.spawn_task("fast", ActionKind::Apply, async { Ok(()) });
        assert_eq!(next(&mut results).await.task, "fast");
        assert_eq!(next(&mut results).await.task, "slow");
    }

    #[tokio::test]
    async fn armed_timeout_fires_and_late_result_is_kept() {
        let (ctx, mut results) = TaskContext::new();
        let _handle = ctx.arm_timeout("wait-ready", ActionKind::Wait, Duration::from_millis(10));
        ctx.spawn_task("wait-ready", ActionKind::Wait, async {
            tokio::time::sleep(Duration::from_millis(150)).await;
            Ok(())
        });
        let first = next(&mut results).await;
        assert!(first.outcome.expect_err("timeout").to_string().contains("timed out"));
        let late = next(&mut results).await;
        assert_eq!(late.task, "wait-ready");
        assert!(late.is_ok());
    }

    #[tokio::test]
    async fn cleared_timeout_never_fires() {
        let (ctx, mut results) = TaskContext::new();
        let handle = ctx.arm_timeout("t", ActionKind::Wait, Duration::from_millis(30));
        handle.clear();
        handle.clear();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(results.try_recv().is_none());
    }

    #[tokio::test]
    async fn status_table_takes_concurrent_writers() {
        let (ctx, _results) = TaskContext::new();
        let mut joins = Vec::new();
        for i in 0..16 {
            let ctx = ctx.clone();
            joins.push(tokio::spawn(async move {
                let r = ObjectReference::new("", "ConfigMap", "ns", &format!("cm-{:02}", i));
                ctx.set_status(r.clone(), ResourceStatus { action: ActionKind::Apply, outcome: Outcome::Pending });
                let outcome = if i == 3 { Outcome::Failed("conflict".to_string()) } else { Outcome::Succeeded };
                ctx.set_status(r, ResourceStatus { action: ActionKind::Apply, outcome });
            }));
        }
        for j in joins { j.await.expect("join"); }
        let all = ctx.statuses();
        assert_eq!(all.len(), 16);
        assert_eq!(all[0].0.name, "cm-00");
        assert_eq!(all.iter().filter(|(_, s)| s.outcome == Outcome::Succeeded).count(), 15);
        let failed = ObjectReference::new("", "ConfigMap", "ns", "cm-03");
        assert_eq!(ctx.status(&failed).map(|s| s.outcome), Some(Outcome::Failed("conflict".to_string())));
    }
}
