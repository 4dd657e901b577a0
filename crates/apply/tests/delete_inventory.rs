#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use roster_apply::{ActionKind, DeleteInventoryTask, Task, TaskContext, TaskResult, TaskResults};
use roster_core::codec;
use roster_core::{InventorySet, ObjectReference};
use roster_inventory::{
    Anchor, InventoryClient, InventoryConfig, InventoryInfo, MemoryStore, StoreOp, DEFAULT_INVENTORY_LABEL,
};

fn info() -> InventoryInfo { InventoryInfo::config_map("shop", "inventory-shop", "shop-7f3a") }

fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let mut anchor = Anchor::for_info(&info(), DEFAULT_INVENTORY_LABEL);
    let tracked: InventorySet = vec![ObjectReference::new("apps", "Deployment", "shop", "cart")].into_iter().collect();
    anchor.payload = codec::encode(&tracked).expect("encode");
    store.seed(anchor);
    store
}

fn task(store: &Arc<MemoryStore>, dry_run: bool) -> DeleteInventoryTask {
    let client = InventoryClient::new(store.clone(), InventoryConfig { dry_run, ..InventoryConfig::default() });
    DeleteInventoryTask::new("delete-inventory", Arc::new(client), info())
}

async fn next(results: &mut TaskResults) -> TaskResult {
    tokio::time::timeout(Duration::from_secs(2), results.recv()).await.expect("result in time").expect("queue open")
}

async fn assert_drained(results: &mut TaskResults) {
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(results.try_recv().is_none(), "expected exactly one result");
}

#[tokio::test]
async fn deletes_anchor_and_reports_success() {
    let store = seeded_store();
    let t = task(&store, false);
    let (ctx, mut results) = TaskContext::new();
    t.start(&ctx);
    let r = next(&mut results).await;
    assert_eq!(r.task, "delete-inventory");
    assert_eq!(r.action, ActionKind::Inventory);
    assert!(r.is_ok(), "{:?}", r.outcome);
    assert!(store.anchors().is_empty());
    assert_drained(&mut results).await;
}

#[tokio::test]
async fn store_error_is_delivered_once_as_result() {
    let store = seeded_store();
    store.fail_next(StoreOp::Delete, "connection refused");
    let t = task(&store, false);
    let (ctx, mut results) = TaskContext::new();
    t.start(&ctx);
    let r = next(&mut results).await;
    assert_eq!(r.outcome.expect_err("store failure").to_string(), "connection refused");
    assert_eq!(store.anchors().len(), 1);
    assert_drained(&mut results).await;
}

#[tokio::test]
async fn dry_run_reports_success_and_keeps_anchor() {
    let store = seeded_store();
    let t = task(&store, true);
    let (ctx, mut results) = TaskContext::new();
    t.start(&ctx);
    assert!(next(&mut results).await.is_ok());
    assert_eq!(store.anchors().len(), 1);
    assert_eq!(store.write_counts().total(), 0);
}

#[tokio::test]
async fn no_member_identifiers_and_status_table_untouched() {
    let store = seeded_store();
    let t = task(&store, false);
    assert!(t.identifiers().is_empty());
    assert_eq!(t.action(), ActionKind::Inventory);
    assert_eq!(t.name(), "delete-inventory");
    t.clear_timeout();

    let (ctx, mut results) = TaskContext::new();
    t.start(&ctx);
    next(&mut results).await;
    assert!(ctx.statuses().is_empty());
}

#[tokio::test]
async fn each_start_yields_one_result() {
    let store = seeded_store();
    let t = task(&store, false);
    let (ctx, mut results) = TaskContext::new();
    t.start(&ctx);
    assert!(next(&mut results).await.is_ok());
    // anchor already gone: a second attempt still reports exactly once
    t.start(&ctx);
    assert!(next(&mut results).await.is_ok());
    assert_drained(&mut results).await;
    assert_eq!(store.write_counts().deletes, 1);
}

#[tokio::test]
async fn start_is_non_blocking_and_usable_through_trait_objects() {
    let store = seeded_store();
    let tasks: Vec<Box<dyn Task>> = vec![Box::new(task(&store, false))];
    let (ctx, mut results) = TaskContext::new();
    for t in tasks.iter() {
        t.start(&ctx);
    }
    // nothing awaited yet: the result arrives once the runtime gets to it
    let r = next(&mut results).await;
    assert!(r.is_ok());
}

#[test]
fn start_without_runtime_reports_failure_instead_of_panicking() {
    let store = seeded_store();
    let t = task(&store, false);
    let (ctx, mut results) = TaskContext::new();
    t.start(&ctx);
    let r = results.try_recv().expect("exactly one result, delivered synchronously");
    assert_eq!(r.task, "delete-inventory");
    assert_eq!(r.action, ActionKind::Inventory);
    assert!(!r.is_ok());
    assert!(results.try_recv().is_none());
    assert_eq!(store.anchors().len(), 1);
}
