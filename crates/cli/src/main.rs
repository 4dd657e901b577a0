use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use roster_apply::{DeleteInventoryTask, Task, TaskContext};
use roster_core::{InventorySet, ObjectReference};
use roster_inventory::{InventoryClient, InventoryConfig, InventoryInfo};
use roster_kubehub::KubeStore;
use serde::Serialize;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "rosterctl", version, about = "Roster CLI: apply-set inventories")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Compute results without writing to the cluster (also ROSTER_DRY_RUN=1)
    #[arg(long = "dry-run", global = true, action = ArgAction::SetTrue)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

/// Which inventory anchor to use.
#[derive(Args, Debug, Clone)]
struct InventoryArgs {
    /// Namespace of the inventory object
    #[arg(long = "ns", env = "ROSTER_NAMESPACE", default_value = "default")]
    namespace: String,
    /// Name of the inventory object
    #[arg(long = "name")]
    name: String,
    /// Inventory id (label value)
    #[arg(long = "id")]
    id: String,
}

impl InventoryArgs {
    fn info(&self) -> InventoryInfo { InventoryInfo::config_map(&self.namespace, &self.name, &self.id) }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the objects recorded in the inventory
    Get {
        #[command(flatten)]
        inv: InventoryArgs,
    },
    /// Record the desired objects and print prune candidates
    Merge {
        #[command(flatten)]
        inv: InventoryArgs,
        /// Desired objects as group/kind/namespace/name (core group and cluster scope left empty)
        objects: Vec<ObjectReference>,
    },
    /// Overwrite the recorded objects
    Replace {
        #[command(flatten)]
        inv: InventoryArgs,
        /// Objects as group/kind/namespace/name
        objects: Vec<ObjectReference>,
    },
    /// Delete the inventory object (run after every member object is gone)
    Delete {
        #[command(flatten)]
        inv: InventoryArgs,
    },
}

fn init_tracing() {
    let env = std::env::var("ROSTER_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("ROSTER_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid ROSTER_METRICS_ADDR; expected host:port");
        }
    }
}

fn print_set(output: Output, set: &InventorySet) -> Result<()> {
    match output {
        Output::Human => {
            for r in set.iter() { println!("{}", r); }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(set)?),
    }
    Ok(())
}

#[derive(Serialize)]
struct DeleteReport<'a> { task: &'a str, deleted: bool, dry_run: bool }

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let mut config = InventoryConfig::from_env();
    if cli.dry_run { config.dry_run = true; }
    let dry_run = config.dry_run;
    let store = Arc::new(KubeStore::connect().await?);
    let client = InventoryClient::new(store, config);

    match cli.command {
        Commands::Get { inv } => {
            info!(ns = %inv.namespace, name = %inv.name, "get invoked");
            let objs = client.get_cluster_objects(&inv.info()).await?;
            print_set(cli.output, &objs)?;
        }
        Commands::Merge { inv, objects } => {
            info!(ns = %inv.namespace, name = %inv.name, objects = objects.len(), dry_run, "merge invoked");
            let desired: InventorySet = objects.into_iter().collect();
            let plan = client.merge_plan(&inv.info(), &desired).await?;
            match cli.output {
                Output::Human => {
                    if plan.created { println!("created inventory {}/{}", inv.namespace, inv.name); }
                    println!("tracked: {}  prune candidates: {}", plan.merged.len(), plan.prune.len());
                    for r in plan.prune.iter() { println!("- {}", r); }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
            }
        }
        Commands::Replace { inv, objects } => {
            info!(ns = %inv.namespace, name = %inv.name, objects = objects.len(), dry_run, "replace invoked");
            let objs: InventorySet = objects.into_iter().collect();
            client.replace(&inv.info(), &objs).await?;
            print_set(cli.output, &objs)?;
        }
        Commands::Delete { inv } => {
            info!(ns = %inv.namespace, name = %inv.name, dry_run, "delete invoked");
            let task = DeleteInventoryTask::new("delete-inventory", Arc::new(client), inv.info());
            let (ctx, mut results) = TaskContext::new();
            task.start(&ctx);
            drop(ctx);
            let result = results.recv().await.ok_or_else(|| anyhow!("delete task produced no result"))?;
            result.outcome?;
            match cli.output {
                Output::Human => {
                    let verb = if dry_run { "would delete" } else { "deleted" };
                    println!("{} inventory {}/{}", verb, inv.namespace, inv.name);
                }
                Output::Json => {
                    let report = DeleteReport { task: task.name(), deleted: !dry_run, dry_run };
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
            }
        }
    }
    Ok(())
}
