//! Thin `clap`-derived front-end (C12) driving one in-memory `TriageEngine`.
//!
//! A demonstration harness, not a network service: every subcommand talks
//! directly to a `TriageEngine` constructed at startup and torn down at
//! exit. State does not survive the process unless `--snapshot-file` is
//! given, in which case it is loaded on start and saved on a clean exit.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use triage_engine::{EngineConfig, ErrorKind, TriageEngine};

#[derive(Parser)]
#[command(name = "triage-cli")]
#[command(about = "Priority-aware triage engine command-line front-end")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// File to load state from on start and save state to on clean exit.
    #[arg(long)]
    snapshot_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Admit a new item.
    Admit {
        /// Caller-assigned unique id.
        id: String,
        /// Base priority (must be in the configured priority set).
        #[arg(long, default_value_t = triage_engine::priority::MEDIUM)]
        priority: i64,
        /// Opaque payload fields as a JSON object.
        #[arg(long)]
        fields: Option<String>,
    },
    /// Lease the highest-priority pending item.
    Lease {
        /// Id to report as the leasing worker.
        worker_id: String,
        /// Lease TTL in seconds.
        #[arg(long, default_value_t = 30)]
        ttl_secs: u64,
        /// Wait up to this many seconds for an item; 0 polls once.
        #[arg(long, default_value_t = 0)]
        wait_secs: u64,
    },
    /// Acknowledge a lease as successfully completed.
    Ack {
        /// Lease id returned by `lease`.
        lease_id: String,
        /// Free-form completion detail.
        #[arg(long, default_value = "")]
        detail: String,
    },
    /// Negatively acknowledge a lease.
    Nack {
        /// Lease id returned by `lease`.
        lease_id: String,
        /// Return the item to `Pending` instead of `Failed`.
        #[arg(long)]
        requeue: bool,
        /// Lower the item's scheduling priority on requeue.
        #[arg(long)]
        priority_override: Option<i64>,
        /// Free-form failure reason.
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Extend an active lease's deadline.
    ExtendLease {
        /// Lease id returned by `lease`.
        lease_id: String,
        /// Additional seconds to add to the current deadline.
        additional_secs: u64,
    },
    /// List items, optionally filtered, in priority order.
    Query {
        /// Restrict to a department.
        #[arg(long)]
        department: Option<String>,
        /// Maximum rows to return; 0 means unlimited.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Print a JSON metrics snapshot.
    Metrics,
    /// Remove terminal items older than the given age.
    Gc {
        /// Minimum age, in seconds, for a terminal item to be collected.
        #[arg(long, default_value_t = 86_400)]
        older_than_secs: u64,
    },
}

fn exit_code_for(err: &ErrorKind) -> i32 {
    match err {
        ErrorKind::CapacityExceeded { .. } | ErrorKind::ShuttingDown => 75, // EX_TEMPFAIL
        ErrorKind::InvalidPriority { .. }
        | ErrorKind::InvalidArgument { .. }
        | ErrorKind::DuplicateId { .. } => 64, // EX_USAGE
        _ => 1,
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let engine = TriageEngine::new(
        EngineConfig::builder()
            .build()
            .unwrap_or_else(|e| panic!("default configuration must be valid: {e}")),
    );

    if let Some(path) = &cli.snapshot_file {
        if let Ok(bytes) = std::fs::read(path) {
            if let Err(e) = engine.restore_snapshot(&bytes) {
                eprintln!("warning: failed to restore snapshot from {}: {e}", path.display());
            }
        }
    }

    let result = run(&engine, cli.command).await;

    if let Some(path) = &cli.snapshot_file {
        if let Ok(bytes) = engine.save_snapshot() {
            if let Err(e) = std::fs::write(path, bytes) {
                eprintln!("warning: failed to save snapshot to {}: {e}", path.display());
            }
        }
    }

    match result {
        Ok(()) => {}
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(exit_code_for(&err));
        }
    }
}

async fn run(engine: &TriageEngine, command: Commands) -> Result<(), ErrorKind> {
    match command {
        Commands::Admit { id, priority, fields } => {
            let fields = match fields {
                Some(raw) => serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null),
                None => serde_json::Value::Null,
            };
            let payload = triage_engine::Payload {
                fields,
                ..Default::default()
            };
            let id = engine.admit(id, priority, payload)?;
            println!("admitted: {id}");
        }
        Commands::Lease { worker_id, ttl_secs, wait_secs } => {
            let deadline = Some(Duration::from_secs(wait_secs));
            match engine.lease(worker_id, Duration::from_secs(ttl_secs), deadline).await? {
                Some(grant) => {
                    println!(
                        "leased: lease_id={} item_id={}",
                        grant.lease_id, grant.item.id
                    );
                }
                None => println!("no item available"),
            }
        }
        Commands::Ack { lease_id, detail } => {
            engine.ack(&lease_id, &detail)?;
            println!("acked: {lease_id}");
        }
        Commands::Nack { lease_id, requeue, priority_override, reason } => {
            engine.nack(&lease_id, requeue, priority_override, &reason)?;
            println!("nacked: {lease_id} (requeue={requeue})");
        }
        Commands::ExtendLease { lease_id, additional_secs } => {
            let expires_at = engine.extend_lease(&lease_id, Duration::from_secs(additional_secs))?;
            println!("extended: {lease_id} new_expires_at={expires_at}");
        }
        Commands::Query { department, limit } => {
            let filter = triage_engine::query::Filter {
                department,
                ..Default::default()
            };
            let page = engine.query(&filter, None, limit);
            for item in &page.items {
                println!(
                    "{}\tpriority={}\tstate={:?}",
                    item.id, item.base_priority, item.lifecycle_state
                );
            }
        }
        Commands::Metrics => {
            let snapshot = engine.metrics_snapshot();
            let json = serde_json::to_string_pretty(&snapshot)
                .unwrap_or_else(|_| "<metrics serialization failed>".to_string());
            println!("{json}");
        }
        Commands::Gc { older_than_secs } => {
            let removed = engine.gc(Duration::from_secs(older_than_secs));
            println!("collected: {removed}");
        }
    }
    Ok(())
}
