//! Payload reconciliation tool.
//!
//! Scans the payload stores of one tenant and deletes every payload that
//! has no metadata row in the system of record. Ctrl-C stops after the
//! current page and prints the cursor to resume from.

mod config;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use clap::Parser;
use helios_payload::registry::open_system_of_record;
use helios_payload::{PayloadStoreRegistry, ReconcileStats, ReconciliationEngine};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ReconcileConfig;

/// Initializes logging; `RUST_LOG` takes precedence over `level`.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "helios_payload={},payload_reconcile={}",
            level, level
        ))
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Raises `stop` on the first Ctrl-C.
fn watch_for_interrupt(stop: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping after the current page");
            stop.store(true, Ordering::SeqCst);
        }
    });
}

/// Reconciles every selected datastore in turn and returns the combined
/// stats. Stores already cached in `registry` are used as they are.
///
/// A datastore that fails to open or whose scan aborts fails the whole
/// invocation; datastores not yet started when `stop` is raised are skipped.
async fn run(
    config: &ReconcileConfig,
    registry: &PayloadStoreRegistry,
    stop: Arc<AtomicBool>,
) -> anyhow::Result<ReconcileStats> {
    let datastores = config.load_datastores()?;
    let options = config.options();
    info!(
        tenant = %config.tenant,
        datastores = datastores.len(),
        workers = config.workers,
        dry_run = options.dry_run,
        "Starting payload reconciliation tool"
    );

    let mut total = ReconcileStats::default();
    let mut reconciled = 0;

    for (key, settings) in &datastores {
        if stop.load(Ordering::SeqCst) {
            warn!(datastore = %key, "Skipping datastore after interrupt");
            total.stopped = true;
            continue;
        }

        let system_of_record = open_system_of_record(&settings.system_of_record)
            .with_context(|| format!("Failed to open the system of record for {}", key))?;
        let engine = ReconciliationEngine::for_datastore(
            registry,
            key.clone(),
            &settings.payload,
            system_of_record,
            options.clone(),
        )
        .await
        .with_context(|| format!("Failed to open the payload store for {}", key))?
        .with_stop_signal(stop.clone());

        let run = if config.workers > 1 {
            engine.run_sharded(config.workers).await
        } else if let Some(cursor) = config.resume_cursor() {
            engine.run_from(cursor).await
        } else {
            engine.run().await
        };
        let stats = run.with_context(|| format!("Reconciliation of {} failed", key))?;

        println!("{}: {}", key, stats);
        if let Some(resume_from) = &stats.resume_from {
            println!(
                "{}: resume with --datastore {} --resume-from {}",
                key,
                key.datastore,
                resume_from.to_hex()
            );
        }
        total.merge(&stats);
        reconciled += 1;
    }

    if reconciled > 1 {
        println!("total: {}", total);
    }
    Ok(total)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ReconcileConfig::parse();
    init_logging(&config.log_level);

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Configuration error: {}", error);
        }
        std::process::exit(1);
    }

    let stop = Arc::new(AtomicBool::new(false));
    watch_for_interrupt(stop.clone());

    run(&config, &PayloadStoreRegistry::new(), stop).await?;
    Ok(())
}
