use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointTracker;
use crate::config::{PayloadStoreSettings, ReconcileOptions};
use crate::core::{
    DeleteOutcome, PayloadScan, ResourceRecord, ScanCursor, ScanRange, SharedPayloadStore,
    SystemOfRecord,
};
use crate::error::{BackendError, PayloadError, PayloadResult};
use crate::registry::PayloadStoreRegistry;
use crate::scanner::{DEFAULT_PAGE_SIZE, TokenRangeScanner};
use crate::tenant::DatastoreKey;

use super::stats::ReconcileStats;

/// What the check of one record concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckOutcome {
    Consistent,
    Orphan { deleted: bool },
    Failed,
}

/// Cross-checks a payload store against the system of record.
///
/// Every stored payload needs a metadata row for its version that names
/// the same payload key. Payloads without one are orphans, left behind by
/// a write whose metadata transaction rolled back or by a crash between
/// the two writes. Orphans are deleted, or only reported in dry-run mode.
///
/// Checks of one page run concurrently, bounded by
/// [`ReconcileOptions::concurrency`]. A failed check is counted and the
/// scan goes on; a failed page fetch aborts the run.
#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    datastore: DatastoreKey,
    store: SharedPayloadStore,
    system_of_record: Arc<dyn SystemOfRecord>,
    options: ReconcileOptions,
    page_size: usize,
    stop: Arc<AtomicBool>,
}

impl ReconciliationEngine {
    /// Creates an engine for one tenant datastore.
    pub fn new(
        datastore: DatastoreKey,
        store: SharedPayloadStore,
        system_of_record: Arc<dyn SystemOfRecord>,
        options: ReconcileOptions,
    ) -> Self {
        let page_size = options.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        Self {
            datastore,
            store,
            system_of_record,
            options,
            page_size,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates an engine over the datastore's cached store session, using
    /// the store settings' page size unless the options override it.
    pub async fn for_datastore(
        registry: &PayloadStoreRegistry,
        datastore: DatastoreKey,
        settings: &PayloadStoreSettings,
        system_of_record: Arc<dyn SystemOfRecord>,
        mut options: ReconcileOptions,
    ) -> PayloadResult<Self> {
        let store = registry.get_or_create(&datastore, settings).await?;
        options.page_size = Some(options.page_size.unwrap_or(settings.page_size));
        Ok(Self::new(datastore, store, system_of_record, options))
    }

    /// Shares an existing stop signal, e.g. one flag for several engines.
    pub fn with_stop_signal(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Returns the stop signal; setting it ends the run after the current
    /// page.
    pub fn stop_signal(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Requests a graceful stop.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Returns the datastore this engine reconciles.
    pub fn datastore(&self) -> &DatastoreKey {
        &self.datastore
    }

    /// Returns the run options.
    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Reconciles the whole keyspace.
    pub async fn run(&self) -> PayloadResult<ReconcileStats> {
        self.run_range(ScanRange::full()).await
    }

    /// Reconciles from `start` to the end of the keyspace, e.g. from the
    /// `resume_from` of an interrupted run.
    pub async fn run_from(&self, start: ScanCursor) -> PayloadResult<ReconcileStats> {
        self.run_range(ScanRange::from(start)).await
    }

    /// Reconciles the records of `range`.
    pub async fn run_range(&self, range: ScanRange) -> PayloadResult<ReconcileStats> {
        let started = Instant::now();
        let scan: Arc<dyn PayloadScan> = self.store.clone();
        let scanner = TokenRangeScanner::new(scan)
            .with_page_size(self.page_size)
            .with_end(range.end.clone());
        let concurrency = self.options.concurrency.max(1);
        let min_age = self
            .options
            .min_age
            .and_then(|age| chrono::Duration::from_std(age).ok());

        info!(
            tenant = %self.datastore.tenant,
            datastore = %self.datastore.datastore,
            backend = self.store.backend_name(),
            system_of_record = self.system_of_record.name(),
            range = %range,
            dry_run = self.options.dry_run,
            "Starting payload reconciliation"
        );

        let mut stats = ReconcileStats::default();
        let mut progress = Progress::new(range.start.clone());
        let mut tasks: JoinSet<(u64, CheckOutcome)> = JoinSet::new();
        let mut cursor = Some(range.start.clone());

        while let Some(start) = cursor.take() {
            if self.stop.load(Ordering::SeqCst) {
                stats.stopped = true;
                cursor = Some(start);
                break;
            }

            let page = match scanner.fetch(&start).await {
                Ok(page) => page,
                Err(err) => {
                    let resume_from = progress.resume_point();
                    error!(
                        tenant = %self.datastore.tenant,
                        datastore = %self.datastore.datastore,
                        cursor = %start,
                        resume_from = %resume_from,
                        scanned = stats.scanned,
                        error = %err,
                        "Scan page failed; aborting reconciliation"
                    );
                    return Err(PayloadError::scan_page(start, err));
                }
            };
            stats.pages += 1;
            let now = Utc::now();

            for record in page.records {
                stats.scanned += 1;
                let id = progress.track(&record.cursor)?;

                if is_too_young(&record, min_age, now) {
                    debug!(address = %record.address, "Skipping payload inside grace period");
                    stats.skipped += 1;
                    progress.completed(id)?;
                    continue;
                }

                while tasks.len() >= concurrency {
                    if let Some(joined) = tasks.join_next().await {
                        self.record_outcome(joined, &mut progress, &mut stats)?;
                    }
                }
                tasks.spawn(check_record(
                    id,
                    record,
                    self.store.clone(),
                    self.system_of_record.clone(),
                    self.options.dry_run,
                ));
            }

            while let Some(joined) = tasks.try_join_next() {
                self.record_outcome(joined, &mut progress, &mut stats)?;
            }

            debug!(
                datastore = %self.datastore,
                page = stats.pages,
                scanned = stats.scanned,
                in_flight = tasks.len(),
                checkpoint = %progress.resume_point(),
                "Reconciled scan page"
            );
            cursor = page.next;
        }

        while let Some(joined) = tasks.join_next().await {
            self.record_outcome(joined, &mut progress, &mut stats)?;
        }

        stats.resume_from = cursor;
        stats.elapsed = started.elapsed();

        info!(
            tenant = %self.datastore.tenant,
            datastore = %self.datastore.datastore,
            scanned = stats.scanned,
            orphans = stats.orphans,
            deleted = stats.deleted,
            skipped = stats.skipped,
            failed = stats.failed,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            throughput = stats.throughput(),
            stopped = stats.stopped,
            "Payload reconciliation finished"
        );
        Ok(stats)
    }

    /// Splits the keyspace into `workers` disjoint ranges and reconciles
    /// them concurrently, each with its own scan loop.
    pub async fn run_sharded(&self, workers: usize) -> PayloadResult<ReconcileStats> {
        let started = Instant::now();
        let mut shards: JoinSet<PayloadResult<ReconcileStats>> = JoinSet::new();
        for range in ScanRange::partition(workers) {
            let engine = self.clone();
            shards.spawn(async move { engine.run_range(range).await });
        }

        let mut total = ReconcileStats::default();
        while let Some(joined) = shards.join_next().await {
            let stats = joined.map_err(|e| {
                PayloadError::from(BackendError::internal(
                    "reconcile",
                    format!("reconciliation shard task failed: {e}"),
                ))
            })??;
            total.merge(&stats);
        }
        total.elapsed = started.elapsed();
        Ok(total)
    }

    fn record_outcome(
        &self,
        joined: Result<(u64, CheckOutcome), tokio::task::JoinError>,
        progress: &mut Progress,
        stats: &mut ReconcileStats,
    ) -> PayloadResult<()> {
        let (id, outcome) = joined.map_err(|e| {
            PayloadError::from(BackendError::internal(
                "reconcile",
                format!("record check task failed: {e}"),
            ))
        })?;
        match outcome {
            CheckOutcome::Consistent => {}
            CheckOutcome::Orphan { deleted } => {
                stats.orphans += 1;
                if deleted {
                    stats.deleted += 1;
                }
            }
            CheckOutcome::Failed => stats.failed += 1,
        }
        progress.completed(id)
    }
}

fn is_too_young(
    record: &ResourceRecord,
    min_age: Option<chrono::Duration>,
    now: DateTime<Utc>,
) -> bool {
    match (min_age, record.last_modified) {
        (Some(min_age), Some(written_at)) => now.signed_duration_since(written_at) < min_age,
        _ => false,
    }
}

async fn check_record(
    id: u64,
    record: ResourceRecord,
    store: SharedPayloadStore,
    system_of_record: Arc<dyn SystemOfRecord>,
    dry_run: bool,
) -> (u64, CheckOutcome) {
    let address = &record.address;
    let row = match system_of_record
        .lookup(address.resource_type_id(), address.logical_id(), address.version())
        .await
    {
        Ok(row) => row,
        Err(err) => {
            let err = PayloadError::record_check(address, err);
            warn!(error = %err, "Metadata lookup failed; payload left in place");
            return (id, CheckOutcome::Failed);
        }
    };

    if row.references(address) {
        return (id, CheckOutcome::Consistent);
    }

    if dry_run {
        warn!(address = %address, metadata = ?row, "Orphaned payload (dry run, not deleted)");
        return (id, CheckOutcome::Orphan { deleted: false });
    }

    match store.delete(address).await {
        Ok(DeleteOutcome::Deleted) => {
            info!(address = %address, metadata = ?row, "Deleted orphaned payload");
            (id, CheckOutcome::Orphan { deleted: true })
        }
        Ok(DeleteOutcome::NotFound) => {
            debug!(address = %address, "Orphaned payload already gone");
            (id, CheckOutcome::Orphan { deleted: false })
        }
        Err(err) => {
            let err = PayloadError::record_check(address, err);
            warn!(error = %err, "Failed to delete orphaned payload");
            (id, CheckOutcome::Failed)
        }
    }
}

/// Request ids of one run and the cursors they were scanned at.
#[derive(Debug)]
struct Progress {
    tracker: CheckpointTracker,
    cursors: BTreeMap<u64, ScanCursor>,
    next_id: u64,
    start: ScanCursor,
}

impl Progress {
    fn new(start: ScanCursor) -> Self {
        Self {
            tracker: CheckpointTracker::new(),
            cursors: BTreeMap::new(),
            next_id: 0,
            start,
        }
    }

    fn track(&mut self, cursor: &ScanCursor) -> PayloadResult<u64> {
        let id = self.next_id;
        self.tracker.track(id)?;
        self.cursors.insert(id, cursor.clone());
        self.next_id += 1;
        Ok(id)
    }

    fn completed(&mut self, id: u64) -> PayloadResult<()> {
        self.tracker.completed(id)?;
        if let Some(checkpoint) = self.tracker.checkpoint() {
            // Keep the checkpoint's own cursor; older entries are settled.
            self.cursors = self.cursors.split_off(&checkpoint);
        }
        Ok(())
    }

    /// Cursor from which a restart neither skips unchecked records nor
    /// needs anything before it.
    fn resume_point(&self) -> ScanCursor {
        let Some(checkpoint) = self.tracker.checkpoint() else {
            return self.start.clone();
        };
        let Some(done) = self.cursors.get(&checkpoint) else {
            return self.start.clone();
        };
        let pending = self
            .tracker
            .first_outstanding()
            .and_then(|id| self.cursors.get(&id));
        match pending {
            // The checkpoint's cursor group is not finished yet.
            Some(pending) if pending == done => done.clone(),
            _ => done.successor(),
        }
    }
}
