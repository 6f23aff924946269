//! Payload writes made inside one metadata transaction.
//!
//! Offloaded payloads are written before the transaction that references
//! them commits. The journal keeps the pending writes so the transaction
//! can wait for them before committing, and can delete them again if it
//! rolls back. Erases requested by the transaction are held back until it
//! commits.
//!
//! Lifecycle per transaction:
//!
//! 1. [`offload`](PayloadJournal::offload) / [`record`](PayloadJournal::record)
//!    each payload write, [`erase_after_commit`](PayloadJournal::erase_after_commit)
//!    each hard delete
//! 2. [`before_commit`](PayloadJournal::before_commit): every write must
//!    have succeeded, otherwise the caller rolls back
//! 3. [`after_commit`](PayloadJournal::after_commit) or
//!    [`after_rollback`](PayloadJournal::after_rollback)
//!
//! Anything the compensating actions fail to remove is left for the
//! reconciliation sweep.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::address::PayloadAddress;
use crate::core::{DeleteOutcome, PayloadStore, StoreAck};
use crate::error::{BackendError, InvariantViolation, PayloadError, PayloadResult};

/// An in-flight payload write.
pub type PendingStore = JoinHandle<PayloadResult<StoreAck>>;

#[derive(Debug)]
struct JournalEntry {
    address: PayloadAddress,
    pending: Option<PendingStore>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct EraseRequest {
    resource_type_id: u32,
    logical_id: String,
    version: Option<u32>,
}

/// What the end-of-transaction actions achieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JournalReport {
    /// Payloads deleted after a rollback.
    pub deleted: u64,
    /// Payloads removed by post-commit erases.
    pub erased: u64,
    /// Compensating deletes or erases that failed.
    pub failed: u64,
}

/// Tracks the payload writes of one transaction.
///
/// Owned by the transaction; reused for the next one once a completion
/// method has cleared it.
#[derive(Debug)]
pub struct PayloadJournal {
    store: Arc<dyn PayloadStore>,
    entries: Vec<JournalEntry>,
    erases: Vec<EraseRequest>,
    sealed: bool,
}

impl PayloadJournal {
    /// Creates an empty journal writing through `store`.
    pub fn new(store: Arc<dyn PayloadStore>) -> Self {
        Self {
            store,
            entries: Vec::new(),
            erases: Vec::new(),
            sealed: false,
        }
    }

    /// Starts writing `payload` to `address` in the background and records
    /// the write.
    pub fn offload(&mut self, address: PayloadAddress, payload: Vec<u8>) -> PayloadResult<()> {
        self.ensure_open(&address)?;
        let store = self.store.clone();
        let target = address.clone();
        let pending = tokio::spawn(async move { store.store(&target, &payload).await });
        self.entries.push(JournalEntry {
            address,
            pending: Some(pending),
        });
        Ok(())
    }

    /// Records a write the caller already started.
    pub fn record(&mut self, address: PayloadAddress, pending: PendingStore) -> PayloadResult<()> {
        self.ensure_open(&address)?;
        self.entries.push(JournalEntry {
            address,
            pending: Some(pending),
        });
        Ok(())
    }

    /// Queues an erase of a logical resource (or one version) to run once
    /// the transaction commits.
    pub fn erase_after_commit(
        &mut self,
        resource_type_id: u32,
        logical_id: impl Into<String>,
        version: Option<u32>,
    ) {
        self.erases.push(EraseRequest {
            resource_type_id,
            logical_id: logical_id.into(),
            version,
        });
    }

    /// Addresses written in the current transaction.
    pub fn addresses(&self) -> impl Iterator<Item = &PayloadAddress> {
        self.entries.iter().map(|entry| &entry.address)
    }

    /// Returns true if nothing was recorded in the current transaction.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.erases.is_empty()
    }

    /// Waits for every recorded write.
    ///
    /// Fails on the first write that did not succeed; the caller must then
    /// roll back and call [`after_rollback`](Self::after_rollback). Entries
    /// are kept either way so a rollback can still delete them.
    pub async fn before_commit(&mut self) -> PayloadResult<()> {
        for entry in &mut self.entries {
            let Some(pending) = entry.pending.take() else {
                continue;
            };
            match pending.await {
                Ok(Ok(ack)) => {
                    debug!(address = %ack.address, bytes = ack.stored_bytes, "Payload write confirmed");
                }
                Ok(Err(err)) => {
                    error!(address = %entry.address, error = %err, "Payload write failed before commit");
                    return Err(err);
                }
                Err(join_err) => {
                    error!(address = %entry.address, error = %join_err, "Payload write task failed before commit");
                    return Err(BackendError::internal(
                        self.store.backend_name(),
                        format!("payload write task for {} failed: {join_err}", entry.address),
                    )
                    .into());
                }
            }
        }
        self.sealed = true;
        Ok(())
    }

    /// Runs the queued erases and clears the journal.
    ///
    /// The transaction is already durable, so failures are logged rather
    /// than returned.
    pub async fn after_commit(&mut self) -> JournalReport {
        let mut report = JournalReport::default();
        for request in std::mem::take(&mut self.erases) {
            match self
                .store
                .erase(request.resource_type_id, &request.logical_id, request.version)
                .await
            {
                Ok(removed) => {
                    info!(
                        resource_type_id = request.resource_type_id,
                        logical_id = %request.logical_id,
                        version = ?request.version,
                        removed,
                        "Erased offloaded payloads"
                    );
                    report.erased += removed;
                }
                Err(err) => {
                    error!(
                        resource_type_id = request.resource_type_id,
                        logical_id = %request.logical_id,
                        version = ?request.version,
                        error = %err,
                        "Failed to erase offloaded payloads; run reconciliation to remove them"
                    );
                    report.failed += 1;
                }
            }
        }
        self.clear();
        report
    }

    /// Deletes every payload written in the transaction and clears the
    /// journal.
    ///
    /// Writes still in flight are awaited first so their payload is not
    /// written after its delete.
    pub async fn after_rollback(&mut self) -> JournalReport {
        let mut report = JournalReport::default();
        for entry in std::mem::take(&mut self.entries) {
            if let Some(pending) = entry.pending {
                // The outcome does not matter, only that the write is over.
                let _ = pending.await;
            }
            match self.store.delete(&entry.address).await {
                Ok(DeleteOutcome::Deleted) => {
                    debug!(address = %entry.address, "Deleted payload of rolled back transaction");
                    report.deleted += 1;
                }
                Ok(DeleteOutcome::NotFound) => {}
                Err(err) => {
                    error!(
                        address = %entry.address,
                        error = %err,
                        "Rollback failed to delete payload; reconciliation will remove it"
                    );
                    report.failed += 1;
                }
            }
        }
        self.clear();
        report
    }

    /// Calls [`after_commit`](Self::after_commit) or
    /// [`after_rollback`](Self::after_rollback).
    pub async fn transaction_completed(&mut self, committed: bool) -> JournalReport {
        if committed {
            self.after_commit().await
        } else {
            self.after_rollback().await
        }
    }

    fn ensure_open(&self, address: &PayloadAddress) -> PayloadResult<()> {
        if self.sealed {
            return Err(PayloadError::Invariant(InvariantViolation::Journal {
                message: format!("payload {address} recorded after before_commit"),
            }));
        }
        Ok(())
    }

    fn clear(&mut self) {
        for entry in self.entries.drain(..) {
            if let Some(pending) = entry.pending {
                pending.abort();
            }
        }
        self.erases.clear();
        self.sealed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryPayloadStore;
    use crate::core::Ready;
    use crate::error::ErrorKind;

    fn addr(id: &str, version: u32, key: &str) -> PayloadAddress {
        PayloadAddress::new(1, id, version, key).unwrap()
    }

    fn memory() -> Arc<Ready<MemoryPayloadStore>> {
        Arc::new(Ready::new(MemoryPayloadStore::new()))
    }

    #[tokio::test]
    async fn test_commit_keeps_payloads() {
        let store = memory();
        let mut journal = PayloadJournal::new(store.clone());
        journal.offload(addr("p1", 1, "a"), b"one".to_vec()).unwrap();
        journal.offload(addr("p2", 1, "b"), b"two".to_vec()).unwrap();

        journal.before_commit().await.unwrap();
        let report = journal.after_commit().await;
        assert_eq!(report, JournalReport::default());
        assert!(journal.is_empty());
        assert_eq!(store.inner().len(), 2);
    }

    #[tokio::test]
    async fn test_rollback_deletes_payloads() {
        let store = memory();
        let mut journal = PayloadJournal::new(store.clone());
        journal.offload(addr("p1", 1, "a"), b"one".to_vec()).unwrap();
        journal.offload(addr("p1", 2, "b"), b"two".to_vec()).unwrap();

        let report = journal.transaction_completed(false).await;
        assert_eq!(report.deleted, 2);
        assert!(store.inner().is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_fails_commit() {
        let store = memory();
        let mut journal = PayloadJournal::new(store.clone());
        let failing: PendingStore = tokio::spawn(async {
            Err(PayloadError::from(BackendError::Unavailable {
                backend_name: "memory".to_string(),
                message: "down".to_string(),
            }))
        });
        journal.record(addr("p1", 1, "a"), failing).unwrap();

        let err = journal.before_commit().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientIo);
        assert_eq!(journal.addresses().count(), 1);

        let report = journal.after_rollback().await;
        assert_eq!(report.deleted, 0);
        assert_eq!(report.failed, 0);
        assert!(journal.is_empty());
    }

    #[tokio::test]
    async fn test_erase_runs_only_after_commit() {
        let store = memory();
        store.store(&addr("p1", 1, "a"), b"x").await.unwrap();
        store.store(&addr("p1", 2, "b"), b"y").await.unwrap();

        let mut journal = PayloadJournal::new(store.clone());
        journal.erase_after_commit(1, "p1", None);
        journal.after_rollback().await;
        assert_eq!(store.inner().len(), 2);

        journal.erase_after_commit(1, "p1", None);
        journal.before_commit().await.unwrap();
        let report = journal.after_commit().await;
        assert_eq!(report.erased, 2);
        assert!(store.inner().is_empty());
    }

    #[tokio::test]
    async fn test_record_after_before_commit_is_misuse() {
        let mut journal = PayloadJournal::new(memory());
        journal.before_commit().await.unwrap();
        let err = journal
            .offload(addr("p1", 1, "a"), b"late".to_vec())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);

        journal.after_commit().await;
        journal.offload(addr("p1", 1, "a"), b"next".to_vec()).unwrap();
    }
}
