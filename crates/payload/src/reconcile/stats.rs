use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::ScanCursor;

/// Counters reported by a reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileStats {
    /// Records visited by the scan.
    pub scanned: u64,
    /// Records with no matching metadata row.
    pub orphans: u64,
    /// Orphans removed from the payload store.
    pub deleted: u64,
    /// Records left alone because they are younger than the grace period.
    pub skipped: u64,
    /// Records whose check or delete failed.
    pub failed: u64,
    /// Scan pages fetched.
    pub pages: u64,
    /// Wall time of the run.
    pub elapsed: Duration,
    /// Where a later run can restart without missing work; `None` once the
    /// keyspace was scanned to its end.
    pub resume_from: Option<ScanCursor>,
    /// The run ended on a stop signal.
    pub stopped: bool,
}

impl ReconcileStats {
    /// Records scanned per second, 0 for an instantaneous run.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.scanned as f64 / secs
        } else {
            0.0
        }
    }

    /// Adds the counters of another run, e.g. another shard of the same
    /// keyspace.
    ///
    /// Elapsed time is the longer of the two. A merged result has no single
    /// resume point, so `resume_from` is cleared.
    pub fn merge(&mut self, other: &ReconcileStats) {
        self.scanned += other.scanned;
        self.orphans += other.orphans;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.pages += other.pages;
        self.elapsed = self.elapsed.max(other.elapsed);
        self.resume_from = None;
        self.stopped |= other.stopped;
    }
}

impl fmt::Display for ReconcileStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scanned={} orphans={} deleted={} skipped={} failed={} pages={} elapsed={} throughput={:.1}/s",
            self.scanned,
            self.orphans,
            self.deleted,
            self.skipped,
            self.failed,
            self.pages,
            humantime::format_duration(Duration::from_millis(self.elapsed.as_millis() as u64)),
            self.throughput(),
        )?;
        if self.stopped {
            write!(f, " stopped")?;
        }
        if let Some(cursor) = &self.resume_from {
            write!(f, " resume_from={}", cursor.to_hex())?;
        }
        Ok(())
    }
}
