//! Bounded, resumable iteration over a payload store.
//!
//! [`TokenRangeScanner`] reads a store in pages ordered by [`ScanCursor`].
//! Cursors are not unique: every version of a logical resource shares one
//! token in a wide-column store. A page that is cut in the middle of such a
//! group is completed with a second fetch over exactly the boundary cursor,
//! so the next page can start strictly after it without skipping siblings.
//!
//! ```
//! # use std::sync::Arc;
//! # use helios_payload::prelude::*;
//! # use helios_payload::scanner::TokenRangeScanner;
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> PayloadResult<()> {
//! let store = Ready::new(MemoryPayloadStore::new());
//! store.store(&PayloadAddress::new(1, "p1", 1, "k1")?, b"{}").await?;
//!
//! let scanner = TokenRangeScanner::new(Arc::new(store));
//! let mut seen = 0;
//! let outcome = scanner.run(&ScanCursor::MIN, |_| { seen += 1; true }).await?;
//! assert_eq!(seen, 1);
//! assert!(outcome.is_exhausted());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tracing::debug;

use crate::core::{PayloadScan, ResourceRecord, ScanCursor, ScanRange};
use crate::error::{InvariantViolation, PayloadResult};

/// Records fetched per page unless configured otherwise.
pub const DEFAULT_PAGE_SIZE: usize = 1024;

/// Result of one [`TokenRangeScanner::run`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// A full page was handled. Resume at `last.successor()`.
    Advanced {
        /// Cursor of the last handled record.
        last: ScanCursor,
    },
    /// The range holds nothing beyond the handled records.
    Exhausted {
        /// Cursor of the last handled record, if any.
        last: Option<ScanCursor>,
    },
    /// The handler asked to stop.
    Stopped {
        /// Cursor of the rejected record; records at that cursor may not
        /// all have been handled.
        last: Option<ScanCursor>,
    },
}

impl ScanOutcome {
    /// Where the next call should start, or `None` when exhausted.
    ///
    /// After a stop the scan restarts at the rejected record's cursor so
    /// that none of its siblings are skipped.
    pub fn resume_cursor(&self) -> Option<ScanCursor> {
        match self {
            ScanOutcome::Advanced { last } => Some(last.successor()),
            ScanOutcome::Stopped { last } => last.clone(),
            ScanOutcome::Exhausted { .. } => None,
        }
    }

    /// Returns true if the range was scanned to its end.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, ScanOutcome::Exhausted { .. })
    }

    /// Returns true if the handler requested the stop.
    pub fn is_stopped(&self) -> bool {
        matches!(self, ScanOutcome::Stopped { .. })
    }
}

/// One logical scan step: a page with its boundary group completed.
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    /// Records in non-decreasing cursor order.
    pub records: Vec<ResourceRecord>,
    /// Start of the next step, or `None` when the range is exhausted.
    pub next: Option<ScanCursor>,
}

/// Pages through a [`PayloadScan`] in cursor order.
#[derive(Clone)]
pub struct TokenRangeScanner {
    store: Arc<dyn PayloadScan>,
    page_size: usize,
    end: Option<ScanCursor>,
}

impl std::fmt::Debug for TokenRangeScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRangeScanner")
            .field("page_size", &self.page_size)
            .field("end", &self.end)
            .finish_non_exhaustive()
    }
}

impl TokenRangeScanner {
    /// Creates a scanner over the whole keyspace of `store`.
    pub fn new(store: Arc<dyn PayloadScan>) -> Self {
        Self {
            store,
            page_size: DEFAULT_PAGE_SIZE,
            end: None,
        }
    }

    /// Sets the number of records per page (at least 1).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Stops every scan before `end` (exclusive).
    pub fn with_end(mut self, end: Option<ScanCursor>) -> Self {
        self.end = end;
        self
    }

    /// Returns the configured page size.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Fetches the scan step starting at `start`.
    pub async fn fetch(&self, start: &ScanCursor) -> PayloadResult<ScanPage> {
        let range = ScanRange {
            start: start.clone(),
            end: self.end.clone(),
        };
        if range.is_empty() {
            return Ok(ScanPage::default());
        }

        let mut records = self.store.fetch_page(&range, self.page_size).await?;
        check_page(&records, &range)?;

        if records.len() < self.page_size {
            debug!(range = %range, records = records.len(), "Scan range exhausted");
            return Ok(ScanPage {
                records,
                next: None,
            });
        }

        let Some(boundary) = records.last().map(|r| r.cursor.clone()) else {
            return Ok(ScanPage::default());
        };

        // The page may have cut the boundary group; replace it with the
        // complete group.
        let cut = records.partition_point(|r| r.cursor < boundary);
        records.truncate(cut);
        let group = self
            .store
            .fetch_page(&ScanRange::exactly(&boundary), usize::MAX)
            .await?;
        if let Some(stray) = group.iter().find(|r| r.cursor != boundary) {
            return Err(InvariantViolation::ScanContract {
                message: format!(
                    "boundary fetch at {boundary} returned a record at {}",
                    stray.cursor
                ),
            }
            .into());
        }
        debug!(
            boundary = %boundary,
            group = group.len(),
            records = records.len() + group.len(),
            "Scan page completed at boundary"
        );
        records.extend(group);

        Ok(ScanPage {
            records,
            next: Some(boundary.successor()),
        })
    }

    /// Handles one page starting at `start`.
    ///
    /// Each record is passed to `handler` in cursor order; returning false
    /// stops the scan immediately.
    pub async fn run<F>(&self, start: &ScanCursor, mut handler: F) -> PayloadResult<ScanOutcome>
    where
        F: FnMut(&ResourceRecord) -> bool,
    {
        let page = self.fetch(start).await?;
        let mut last = None;
        for record in &page.records {
            last = Some(record.cursor.clone());
            if !handler(record) {
                return Ok(ScanOutcome::Stopped { last });
            }
        }

        Ok(match (page.next, last) {
            (Some(_), Some(last)) => ScanOutcome::Advanced { last },
            (_, last) => ScanOutcome::Exhausted { last },
        })
    }

    /// Scans from `start` to the end and returns every record visited.
    pub async fn scan_all(&self, start: ScanCursor) -> PayloadResult<Vec<ResourceRecord>> {
        let mut visited = Vec::new();
        let mut next = Some(start);
        while let Some(cursor) = next {
            let page = self.fetch(&cursor).await?;
            visited.extend(page.records);
            next = page.next;
        }
        Ok(visited)
    }
}

fn check_page(records: &[ResourceRecord], range: &ScanRange) -> PayloadResult<()> {
    if let Some(outside) = records.iter().find(|r| !range.contains(&r.cursor)) {
        return Err(InvariantViolation::ScanContract {
            message: format!("record at {} lies outside {range}", outside.cursor),
        }
        .into());
    }
    if let Some(pair) = records.windows(2).find(|w| w[0].cursor > w[1].cursor) {
        return Err(InvariantViolation::ScanContract {
            message: format!(
                "records out of order: {} before {}",
                pair[0].cursor, pair[1].cursor
            ),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::address::PayloadAddress;
    use crate::backends::MemoryPayloadStore;
    use crate::core::{PayloadStore, Ready};
    use crate::error::{ErrorKind, PayloadError};

    fn record(token: i64, id: &str) -> ResourceRecord {
        ResourceRecord::new(
            ScanCursor::from_token(token),
            PayloadAddress::new(1, id, 1, "k").unwrap(),
        )
    }

    /// Serves a fixed, sorted list of records.
    #[derive(Debug)]
    struct FixedScan(Vec<ResourceRecord>);

    #[async_trait]
    impl PayloadScan for FixedScan {
        async fn fetch_page(
            &self,
            range: &ScanRange,
            limit: usize,
        ) -> PayloadResult<Vec<ResourceRecord>> {
            Ok(self
                .0
                .iter()
                .filter(|r| range.contains(&r.cursor))
                .take(limit)
                .cloned()
                .collect())
        }
    }

    /// Ignores the range and always returns the same rows.
    #[derive(Debug)]
    struct BrokenScan(Vec<ResourceRecord>);

    #[async_trait]
    impl PayloadScan for BrokenScan {
        async fn fetch_page(
            &self,
            _range: &ScanRange,
            _limit: usize,
        ) -> PayloadResult<Vec<ResourceRecord>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_boundary_group_is_completed() {
        let records = vec![
            record(1, "a"),
            record(2, "b"),
            record(2, "c"),
            record(2, "d"),
            record(3, "e"),
        ];
        let scanner = TokenRangeScanner::new(Arc::new(FixedScan(records.clone()))).with_page_size(2);

        let page = scanner.fetch(&ScanCursor::MIN).await.unwrap();
        assert_eq!(page.records, records[..4].to_vec());
        assert_eq!(page.next, Some(ScanCursor::from_token(2).successor()));

        let page = scanner.fetch(page.next.as_ref().unwrap()).await.unwrap();
        assert_eq!(page.records, records[4..].to_vec());
        assert_eq!(page.next, None);
    }

    #[tokio::test]
    async fn test_page_made_of_one_group() {
        let records: Vec<_> = (0..5).map(|i| record(7, &format!("r{i}"))).collect();
        let scanner = TokenRangeScanner::new(Arc::new(FixedScan(records.clone()))).with_page_size(3);
        assert_eq!(scanner.scan_all(ScanCursor::MIN).await.unwrap(), records);
    }

    #[tokio::test]
    async fn test_run_outcomes() {
        let records: Vec<_> = (0..4).map(|i| record(i, &format!("r{i}"))).collect();
        let scanner = TokenRangeScanner::new(Arc::new(FixedScan(records))).with_page_size(2);

        let outcome = scanner.run(&ScanCursor::MIN, |_| true).await.unwrap();
        assert_eq!(
            outcome,
            ScanOutcome::Advanced {
                last: ScanCursor::from_token(1)
            }
        );

        let resume = outcome.resume_cursor().unwrap();
        let outcome = scanner.run(&resume, |_| true).await.unwrap();
        assert!(matches!(outcome, ScanOutcome::Advanced { .. }));

        let resume = outcome.resume_cursor().unwrap();
        let outcome = scanner.run(&resume, |_| true).await.unwrap();
        assert_eq!(outcome, ScanOutcome::Exhausted { last: None });

        let mut handled = 0;
        let outcome = scanner
            .run(&ScanCursor::MIN, |_| {
                handled += 1;
                false
            })
            .await
            .unwrap();
        assert_eq!(handled, 1);
        assert!(outcome.is_stopped());
        assert_eq!(outcome.resume_cursor(), Some(ScanCursor::from_token(0)));
    }

    #[tokio::test]
    async fn test_stop_is_distinct_from_exhaustion() {
        let scanner = TokenRangeScanner::new(Arc::new(FixedScan(vec![record(5, "only")])));
        let outcome = scanner.run(&ScanCursor::MIN, |_| false).await.unwrap();
        assert_eq!(
            outcome,
            ScanOutcome::Stopped {
                last: Some(ScanCursor::from_token(5))
            }
        );

        let outcome = scanner.run(&ScanCursor::MIN, |_| true).await.unwrap();
        assert_eq!(
            outcome,
            ScanOutcome::Exhausted {
                last: Some(ScanCursor::from_token(5))
            }
        );
    }

    #[tokio::test]
    async fn test_end_bound() {
        let records: Vec<_> = (0..6).map(|i| record(i, &format!("r{i}"))).collect();
        let scanner = TokenRangeScanner::new(Arc::new(FixedScan(records.clone())))
            .with_page_size(2)
            .with_end(Some(ScanCursor::from_token(4)));
        assert_eq!(scanner.scan_all(ScanCursor::MIN).await.unwrap(), records[..4].to_vec());
        assert!(scanner
            .fetch(&ScanCursor::from_token(4))
            .await
            .unwrap()
            .records
            .is_empty());
    }

    #[tokio::test]
    async fn test_contract_violations_are_invariant_errors() {
        let scanner = TokenRangeScanner::new(Arc::new(BrokenScan(vec![record(1, "a")])));
        let err = scanner
            .fetch(&ScanCursor::from_token(10))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);

        let unordered = vec![record(3, "a"), record(1, "b")];
        let scanner = TokenRangeScanner::new(Arc::new(BrokenScan(unordered)));
        let err = scanner.fetch(&ScanCursor::MIN).await.unwrap_err();
        assert!(matches!(err, PayloadError::Invariant(_)));
    }

    #[tokio::test]
    async fn test_scans_memory_store_partitions() {
        let store = Ready::new(MemoryPayloadStore::new());
        for i in 0..10 {
            for version in 1..=3 {
                let address = PayloadAddress::new(4, format!("obs-{i}"), version, "k").unwrap();
                store.store(&address, b"{}").await.unwrap();
            }
        }

        let scanner = TokenRangeScanner::new(Arc::new(store)).with_page_size(4);
        let visited = scanner.scan_all(ScanCursor::MIN).await.unwrap();
        assert_eq!(visited.len(), 30);
        assert!(visited.windows(2).all(|w| w[0].cursor <= w[1].cursor));
    }
}
