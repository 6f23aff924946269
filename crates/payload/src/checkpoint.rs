//! Watermark over out-of-order completions.
//!
//! Work items get strictly increasing request ids. They may finish in any
//! order; [`CheckpointTracker::checkpoint`] is the highest id such that it
//! and every id tracked before it are complete. Restarting after that id
//! never skips unfinished work.

use std::collections::{BTreeSet, VecDeque};

use parking_lot::Mutex;

use crate::error::{InvariantViolation, PayloadResult};

#[derive(Debug, Default)]
struct TrackerState {
    queued: VecDeque<u64>,
    completed_out_of_order: BTreeSet<u64>,
    checkpoint: Option<u64>,
    last_tracked: Option<u64>,
}

/// Tracks request ids and exposes the highest contiguous completed id.
///
/// One lock guards the whole state; no operation waits while holding it,
/// so completions may be reported from any task.
///
/// ```
/// use helios_payload::checkpoint::CheckpointTracker;
///
/// let tracker = CheckpointTracker::new();
/// tracker.track_all(&[1, 2, 3]).unwrap();
/// tracker.completed(2).unwrap();
/// assert_eq!(tracker.checkpoint(), None);
/// tracker.completed(1).unwrap();
/// assert_eq!(tracker.checkpoint(), Some(2));
/// ```
#[derive(Debug, Default)]
pub struct CheckpointTracker {
    state: Mutex<TrackerState>,
}

impl CheckpointTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `id`, which must exceed every id tracked so far.
    pub fn track(&self, id: u64) -> PayloadResult<()> {
        self.track_all(&[id])
    }

    /// Starts tracking a batch of ids.
    ///
    /// The batch is validated as a whole; if any id is out of order the
    /// tracker is left unchanged.
    pub fn track_all(&self, ids: &[u64]) -> PayloadResult<()> {
        let mut state = self.state.lock();
        let mut last = state.last_tracked;
        for &id in ids {
            if let Some(previous) = last
                && id <= previous
            {
                return Err(InvariantViolation::TrackOutOfOrder { id, last: previous }.into());
            }
            last = Some(id);
        }

        state.queued.extend(ids.iter().copied());
        state.last_tracked = last;
        Ok(())
    }

    /// Marks `id` complete and advances the checkpoint through every id
    /// that is now contiguously complete.
    pub fn completed(&self, id: u64) -> PayloadResult<()> {
        let mut state = self.state.lock();
        let Some(&head) = state.queued.front() else {
            return Err(InvariantViolation::CompletedWithEmptyQueue { id }.into());
        };

        if id != head {
            let outstanding = state.queued.binary_search(&id).is_ok();
            if !outstanding || !state.completed_out_of_order.insert(id) {
                return Err(InvariantViolation::CompletedUnknown { id }.into());
            }
            return Ok(());
        }

        state.queued.pop_front();
        state.checkpoint = Some(id);
        while let Some(&next) = state.queued.front() {
            if !state.completed_out_of_order.remove(&next) {
                break;
            }
            state.queued.pop_front();
            state.checkpoint = Some(next);
        }
        Ok(())
    }

    /// Highest id such that it and every earlier tracked id are complete,
    /// or `None` before the first such id.
    pub fn checkpoint(&self) -> Option<u64> {
        self.state.lock().checkpoint
    }

    /// Oldest tracked id that has not completed.
    pub fn first_outstanding(&self) -> Option<u64> {
        let state = self.state.lock();
        state
            .queued
            .iter()
            .copied()
            .find(|id| !state.completed_out_of_order.contains(id))
    }

    /// Number of tracked ids not yet drained.
    pub fn outstanding(&self) -> usize {
        self.state.lock().queued.len()
    }

    /// Returns true once every tracked id has completed.
    pub fn is_empty(&self) -> bool {
        self.state.lock().queued.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::{ErrorKind, PayloadError};

    #[test]
    fn test_exact_sequence() {
        let tracker = CheckpointTracker::new();
        tracker.track(1).unwrap();
        tracker.track(2).unwrap();
        tracker.track(3).unwrap();

        tracker.completed(2).unwrap();
        assert_eq!(tracker.checkpoint(), None);
        tracker.completed(1).unwrap();
        assert_eq!(tracker.checkpoint(), Some(2));
        tracker.completed(3).unwrap();
        assert_eq!(tracker.checkpoint(), Some(3));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_rejected_track_leaves_state() {
        let tracker = CheckpointTracker::new();
        tracker.track(5).unwrap();
        let err = tracker.track(3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);
        assert_eq!(tracker.outstanding(), 1);

        // 7 is fine on its own but the batch is rejected as a whole.
        assert!(tracker.track_all(&[7, 6]).is_err());
        assert_eq!(tracker.outstanding(), 1);
        assert!(tracker.track(5).is_err());
        tracker.track_all(&[6, 7]).unwrap();
        assert_eq!(tracker.outstanding(), 3);
    }

    #[test]
    fn test_completion_misuse() {
        let tracker = CheckpointTracker::new();
        let err = tracker.completed(1).unwrap_err();
        assert!(matches!(
            err,
            PayloadError::Invariant(InvariantViolation::CompletedWithEmptyQueue { id: 1 })
        ));

        tracker.track_all(&[1, 2, 3]).unwrap();
        assert!(tracker.completed(9).is_err());
        tracker.completed(3).unwrap();
        assert!(tracker.completed(3).is_err());
        assert_eq!(tracker.first_outstanding(), Some(1));
        tracker.completed(1).unwrap();
        assert_eq!(tracker.checkpoint(), Some(1));
        assert_eq!(tracker.first_outstanding(), Some(2));
    }

    #[test]
    fn test_gaps_between_ids() {
        let tracker = CheckpointTracker::new();
        tracker.track_all(&[10, 20, 30]).unwrap();
        tracker.completed(30).unwrap();
        tracker.completed(20).unwrap();
        assert_eq!(tracker.checkpoint(), None);
        tracker.completed(10).unwrap();
        assert_eq!(tracker.checkpoint(), Some(30));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_concurrent_completions() {
        let tracker = Arc::new(CheckpointTracker::new());
        let ids: Vec<u64> = (0..1000).collect();
        tracker.track_all(&ids).unwrap();

        let handles: Vec<_> = (0..4u64)
            .map(|worker| {
                let tracker = tracker.clone();
                std::thread::spawn(move || {
                    let mut last_seen = None;
                    for id in (0..1000u64).rev().filter(|id| id % 4 == worker) {
                        tracker.completed(id).unwrap();
                        let checkpoint = tracker.checkpoint();
                        assert!(checkpoint >= last_seen);
                        last_seen = checkpoint;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tracker.checkpoint(), Some(999));
        assert!(tracker.is_empty());
    }
}
