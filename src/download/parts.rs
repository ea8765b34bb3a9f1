//! Part-availability coordination: which parts are announced, queued,
//! downloaded, and merged.
//!
//! Parts download in whatever order the network completes them, but the merge
//! stage only ever receives the mergeable prefix: the longest gap-free
//! ascending run of downloaded-but-unmerged part numbers, starting at part 1.
//! The decryption chain is stateful across parts, so gaps are never tolerated.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use super::queue::{MergeChannel, PartQueue};
use crate::error::{DownloadError, Error, Result};
use crate::types::{PartNumber, TransferId};

/// Tracking sets for one transfer's parts.
///
/// Invariants (all maintained under the coordinator's mutex):
/// `sent_to_download ⊆ available`, `sent_to_merge ⊆ downloaded`, and
/// `sent_to_merge` is always the contiguous prefix `{1..=n}`.
#[derive(Debug, Default)]
pub(crate) struct PartTracking {
    /// Parts announced as available on remote storage
    available: BTreeSet<PartNumber>,
    /// Parts handed to the download queue
    sent_to_download: BTreeSet<PartNumber>,
    /// Parts fully downloaded into the target's buffers
    downloaded: BTreeSet<PartNumber>,
    /// Parts handed to the merge channel (always a prefix)
    sent_to_merge: BTreeSet<PartNumber>,
    /// Total part count; `None` until announced
    total_parts: Option<u32>,
}

impl PartTracking {
    fn merged_count(&self) -> u32 {
        self.sent_to_merge.len() as u32
    }
}

/// Coordinates part availability for one transfer.
///
/// Every operation runs under the single tracking mutex, so the two "did we
/// just learn everything needed to complete" checks (last part announced vs.
/// total announced last) can never race.
pub(crate) struct PartsCoordinator {
    transfer_id: TransferId,
    state: Mutex<PartTracking>,
    queue: Arc<PartQueue<PartNumber>>,
    merge_channel: Arc<MergeChannel>,
}

impl PartsCoordinator {
    pub(crate) fn new(
        transfer_id: TransferId,
        queue: Arc<PartQueue<PartNumber>>,
        merge_channel: Arc<MergeChannel>,
    ) -> Self {
        Self {
            transfer_id,
            state: Mutex::new(PartTracking::default()),
            queue,
            merge_channel,
        }
    }

    /// Record that part `n` exists on remote storage and queue every
    /// announced-but-never-queued part for download.
    ///
    /// Closes the download queue once all parts of a known total have been
    /// announced. Returns the part numbers queued by this call.
    pub(crate) fn announce_part_available(&self, n: PartNumber) -> Result<Vec<PartNumber>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.available.insert(n);

        let to_queue: Vec<PartNumber> = state
            .available
            .difference(&state.sent_to_download)
            .copied()
            .collect();
        for part in &to_queue {
            if let Err(e) = self.queue.push(*part) {
                // A part the queue refused must not linger as available, or
                // every later announcement would retry the rejected push
                state.available.remove(part);
                return Err(e);
            }
            state.sent_to_download.insert(*part);
        }

        if let Some(total) = state.total_parts
            && state.available.len() as u32 == total
        {
            tracing::debug!(
                transfer_id = %self.transfer_id,
                total,
                "All parts announced, closing download queue"
            );
            self.queue.close();
        }

        Ok(to_queue)
    }

    /// Record the total part count of the transfer.
    ///
    /// The total may arrive before or after the last availability
    /// announcement; whichever side learns completion last performs it, and
    /// each completion happens exactly once. Conflicting totals are an error.
    pub(crate) fn announce_total_parts(&self, total: u32) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(existing) = state.total_parts {
            if existing != total {
                return Err(Error::Download(DownloadError::TotalPartsConflict {
                    transfer_id: self.transfer_id,
                    existing,
                    announced: total,
                }));
            }
            return Ok(());
        }
        state.total_parts = Some(total);

        // Degenerate case: every part already merged before the total arrived
        if state.merged_count() == total {
            self.merge_channel.complete();
        }
        if state.available.len() as u32 == total {
            self.queue.close();
        }

        Ok(())
    }

    /// Record that part `p` finished downloading and hand the mergeable
    /// prefix to the merge stage, in order.
    ///
    /// Completes the merge channel once every part of a known total has been
    /// sent to merge. Returns the run of parts sent by this call.
    pub(crate) fn register_downloaded(&self, p: PartNumber) -> Result<Vec<PartNumber>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.downloaded.insert(p);

        let mut run = Vec::new();
        let mut next = state.merged_count() + 1;
        while state.downloaded.contains(&next) {
            self.merge_channel.send(next)?;
            state.sent_to_merge.insert(next);
            run.push(next);
            next += 1;
        }

        if let Some(total) = state.total_parts
            && state.merged_count() == total
        {
            tracing::debug!(
                transfer_id = %self.transfer_id,
                total,
                "All parts sent to merge, completing merge channel"
            );
            self.merge_channel.complete();
        }

        Ok(run)
    }

    /// Total parts, once announced.
    pub(crate) fn total_parts(&self) -> Option<u32> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .total_parts
    }

    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> (Vec<PartNumber>, Vec<PartNumber>, Vec<PartNumber>) {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        (
            state.available.iter().copied().collect(),
            state.downloaded.iter().copied().collect(),
            state.sent_to_merge.iter().copied().collect(),
        )
    }
}
