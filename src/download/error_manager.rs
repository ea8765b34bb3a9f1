//! The error manager: one atomic poison transition per transfer.

use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::queue::{MergeChannel, PartQueue};
use crate::types::PartNumber;

/// Owner of the transfer's failure invariant group.
///
/// The error flag, the completion of both pipeline stages, the in-flight
/// semaphore, and the cancellation token must never be observed half-applied,
/// so all of them transition together under one lock in [`poison`].
///
/// [`poison`]: ErrorManager::poison
pub(crate) struct ErrorManager {
    /// First captured failure reason; `Some` means poisoned
    error: Mutex<Option<String>>,
    queue: Arc<PartQueue<PartNumber>>,
    merge_channel: Arc<MergeChannel>,
    in_flight: Arc<Semaphore>,
    cancel_token: CancellationToken,
}

impl ErrorManager {
    pub(crate) fn new(
        queue: Arc<PartQueue<PartNumber>>,
        merge_channel: Arc<MergeChannel>,
        in_flight: Arc<Semaphore>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            error: Mutex::new(None),
            queue,
            merge_channel,
            in_flight,
            cancel_token,
        }
    }

    /// Mark the transfer permanently failed and unblock every waiter.
    ///
    /// Closes the download queue, completes the merge channel, closes the
    /// in-flight semaphore (a worker waiting on a slot would otherwise sleep
    /// forever, since the merge task stops returning permits), and cancels
    /// the shared token. Idempotent: only the first caller's reason is kept.
    pub(crate) fn poison(&self, reason: impl Into<String>) {
        let mut error = self.error.lock().unwrap_or_else(|e| e.into_inner());
        if error.is_some() {
            return;
        }
        let reason = reason.into();
        tracing::error!(error = %reason, "Poisoning transfer");
        *error = Some(reason);
        self.queue.close();
        self.merge_channel.complete();
        self.in_flight.close();
        self.cancel_token.cancel();
    }

    /// Guarded read of the error flag.
    pub(crate) fn is_poisoned(&self) -> bool {
        self.error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// The first captured failure reason, if poisoned.
    pub(crate) fn first_error(&self) -> Option<String> {
        self.error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The shared cancellation token in-flight calls must honor.
    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }
}
