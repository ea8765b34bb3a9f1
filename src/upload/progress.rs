//! Shared upload progress state: slice counters, the captured error, and the
//! finished/exception signals the orchestrator waits on.

use std::sync::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct ProgressState {
    slices_created: u32,
    slices_uploaded: u32,
    in_flight: u32,
    max_concurrency: u32,
    error: Option<String>,
    finished: bool,
}

/// Snapshot of the progress counters at completion.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    /// Slices produced by the slicer
    pub slices_created: u32,
    /// Slices uploaded and confirmed
    pub slices_uploaded: u32,
    /// Highest number of simultaneous uploads observed
    pub max_concurrency: u32,
    /// First captured failure, if any
    pub error: Option<String>,
}

/// Counters and signals shared between the slicer, the worker pool, and the
/// orchestrator. All mutation happens under one lock; the orchestrator
/// suspends on [`wait_until_settled`] until either "upload finished" or
/// "exception occurred" is signaled.
///
/// [`wait_until_settled`]: UploadProgress::wait_until_settled
pub(crate) struct UploadProgress {
    state: Mutex<ProgressState>,
    notify: Notify,
    cancel_token: CancellationToken,
}

impl UploadProgress {
    pub(crate) fn new(cancel_token: CancellationToken) -> Self {
        Self {
            state: Mutex::new(ProgressState::default()),
            notify: Notify::new(),
            cancel_token,
        }
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Count one produced slice.
    pub(crate) fn record_created(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.slices_created += 1;
    }

    /// Mark one upload as started, tracking peak concurrency.
    pub(crate) fn begin_upload(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.in_flight += 1;
        state.max_concurrency = state.max_concurrency.max(state.in_flight);
    }

    /// Mark one upload as confirmed.
    pub(crate) fn finish_upload(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.in_flight -= 1;
        state.slices_uploaded += 1;
    }

    /// Capture a failure and signal "exception occurred".
    ///
    /// Only the first error is kept; the shared token is cancelled so
    /// in-flight provider calls abort promptly.
    pub(crate) fn capture_error(&self, reason: impl Into<String>) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.error.is_none() {
                state.error = Some(reason.into());
            }
        }
        self.cancel_token.cancel();
        self.notify.notify_waiters();
    }

    /// Capture a failure from an upload that was in flight, releasing its
    /// concurrency slot.
    ///
    /// Callers must have called [`begin_upload`] first; failures outside an
    /// upload (slicing, a panicked worker) go through [`capture_error`] and
    /// leave the in-flight count alone.
    ///
    /// [`begin_upload`]: UploadProgress::begin_upload
    /// [`capture_error`]: UploadProgress::capture_error
    pub(crate) fn fail_upload(&self, reason: impl Into<String>) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.in_flight -= 1;
        }
        self.capture_error(reason);
    }

    /// Whether an error was captured (checked by the producer loop so it
    /// stops slicing promptly).
    pub(crate) fn has_error(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .error
            .is_some()
    }

    /// Signal "upload finished" if every created slice was uploaded.
    ///
    /// Called by each worker when it observes the drained, closed channel;
    /// redundant signaling from several workers is harmless.
    pub(crate) fn signal_if_complete(&self) {
        let complete = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.error.is_none() && state.slices_uploaded == state.slices_created {
                state.finished = true;
            }
            state.finished
        };
        if complete {
            self.notify.notify_waiters();
        }
    }

    /// Suspend until "upload finished" or "exception occurred".
    pub(crate) async fn wait_until_settled(&self) {
        loop {
            let notified = self.notify.notified();
            {
                let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                if state.finished || state.error.is_some() {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Final snapshot for the orchestrator.
    pub(crate) fn outcome(&self) -> UploadOutcome {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        UploadOutcome {
            slices_created: state.slices_created,
            slices_uploaded: state.slices_uploaded,
            max_concurrency: state.max_concurrency,
            error: state.error.clone(),
        }
    }
}
