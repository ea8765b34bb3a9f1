//! Chunked upload pipeline, decomposed into focused submodules:
//! - [`slicer`] - The single slice producer feeding the bounded channel
//! - [`workers`] - The fixed worker pool draining the channel
//! - [`progress`] - Shared counters and the finished/exception signals

mod progress;
mod slicer;
mod workers;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use progress::UploadOutcome;

use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::coordination::CoordinationApi;
use crate::crypto::{SliceEncrypter, UploadSource};
use crate::error::{Error, Result, UploadError};
use crate::provider::ProviderRegistry;
use crate::retry::RetryPolicy;
use crate::types::{Event, TransferDefinition};

use progress::UploadProgress;
use workers::{UploadWorkerContext, run_upload_worker};

/// External collaborators wired into every [`FileUploadProcessor`].
#[derive(Clone)]
pub struct UploadServices {
    /// Remote coordination API
    pub coordination: Arc<dyn CoordinationApi>,
    /// Provider strategy registry
    pub providers: ProviderRegistry,
    /// Retry policy wrapped around provider calls
    pub retry_policy: Arc<dyn RetryPolicy>,
}

/// Orchestrator of one source's upload: slicing, the worker pool, and the
/// single aggregate error on failure.
pub struct FileUploadProcessor {
    config: Config,
    services: UploadServices,
    event_tx: broadcast::Sender<Event>,
}

impl FileUploadProcessor {
    /// Create a processor over the given configuration and collaborators.
    pub fn new(config: Config, services: UploadServices) -> Result<Self> {
        config.validate()?;
        let (event_tx, _rx) = broadcast::channel(256);
        Ok(Self {
            config,
            services,
            event_tx,
        })
    }

    /// Subscribe to upload events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Upload `source` as `definition`, slicing and encrypting on the fly.
    ///
    /// Runs the slicer on the calling task while the worker pool uploads
    /// concurrently, then waits until every slice is confirmed or a failure
    /// was captured. The encrypter is disposed in both cases. On failure one
    /// aggregate error names the source and the transfer; no partial results
    /// are surfaced.
    pub async fn upload(
        &self,
        definition: Arc<TransferDefinition>,
        source: UploadSource,
        mut encrypter: Box<dyn SliceEncrypter>,
    ) -> Result<UploadOutcome> {
        let source_description = source.describe();
        let progress = Arc::new(UploadProgress::new(CancellationToken::new()));

        encrypter.set_max_slice_length(self.config.transfer.max_slice_length);
        if let Err(e) = encrypter.initialize(source, &definition).await {
            encrypter.dispose();
            return Err(self.source_failed(&definition, &source_description, e.to_string()));
        }

        let (tx, rx) = mpsc::channel(self.config.transfer.slice_channel_capacity);
        let shared_rx = Arc::new(Mutex::new(rx));

        let worker_count = self.config.transfer.upload_workers;
        tracing::info!(
            transfer_id = %definition.transfer_id,
            source = %source_description,
            workers = worker_count,
            "Starting upload pipeline"
        );

        let ctx = UploadWorkerContext {
            definition: Arc::clone(&definition),
            slices: shared_rx,
            progress: Arc::clone(&progress),
            coordination: Arc::clone(&self.services.coordination),
            providers: self.services.providers.clone(),
            retry_policy: Arc::clone(&self.services.retry_policy),
            event_tx: self.event_tx.clone(),
        };
        let worker_handles: Vec<_> = (0..worker_count)
            .map(|i| tokio::spawn(run_upload_worker(ctx.clone(), i)))
            .collect();

        slicer::run_slicer(&mut encrypter, tx, &progress, &self.event_tx, &definition).await;
        // The sender is gone; once the workers drain the channel they observe
        // end-of-input and settle the progress state.
        progress.wait_until_settled().await;
        encrypter.dispose();

        for result in futures::future::join_all(worker_handles).await {
            if let Err(e) = result {
                tracing::error!(
                    transfer_id = %definition.transfer_id,
                    error = %e,
                    "Upload worker panicked"
                );
                progress.capture_error("upload worker panicked");
            }
        }

        let outcome = progress.outcome();
        if let Some(reason) = outcome.error {
            return Err(self.source_failed(&definition, &source_description, reason));
        }
        if outcome.slices_created == 0 {
            return Err(self.source_failed(
                &definition,
                &source_description,
                Error::Upload(UploadError::EmptySource {
                    transfer_id: definition.transfer_id,
                })
                .to_string(),
            ));
        }

        self.services
            .coordination
            .assert_transfer_finished(definition.transfer_id, outcome.slices_created)
            .await?;

        tracing::info!(
            transfer_id = %definition.transfer_id,
            slices = outcome.slices_created,
            max_concurrency = outcome.max_concurrency,
            "Upload complete"
        );
        self.event_tx
            .send(Event::TransferComplete {
                transfer_id: definition.transfer_id,
                total_parts: outcome.slices_created,
            })
            .ok();
        Ok(outcome)
    }

    fn source_failed(
        &self,
        definition: &TransferDefinition,
        source: &str,
        reason: String,
    ) -> Error {
        self.event_tx
            .send(Event::TransferFailed {
                transfer_id: definition.transfer_id,
                error: reason.clone(),
            })
            .ok();
        Error::Upload(UploadError::SourceFailed {
            source_name: source.to_string(),
            transfer_id: definition.transfer_id,
            reason,
        })
    }
}
