//! Chunked download pipeline, decomposed into focused submodules:
//! - [`parts`] - Part-availability coordination and the mergeable prefix
//! - [`queue`] - Closable download queue and ordered merge channel
//! - [`error_manager`] - The atomic poison transition
//! - [`workers`] - Download worker loops and the merge task
//! - [`merger`] - Decrypter chain execution per part
//! - [`target`] - Landing-path resolution and the session-scoped target cache
//! - [`finalize`] - Post-extraction synchronization finalization

pub(crate) mod error_manager;
mod finalize;
mod merger;
mod parts;
pub(crate) mod queue;
mod target;
mod workers;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

pub use finalize::SynchronizationFinalizer;
pub use target::{DownloadTargetBuilder, TargetCache, TransferTarget};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Semaphore, broadcast};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::coordination::CoordinationApi;
use crate::crypto::MergerFactory;
use crate::error::{DownloadError, Error, Result};
use crate::provider::ProviderRegistry;
use crate::retry::RetryPolicy;
use crate::session::SessionScoped;
use crate::types::{Event, PartNumber, TransferDefinition, TransferKey};

use error_manager::ErrorManager;
use merger::FileMerger;
use parts::PartsCoordinator;
use queue::{MergeChannel, PartQueue};
use workers::{DownloadWorkerContext, run_download_worker, run_merge_task};

/// External collaborators wired into every [`FileDownloader`].
#[derive(Clone)]
pub struct DownloadServices {
    /// Remote coordination API
    pub coordination: Arc<dyn CoordinationApi>,
    /// Provider strategy registry
    pub providers: ProviderRegistry,
    /// Retry policy wrapped around provider calls
    pub retry_policy: Arc<dyn RetryPolicy>,
    /// Factory for per-part decrypter chains
    pub merger_factory: Arc<dyn MergerFactory>,
}

/// Orchestrator of one transfer's download: worker pool, ordered merge stage,
/// and shared error propagation.
///
/// Each transfer owns an independent downloader; the only cross-transfer
/// shared state is the caches.
pub struct FileDownloader {
    definition: Arc<TransferDefinition>,
    coordinator: Arc<PartsCoordinator>,
    errors: Arc<ErrorManager>,
    target: Arc<TransferTarget>,
    event_tx: broadcast::Sender<Event>,
    worker_handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    merge_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl FileDownloader {
    /// Build the pipeline for `definition` and start its workers.
    ///
    /// Spawns `min(download_worker_cap, 2 × available cores)` download
    /// workers plus the dedicated merge task. Parts start flowing as soon as
    /// [`announce_part_available`] is called.
    ///
    /// [`announce_part_available`]: FileDownloader::announce_part_available
    pub async fn start(
        config: &Config,
        definition: Arc<TransferDefinition>,
        target_builder: &DownloadTargetBuilder,
        services: DownloadServices,
    ) -> Result<Self> {
        config.validate()?;
        let target = target_builder.build_target(&definition).await?;

        let queue = Arc::new(PartQueue::new());
        let merge_channel = Arc::new(MergeChannel::new());
        let in_flight = Arc::new(Semaphore::new(config.transfer.in_flight_part_limit));
        let cancel_token = CancellationToken::new();
        let errors = Arc::new(ErrorManager::new(
            Arc::clone(&queue),
            Arc::clone(&merge_channel),
            Arc::clone(&in_flight),
            cancel_token,
        ));
        let coordinator = Arc::new(PartsCoordinator::new(
            definition.transfer_id,
            Arc::clone(&queue),
            Arc::clone(&merge_channel),
        ));
        let (event_tx, _rx) = broadcast::channel(256);

        let merge_rx = merge_channel
            .take_receiver()
            .ok_or_else(|| Error::Other("merge channel receiver already taken".to_string()))?;
        let merger = FileMerger::new(
            definition.transfer_id,
            Arc::clone(&target),
            Arc::clone(&services.merger_factory),
            Arc::clone(&errors),
        );
        let merge_handle = tokio::spawn(run_merge_task(
            merge_rx,
            merger,
            Arc::clone(&in_flight),
            event_tx.clone(),
            Arc::clone(&definition),
        ));

        let worker_count = config.transfer.download_workers();
        tracing::info!(
            transfer_id = %definition.transfer_id,
            workers = worker_count,
            "Starting download pipeline"
        );

        let ctx = DownloadWorkerContext {
            definition: Arc::clone(&definition),
            queue,
            in_flight,
            errors: Arc::clone(&errors),
            coordinator: Arc::clone(&coordinator),
            coordination: services.coordination,
            providers: services.providers,
            retry_policy: services.retry_policy,
            target: Arc::clone(&target),
            event_tx: event_tx.clone(),
        };
        let worker_handles = (0..worker_count)
            .map(|i| tokio::spawn(run_download_worker(ctx.clone(), i)))
            .collect();

        Ok(Self {
            definition,
            coordinator,
            errors,
            target,
            event_tx,
            worker_handles: Mutex::new(worker_handles),
            merge_handle: Mutex::new(Some(merge_handle)),
        })
    }

    /// Announce that part `n` is available on remote storage.
    ///
    /// Fails with [`Error::QueueClosed`] once the transfer is poisoned or all
    /// parts of a known total were already announced.
    pub fn announce_part_available(&self, n: PartNumber) -> Result<()> {
        let queued = self.coordinator.announce_part_available(n)?;
        for part_number in queued {
            self.event_tx
                .send(Event::PartQueued {
                    transfer_id: self.definition.transfer_id,
                    part_number,
                })
                .ok();
        }
        Ok(())
    }

    /// Announce the transfer's total part count.
    pub fn announce_total_parts(&self, total: u32) -> Result<()> {
        self.coordinator.announce_total_parts(total)
    }

    /// Subscribe to this transfer's events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The resolved transfer target.
    pub fn target(&self) -> &Arc<TransferTarget> {
        &self.target
    }

    /// The definition this downloader serves.
    pub fn definition(&self) -> &Arc<TransferDefinition> {
        &self.definition
    }

    /// Whether the transfer has been poisoned.
    pub fn is_failed(&self) -> bool {
        self.errors.is_poisoned()
    }

    /// Wait for the whole pipeline to finish: all download workers first,
    /// then the merge task.
    ///
    /// Raises one aggregate error naming the transfer when poisoned.
    pub async fn wait_for_completion(&self) -> Result<()> {
        let workers: Vec<_> = {
            let mut handles = self
                .worker_handles
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            handles.drain(..).collect()
        };
        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                tracing::error!(
                    transfer_id = %self.definition.transfer_id,
                    error = %e,
                    "Download worker panicked"
                );
                self.errors.poison("download worker panicked");
            }
        }

        let merge = self
            .merge_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = merge
            && let Err(e) = handle.await
        {
            tracing::error!(
                transfer_id = %self.definition.transfer_id,
                error = %e,
                "Merge task panicked"
            );
            self.errors.poison("merge task panicked");
        }

        if let Some(reason) = self.errors.first_error() {
            self.event_tx
                .send(Event::TransferFailed {
                    transfer_id: self.definition.transfer_id,
                    error: reason.clone(),
                })
                .ok();
            return Err(Error::Download(DownloadError::TransferFailed {
                transfer_id: self.definition.transfer_id,
                reason,
            }));
        }

        let total_parts = self.coordinator.total_parts().unwrap_or(0);
        self.event_tx
            .send(Event::TransferComplete {
                transfer_id: self.definition.transfer_id,
                total_parts,
            })
            .ok();
        Ok(())
    }
}

/// Session-scoped cache of running downloaders, keyed by definition identity.
#[derive(Default)]
pub struct DownloaderCache {
    downloaders: Mutex<HashMap<TransferKey, Arc<FileDownloader>>>,
}

impl DownloaderCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the downloader for a definition.
    pub fn get(&self, key: &TransferKey) -> Option<Arc<FileDownloader>> {
        self.downloaders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Cache a downloader, returning the one that ends up cached (an earlier
    /// entry for the same definition wins).
    pub fn insert(&self, downloader: Arc<FileDownloader>) -> Arc<FileDownloader> {
        self.downloaders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(downloader.definition.key())
            .or_insert(downloader)
            .clone()
    }

    /// Remove one transfer's downloader.
    pub fn remove(&self, key: &TransferKey) -> Option<Arc<FileDownloader>> {
        self.downloaders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
    }
}

impl SessionScoped for DownloaderCache {
    fn invalidate(&self) {
        let evicted: Vec<Arc<FileDownloader>> = {
            let mut downloaders = self.downloaders.lock().unwrap_or_else(|e| e.into_inner());
            downloaders.drain().map(|(_, d)| d).collect()
        };
        for downloader in &evicted {
            // Discard buffered parts; a transfer evicted mid-flight is
            // poisoned so its workers stop promptly.
            downloader.errors.poison("session reset");
            downloader.target.clear_buffers();
        }
        if !evicted.is_empty() {
            tracing::debug!(count = evicted.len(), "Evicted cached downloaders");
        }
    }
}
