//! Download worker loops and the dedicated merge task.

use std::sync::Arc;
use tokio::sync::{Semaphore, broadcast, mpsc};

use super::error_manager::ErrorManager;
use super::merger::FileMerger;
use super::parts::PartsCoordinator;
use super::queue::PartQueue;
use super::target::TransferTarget;
use crate::coordination::CoordinationApi;
use crate::error::Result;
use crate::provider::ProviderRegistry;
use crate::retry::{RetryOperation, RetryPolicy};
use crate::types::{Event, PartNumber, PartOperation, TransferDefinition};

/// Everything a download worker needs, cloned per task (all fields are
/// cheap Arc clones).
#[derive(Clone)]
pub(crate) struct DownloadWorkerContext {
    pub(crate) definition: Arc<TransferDefinition>,
    pub(crate) queue: Arc<PartQueue<PartNumber>>,
    pub(crate) in_flight: Arc<Semaphore>,
    pub(crate) errors: Arc<ErrorManager>,
    pub(crate) coordinator: Arc<PartsCoordinator>,
    pub(crate) coordination: Arc<dyn CoordinationApi>,
    pub(crate) providers: ProviderRegistry,
    pub(crate) retry_policy: Arc<dyn RetryPolicy>,
    pub(crate) target: Arc<TransferTarget>,
    pub(crate) event_tx: broadcast::Sender<Event>,
}

impl DownloadWorkerContext {
    fn emit(&self, event: Event) {
        // send() fails when nobody subscribed, which is fine
        self.event_tx.send(event).ok();
    }

    fn part_operation(&self, part_number: PartNumber) -> PartOperation {
        PartOperation {
            session_id: self.definition.session_id,
            transfer_id: self.definition.transfer_id,
            part_number,
            total_parts: self.coordinator.total_parts(),
            provider: None,
        }
    }
}

/// One download worker: pull part numbers until the queue drains or the
/// transfer is poisoned.
///
/// A semaphore slot is held per part from here until the merge task consumed
/// it, bounding how many parts sit in memory between the two stages.
pub(crate) async fn run_download_worker(ctx: DownloadWorkerContext, worker_index: usize) {
    tracing::debug!(
        transfer_id = %ctx.definition.transfer_id,
        worker = worker_index,
        "Download worker started"
    );

    while let Some(part_number) = ctx.queue.pop().await {
        // The permit is returned by the merge task, not this worker; poison
        // closes the semaphore, so a blocked acquire wakes with an error.
        match ctx.in_flight.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => break,
        }

        if ctx.errors.is_poisoned() {
            break;
        }

        if let Err(e) = download_part(&ctx, part_number).await {
            tracing::error!(
                transfer_id = %ctx.definition.transfer_id,
                part = part_number,
                worker = worker_index,
                error = %e,
                "Part download failed"
            );
            ctx.errors
                .poison(format!("download of part {part_number} failed: {e}"));
            break;
        }
    }

    tracing::debug!(
        transfer_id = %ctx.definition.transfer_id,
        worker = worker_index,
        "Download worker stopped"
    );
}

/// Download one part: resolve its location, fetch it under the retry policy,
/// confirm it remotely, and feed the coordinator's bookkeeping.
async fn download_part(ctx: &DownloadWorkerContext, part_number: PartNumber) -> Result<()> {
    let operation = ctx.part_operation(part_number);
    let location = ctx.coordination.resolve_download_location(&operation).await?;
    let strategy = ctx.providers.resolve(location.provider)?;
    let cancel_token = ctx.errors.cancel_token().clone();

    let attempt: RetryOperation<'_> = Box::new(move || {
        let strategy = Arc::clone(&strategy);
        let location = location.clone();
        let cancel_token = cancel_token.clone();
        Box::pin(async move { strategy.download(&location, &cancel_token).await })
    });
    let data = ctx.retry_policy.execute(attempt).await?;

    ctx.target.store_part(part_number, data);
    ctx.coordination.confirm_part_downloaded(&operation).await?;

    ctx.emit(Event::PartDownloaded {
        transfer_id: ctx.definition.transfer_id,
        part_number,
    });

    // Hands the mergeable prefix to the merge stage
    ctx.coordinator.register_downloaded(part_number)?;
    Ok(())
}

/// The dedicated merge task: drain the merge channel in order, returning one
/// in-flight slot per merged part.
pub(crate) async fn run_merge_task(
    mut merge_rx: mpsc::UnboundedReceiver<PartNumber>,
    merger: FileMerger,
    in_flight: Arc<Semaphore>,
    event_tx: broadcast::Sender<Event>,
    definition: Arc<TransferDefinition>,
) {
    while let Some(part_number) = merge_rx.recv().await {
        match merger.merge(part_number).await {
            Ok(()) => {
                // Release the slot the download stage held for this part
                in_flight.add_permits(1);
                event_tx
                    .send(Event::PartMerged {
                        transfer_id: definition.transfer_id,
                        part_number,
                    })
                    .ok();
            }
            Err(_) => {
                // merge() already poisoned the transfer; stop consuming
                break;
            }
        }
    }

    tracing::debug!(transfer_id = %definition.transfer_id, "Merge task stopped");
}
