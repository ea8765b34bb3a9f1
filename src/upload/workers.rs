//! Upload worker pool: a fixed set of tasks competing for slices on one
//! shared channel receiver.

use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, mpsc};

use super::progress::UploadProgress;
use crate::coordination::CoordinationApi;
use crate::error::{Error, Result};
use crate::provider::ProviderRegistry;
use crate::retry::{RetryOperation, RetryPolicy};
use crate::types::{Event, PartOperation, Slice, TransferDefinition};

/// Everything an upload worker needs, cloned per task.
#[derive(Clone)]
pub(crate) struct UploadWorkerContext {
    pub(crate) definition: Arc<TransferDefinition>,
    pub(crate) slices: Arc<Mutex<mpsc::Receiver<Slice>>>,
    pub(crate) progress: Arc<UploadProgress>,
    pub(crate) coordination: Arc<dyn CoordinationApi>,
    pub(crate) providers: ProviderRegistry,
    pub(crate) retry_policy: Arc<dyn RetryPolicy>,
    pub(crate) event_tx: broadcast::Sender<Event>,
}

/// One upload worker: pull slices until the channel is drained and closed.
///
/// A worker that fails captures the error and exits; the remaining workers
/// keep draining whatever the slicer already produced until they too observe
/// the stop conditions. When a worker sees the closed channel it checks
/// whether every produced slice has been uploaded and, if so, signals
/// completion.
pub(crate) async fn run_upload_worker(ctx: UploadWorkerContext, worker_index: usize) {
    tracing::debug!(
        transfer_id = %ctx.definition.transfer_id,
        worker = worker_index,
        "Upload worker started"
    );

    loop {
        let slice = {
            let mut receiver = ctx.slices.lock().await;
            receiver.recv().await
        };
        let Some(slice) = slice else {
            break;
        };

        let part_number = slice.part_number;
        ctx.progress.begin_upload();
        match upload_slice(&ctx, slice).await {
            Ok(()) => {
                ctx.progress.finish_upload();
                ctx.event_tx
                    .send(Event::SliceUploaded {
                        transfer_id: ctx.definition.transfer_id,
                        part_number,
                    })
                    .ok();
            }
            Err(e) => {
                tracing::error!(
                    transfer_id = %ctx.definition.transfer_id,
                    part = part_number,
                    worker = worker_index,
                    error = %e,
                    "Slice upload failed"
                );
                ctx.progress
                    .fail_upload(format!("upload of slice {part_number} failed: {e}"));
                return;
            }
        }
    }

    ctx.progress.signal_if_complete();
    tracing::debug!(
        transfer_id = %ctx.definition.transfer_id,
        worker = worker_index,
        "Upload worker stopped"
    );
}

/// Upload one slice: resolve its location, push it under the retry policy,
/// and confirm it remotely.
async fn upload_slice(ctx: &UploadWorkerContext, slice: Slice) -> Result<()> {
    let operation = PartOperation {
        session_id: ctx.definition.session_id,
        transfer_id: ctx.definition.transfer_id,
        part_number: slice.part_number,
        total_parts: None,
        provider: None,
    };
    let location = ctx.coordination.resolve_upload_location(&operation).await?;
    let strategy = ctx.providers.resolve(location.provider)?;
    let cancel_token = ctx.progress.cancel_token().clone();
    let data = Arc::new(slice.data);

    let attempt: RetryOperation<'_> = Box::new(move || {
        let strategy = Arc::clone(&strategy);
        let location = location.clone();
        let cancel_token = cancel_token.clone();
        let data = Arc::clone(&data);
        Box::pin(async move {
            let result = strategy.upload(&data, &location, &cancel_token).await?;
            if !result.success {
                return Err(Error::Provider {
                    provider: location.provider,
                    message: result
                        .message
                        .unwrap_or_else(|| "upload rejected".to_string()),
                });
            }
            Ok(Vec::new())
        })
    });
    ctx.retry_policy.execute(attempt).await?;

    ctx.coordination.confirm_part_uploaded(&operation).await?;
    Ok(())
}
