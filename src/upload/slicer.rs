//! The single slice producer: pulls encrypted slices out of the encrypter and
//! feeds the bounded worker channel.

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use super::progress::UploadProgress;
use crate::crypto::SliceEncrypter;
use crate::types::{Event, Slice, TransferDefinition};

/// Run the slicing loop until the source is exhausted, a worker captured an
/// error, or slicing itself fails.
///
/// Backpressure comes from the bounded channel: with all workers busy and the
/// channel full, `send` suspends and no further slice is produced. The sender
/// is dropped on return, which is what lets the workers observe end-of-input.
pub(crate) async fn run_slicer(
    encrypter: &mut Box<dyn SliceEncrypter>,
    tx: mpsc::Sender<Slice>,
    progress: &Arc<UploadProgress>,
    event_tx: &broadcast::Sender<Event>,
    definition: &TransferDefinition,
) {
    loop {
        if progress.has_error() {
            tracing::debug!(
                transfer_id = %definition.transfer_id,
                "Slicer stopping after captured upload error"
            );
            break;
        }

        match encrypter.slice_and_encrypt().await {
            Ok(Some(slice)) => {
                let part_number = slice.part_number;
                progress.record_created();
                event_tx
                    .send(Event::PartQueued {
                        transfer_id: definition.transfer_id,
                        part_number,
                    })
                    .ok();
                if tx.send(slice).await.is_err() {
                    // All workers exited; whatever made them exit is already
                    // captured in the progress state.
                    tracing::debug!(
                        transfer_id = %definition.transfer_id,
                        part = part_number,
                        "Slice channel closed, slicer stopping"
                    );
                    break;
                }
            }
            Ok(None) => {
                tracing::debug!(
                    transfer_id = %definition.transfer_id,
                    "Source exhausted, slicer done"
                );
                break;
            }
            Err(e) => {
                tracing::error!(
                    transfer_id = %definition.transfer_id,
                    error = %e,
                    "Slicing failed"
                );
                progress.capture_error(format!("slicing failed: {e}"));
                break;
            }
        }
    }
}
