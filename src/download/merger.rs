//! The file merger: runs the decrypter chain over each part, strictly in
//! part order.

use std::sync::Arc;

use super::error_manager::ErrorManager;
use super::target::TransferTarget;
use crate::crypto::MergerFactory;
use crate::error::{DownloadError, Error, Result};
use crate::types::{PartNumber, TransferId};

/// Single consumer of the merge channel.
///
/// Failures here may be security relevant (wrong key, tampered ciphertext);
/// they poison the transfer and surface only as a generic merge error.
pub(crate) struct FileMerger {
    transfer_id: TransferId,
    target: Arc<TransferTarget>,
    factory: Arc<dyn MergerFactory>,
    errors: Arc<ErrorManager>,
}

impl FileMerger {
    pub(crate) fn new(
        transfer_id: TransferId,
        target: Arc<TransferTarget>,
        factory: Arc<dyn MergerFactory>,
        errors: Arc<ErrorManager>,
    ) -> Self {
        Self {
            transfer_id,
            target,
            factory,
            errors,
        }
    }

    /// Merge and decrypt one part.
    ///
    /// Every link of the chain is invoked exactly once in registration order
    /// and disposed even when an earlier link fails. The part's buffer is
    /// released from the target; on failure the transfer is poisoned and a
    /// generic error is returned.
    pub(crate) async fn merge(&self, part_number: PartNumber) -> Result<()> {
        match self.merge_inner(part_number).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // The underlying detail stays in the log; callers only see
                // the generic wrapper.
                tracing::error!(
                    transfer_id = %self.transfer_id,
                    part = part_number,
                    error = %e,
                    "Part merge failed"
                );
                self.errors
                    .poison(format!("merging of part {part_number} failed"));
                Err(Error::Download(DownloadError::MergeFailed {
                    transfer_id: self.transfer_id,
                }))
            }
        }
    }

    async fn merge_inner(&self, part_number: PartNumber) -> Result<()> {
        let data = self.target.take_part(part_number).ok_or(Error::Download(
            DownloadError::MissingPartBuffer { part_number },
        ))?;

        let mut chain = self.factory.create_chain(part_number, data)?;

        let mut first_error: Option<Error> = None;
        for link in chain.iter_mut() {
            if let Err(e) = link.merge_and_decrypt().await {
                first_error.get_or_insert(e);
            }
        }
        // Disposal is unconditional: a failed link must not leak the
        // resources of the links behind it.
        for link in chain.iter_mut() {
            link.dispose();
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
