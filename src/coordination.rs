//! Remote coordination API seam
//!
//! The coordination service knows which part exists where, hands out
//! locations, and records transfer progress server-side. All calls may fail;
//! a failed call is a part-level error that escalates through the usual
//! poison path.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{PartLocation, PartOperation, TransferId};

/// Remote coordination API consumed by both pipelines.
///
/// Confirmation calls are idempotent on the server side; the engine may
/// repeat them after retried attempts without corrupting remote state.
#[async_trait]
pub trait CoordinationApi: Send + Sync {
    /// Resolve where one part must be downloaded from.
    async fn resolve_download_location(&self, operation: &PartOperation) -> Result<PartLocation>;

    /// Resolve where one slice must be uploaded to.
    async fn resolve_upload_location(&self, operation: &PartOperation) -> Result<PartLocation>;

    /// Confirm that a part was downloaded and merged into the client's copy.
    async fn confirm_part_downloaded(&self, operation: &PartOperation) -> Result<()>;

    /// Confirm that a slice was uploaded and is available to other members.
    async fn confirm_part_uploaded(&self, operation: &PartOperation) -> Result<()>;

    /// Assert that the whole transfer finished with `total_parts` parts.
    async fn assert_transfer_finished(
        &self,
        transfer_id: TransferId,
        total_parts: u32,
    ) -> Result<()>;
}
