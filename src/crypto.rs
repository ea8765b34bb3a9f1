//! Cryptographic collaborator seams
//!
//! The crypto itself lives outside this crate. The engine drives a slicer/
//! encrypter on the upload side and a (possibly chained) merger/decrypter on
//! the download side, plus a binary-delta codec for delta synchronization.
//! Implementations are stateful across calls: slices come out strictly
//! sequential and parts must be merged strictly in order.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncRead;

use crate::error::Result;
use crate::types::{PartNumber, Slice, TransferDefinition};

/// Source of an upload: a file on disk or an opaque byte stream.
///
/// Only the file variant carries a path; error messages for stream uploads
/// name "a stream" instead.
pub enum UploadSource {
    /// A file on the local filesystem
    File(PathBuf),
    /// An arbitrary readable byte stream
    Stream(Box<dyn AsyncRead + Send + Unpin>),
}

impl UploadSource {
    /// Human-readable description used in aggregate upload errors.
    pub fn describe(&self) -> String {
        match self {
            UploadSource::File(path) => path.display().to_string(),
            UploadSource::Stream(_) => "a stream".to_string(),
        }
    }
}

impl std::fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadSource::File(path) => f.debug_tuple("File").field(path).finish(),
            UploadSource::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Slicer/encrypter driven by the upload pipeline (single producer).
///
/// `slice_and_encrypt` returns `None` once the source is exhausted. The
/// engine calls `dispose` exactly once when the upload settles, success or
/// not.
#[async_trait]
pub trait SliceEncrypter: Send {
    /// Bind the encrypter to its source and transfer definition.
    ///
    /// Implementations record the chosen IV and declared length on the
    /// definition during this call (both are write-once).
    async fn initialize(
        &mut self,
        source: UploadSource,
        definition: &TransferDefinition,
    ) -> Result<()>;

    /// Cap the length of produced slices in bytes.
    fn set_max_slice_length(&mut self, max_slice_length: usize);

    /// Produce the next encrypted slice, or `None` at end of input.
    async fn slice_and_encrypt(&mut self) -> Result<Option<Slice>>;

    /// Release held resources. Idempotent.
    fn dispose(&mut self);
}

/// One link of the merger/decrypter chain for a single part.
///
/// Links are invoked in registration order; data flows through the chain
/// internally (decorator style), the engine only sequences the calls and
/// guarantees disposal.
#[async_trait]
pub trait MergerDecrypter: Send {
    /// Merge and decrypt this link's share of the part.
    async fn merge_and_decrypt(&mut self) -> Result<()>;

    /// Release held resources. Idempotent; called even when an earlier link
    /// of the chain failed.
    fn dispose(&mut self);
}

/// Factory producing the decrypter chain for one downloaded part.
///
/// Constructed per transfer with whatever landing paths and key material the
/// chain needs; the engine hands it the part number and the encrypted bytes.
pub trait MergerFactory: Send + Sync {
    /// Build the chain for `part_number` over its encrypted buffer.
    fn create_chain(
        &self,
        part_number: PartNumber,
        data: Vec<u8>,
    ) -> Result<Vec<Box<dyn MergerDecrypter>>>;
}

/// Binary-delta codec used by the synchronization finalizer.
#[async_trait]
pub trait DeltaApplier: Send + Sync {
    /// Apply the delta at `delta_path` against `destination` in place.
    async fn apply(&self, delta_path: &Path, destination: &Path) -> Result<()>;
}
