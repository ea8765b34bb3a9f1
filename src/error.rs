//! Error types for sync-transfer
//!
//! This module provides the error handling for the engine:
//! - Domain-specific error types (Download, Upload, Target)
//! - A single aggregate error per failed transfer, raised by the orchestrators
//! - Generic wrapping of merge/decrypt failures so no cryptographic detail
//!   leaks to callers

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::types::{ActionGroupId, PartNumber, Provider, TransferId};

/// Result type alias for sync-transfer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for sync-transfer
///
/// This is the primary error type used throughout the engine. Each variant
/// includes contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "transfer.temp_dir")
        key: Option<String>,
    },

    /// Download pipeline error
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Upload pipeline error
    #[error("upload error: {0}")]
    Upload(#[from] UploadError),

    /// Transfer target resolution or finalization error
    #[error("target error: {0}")]
    Target(#[from] TargetError),

    /// Storage provider call failed (download or upload of one part)
    #[error("provider {provider:?} error: {message}")]
    Provider {
        /// Provider whose strategy reported the failure
        provider: Provider,
        /// Status or message carried by the provider result
        message: String,
    },

    /// Remote coordination API call failed
    #[error("coordination error: {0}")]
    Coordination(String),

    /// The download queue was closed while a producer still held parts
    #[error("queue closed: no further parts are accepted")]
    QueueClosed,

    /// The transfer's cancellation token fired while a call was in flight
    #[error("transfer cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Zip archive error during multi-file payload finalization
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Download pipeline errors
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Aggregate failure raised once per poisoned transfer
    #[error("transfer {transfer_id} failed: {reason}")]
    TransferFailed {
        /// The transfer that was poisoned
        transfer_id: TransferId,
        /// First captured failure reason
        reason: String,
    },

    /// Merge/decrypt failure, deliberately generic
    ///
    /// Decryption failures can be security relevant; the underlying detail is
    /// logged but never carried in the error itself.
    #[error("merging of transfer {transfer_id} failed")]
    MergeFailed {
        /// The transfer whose part could not be merged
        transfer_id: TransferId,
    },

    /// A part number was announced twice with conflicting totals
    #[error("transfer {transfer_id}: total parts announced as {announced} but already known as {existing}")]
    TotalPartsConflict {
        /// The transfer with the conflicting announcement
        transfer_id: TransferId,
        /// Previously recorded total
        existing: u32,
        /// Conflicting newly announced total
        announced: u32,
    },

    /// A downloaded part has no buffer registered in the target
    #[error("part {part_number} has no downloaded buffer")]
    MissingPartBuffer {
        /// The part whose buffer was expected
        part_number: PartNumber,
    },
}

/// Upload pipeline errors
#[derive(Debug, Error)]
pub enum UploadError {
    /// Aggregate failure raised once per failed upload, naming the source
    #[error("upload of {source_name} for transfer {transfer_id} failed: {reason}")]
    SourceFailed {
        /// The source being uploaded ("a stream" or a file path)
        source_name: String,
        /// The transfer that failed
        transfer_id: TransferId,
        /// First captured failure reason
        reason: String,
    },

    /// The encrypter produced no slices at all for a non-empty source
    #[error("transfer {transfer_id}: slicer produced no slices")]
    EmptySource {
        /// The transfer whose source produced nothing
        transfer_id: TransferId,
    },
}

/// Transfer target resolution and finalization errors
#[derive(Debug, Error)]
pub enum TargetError {
    /// An action group id could not be resolved by the session repository
    #[error("action group {0} not found")]
    UnknownActionGroup(ActionGroupId),

    /// A synchronization payload declared no action groups
    #[error("transfer {0} is a synchronization payload with no action groups")]
    NoActionGroups(TransferId),

    /// A zip entry does not correspond to any action group of the transfer
    #[error("zip entry '{0}' does not match any action group")]
    UnknownZipEntry(String),

    /// Committing a destination failed validation (empty or missing temp file)
    #[error("validation failed for {path}: {reason}")]
    ValidationFailed {
        /// Destination whose staged content failed validation
        path: PathBuf,
        /// Why the staged content was rejected
        reason: String,
    },

    /// A destination write failed and was rolled back
    #[error("failed to finalize {path}: {reason}")]
    FinalizeFailed {
        /// The destination that was rolled back
        path: PathBuf,
        /// The underlying failure
        reason: String,
    },
}

/// Structured error detail for API-style consumers
///
/// A serializable snapshot of an [`Error`], pairing a machine-readable code
/// with the display message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "provider", "queue_closed")
    pub code: String,
    /// Human-readable message
    pub message: String,
}

impl Error {
    /// Machine-readable code for this error, stable across message changes.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config",
            Error::Download(_) => "download",
            Error::Upload(_) => "upload",
            Error::Target(_) => "target",
            Error::Provider { .. } => "provider",
            Error::Coordination(_) => "coordination",
            Error::QueueClosed => "queue_closed",
            Error::Cancelled => "cancelled",
            Error::Io(_) => "io",
            Error::Zip(_) => "archive",
            Error::Serialization(_) => "serialization",
            Error::Other(_) => "other",
        }
    }

    /// Snapshot this error into a serializable detail value.
    pub fn detail(&self) -> ErrorDetail {
        ErrorDetail {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}
