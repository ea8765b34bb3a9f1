//! Core value types shared across the transfer engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::SystemTime;

/// Identifier of a synchronization session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct SessionId(pub i64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one transfer within a session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct TransferId(pub i64);

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an action group (one planned copy/delta operation on a
/// logical file, with one or more final destinations).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct ActionGroupId(pub i64);

impl std::fmt::Display for ActionGroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One numbered, independently transmitted chunk of an encrypted file.
///
/// Part numbers start at 1 and are contiguous within a transfer.
pub type PartNumber = u32;

/// Cloud object-storage vendor backing a part's location.
///
/// Used as the key into the provider strategy registry; the engine never
/// speaks a provider's wire protocol itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Amazon S3 or S3-compatible storage
    S3,
    /// Azure Blob Storage
    AzureBlob,
    /// Google Cloud Storage
    GoogleCloud,
    /// OpenStack Swift
    Swift,
}

/// How a synchronization payload is packaged on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    /// A single encrypted file
    MonoFile,
    /// Several files packed into one encrypted zip archive
    MultiFileZip,
}

/// Whether a synchronization payload carries whole files or binary deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Full file content; destinations are replaced atomically
    Full,
    /// Binary delta to apply against the existing destination content
    Delta,
}

/// What a transfer carries, which determines where it lands on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    /// Inventory snapshot of the session's file tree
    Inventory,
    /// Sync-start payload exchanged when a member joins a round
    SyncStart,
    /// Profile bundle (client settings and keys)
    ProfileBundle,
    /// Synchronization payload carrying one or more action groups
    Synchronization {
        /// Packaging of the payload
        format: PayloadFormat,
        /// Full-content or delta semantics
        mode: SyncMode,
    },
}

/// Identity key of a transfer: session id + transfer id.
///
/// Definitions compare and hash by this key, never by content, so mutable
/// preparation fields (IV, declared length) don't disturb cache lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferKey {
    /// Owning session
    pub session_id: SessionId,
    /// Transfer within the session
    pub transfer_id: TransferId,
}

/// Identity and shape of one transfer.
///
/// Created once before the transfer starts. The encryption IV and declared
/// byte length are write-once: they are set during upload preparation and
/// immutable afterwards.
#[derive(Debug)]
pub struct TransferDefinition {
    /// Session this transfer belongs to
    pub session_id: SessionId,
    /// Unique transfer id within the session
    pub transfer_id: TransferId,
    /// What the transfer carries
    pub kind: TransferKind,
    /// Action groups carried by a synchronization payload (empty otherwise)
    pub action_group_ids: Vec<ActionGroupId>,
    iv: OnceLock<Vec<u8>>,
    declared_length: OnceLock<u64>,
}

impl TransferDefinition {
    /// Create a definition with no action groups (inventory, sync-start,
    /// profile-bundle payloads).
    pub fn new(session_id: SessionId, transfer_id: TransferId, kind: TransferKind) -> Self {
        Self::with_action_groups(session_id, transfer_id, kind, Vec::new())
    }

    /// Create a definition carrying the given action groups.
    pub fn with_action_groups(
        session_id: SessionId,
        transfer_id: TransferId,
        kind: TransferKind,
        action_group_ids: Vec<ActionGroupId>,
    ) -> Self {
        Self {
            session_id,
            transfer_id,
            kind,
            action_group_ids,
            iv: OnceLock::new(),
            declared_length: OnceLock::new(),
        }
    }

    /// Identity key used for caching and equality.
    pub fn key(&self) -> TransferKey {
        TransferKey {
            session_id: self.session_id,
            transfer_id: self.transfer_id,
        }
    }

    /// Record the encryption IV chosen during upload preparation.
    ///
    /// Write-once; returns the rejected value if the IV was already set.
    pub fn set_iv(&self, iv: Vec<u8>) -> Result<(), Vec<u8>> {
        self.iv.set(iv)
    }

    /// The encryption IV, if preparation has run.
    pub fn iv(&self) -> Option<&[u8]> {
        self.iv.get().map(|v| v.as_slice())
    }

    /// Record the declared byte length chosen during upload preparation.
    ///
    /// Write-once; returns the rejected value if the length was already set.
    pub fn set_declared_length(&self, length: u64) -> Result<(), u64> {
        self.declared_length.set(length)
    }

    /// The declared byte length of the source, if preparation has run.
    pub fn declared_length(&self) -> Option<u64> {
        self.declared_length.get().copied()
    }
}

impl PartialEq for TransferDefinition {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for TransferDefinition {}

impl std::hash::Hash for TransferDefinition {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

/// Upload-side term for a part: the part number plus its encrypted bytes,
/// produced once by the slicer and consumed exactly once by a worker.
#[derive(Debug, Clone)]
pub struct Slice {
    /// 1-based part number
    pub part_number: PartNumber,
    /// Encrypted payload bytes
    pub data: Vec<u8>,
}

/// Value describing one remote coordination call for a single part.
///
/// Immutable; constructed fresh per call.
#[derive(Debug, Clone)]
pub struct PartOperation {
    /// Owning session
    pub session_id: SessionId,
    /// Transfer the part belongs to
    pub transfer_id: TransferId,
    /// 1-based part number
    pub part_number: PartNumber,
    /// Total parts in the transfer, when already known
    pub total_parts: Option<u32>,
    /// Storage provider, when already resolved
    pub provider: Option<Provider>,
}

/// A part's resolved storage location: which provider holds it and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartLocation {
    /// Provider whose strategy must be used for the call
    pub provider: Provider,
    /// Provider-specific locator (pre-signed URL, object key, ...)
    pub locator: String,
}

/// Final destinations and preserved metadata for one action group.
#[derive(Debug, Clone)]
pub struct ActionGroupDestinations {
    /// Every final destination path the group's content must land at
    pub final_paths: Vec<PathBuf>,
    /// Original modification time to restore, when the action preserves it
    pub original_modified: Option<SystemTime>,
}

/// Events emitted by the engine. Consumers subscribe via the orchestrators;
/// events are dropped silently when nobody is listening.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A part was announced and queued for download
    PartQueued {
        /// Transfer the part belongs to
        transfer_id: TransferId,
        /// 1-based part number
        part_number: PartNumber,
    },
    /// A part finished downloading (not yet merged)
    PartDownloaded {
        /// Transfer the part belongs to
        transfer_id: TransferId,
        /// 1-based part number
        part_number: PartNumber,
    },
    /// A part was merged and decrypted into the target
    PartMerged {
        /// Transfer the part belongs to
        transfer_id: TransferId,
        /// 1-based part number
        part_number: PartNumber,
    },
    /// A slice finished uploading and was confirmed
    SliceUploaded {
        /// Transfer the slice belongs to
        transfer_id: TransferId,
        /// 1-based part number
        part_number: PartNumber,
    },
    /// The whole transfer completed successfully
    TransferComplete {
        /// Completed transfer
        transfer_id: TransferId,
        /// Total parts moved
        total_parts: u32,
    },
    /// The transfer was poisoned and will not complete
    TransferFailed {
        /// Failed transfer
        transfer_id: TransferId,
        /// Human-readable failure summary
        error: String,
    },
}
