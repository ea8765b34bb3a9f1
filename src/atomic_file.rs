//! Atomic file replacement for "full" synchronization destinations
//!
//! An [`AtomicReplaceFile`] stages new content at a temporary path next to
//! its destination, then swaps it into place with a backup of the original,
//! so a failed finalization can roll back that one destination without
//! touching the others.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result, TargetError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplaceState {
    Staging,
    Committed,
    RolledBack,
}

/// Write-to-temp + validate/commit + rollback manager for one destination file.
#[derive(Debug)]
pub struct AtomicReplaceFile {
    destination: PathBuf,
    temp_path: PathBuf,
    backup_path: PathBuf,
    state: ReplaceState,
}

impl AtomicReplaceFile {
    /// Create a manager for `destination`.
    ///
    /// The staging and backup paths live in the destination's directory so
    /// the final rename never crosses a filesystem boundary.
    pub fn new(destination: PathBuf) -> Self {
        let suffix: u32 = rand::random();
        let name = destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let dir = destination.parent().unwrap_or(Path::new(".")).to_path_buf();
        Self {
            temp_path: dir.join(format!(".{name}.staging-{suffix:08x}")),
            backup_path: dir.join(format!(".{name}.backup-{suffix:08x}")),
            destination,
            state: ReplaceState::Staging,
        }
    }

    /// The staging path new content must be written to.
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// The destination this manager replaces.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Whether the destination was replaced.
    pub fn is_committed(&self) -> bool {
        self.state == ReplaceState::Committed
    }

    /// Validate the staged content and swap it into place.
    ///
    /// Validation rejects a missing or empty staging file. The original
    /// destination (if any) is kept as a backup until the swap succeeds, so
    /// a failed rename restores it. No-op when already committed.
    pub async fn validate_commit(&mut self) -> Result<()> {
        if self.state == ReplaceState::Committed {
            return Ok(());
        }

        let staged = tokio::fs::metadata(&self.temp_path).await.map_err(|e| {
            Error::Target(TargetError::ValidationFailed {
                path: self.destination.clone(),
                reason: format!("staging file missing: {e}"),
            })
        })?;
        if staged.len() == 0 {
            return Err(Error::Target(TargetError::ValidationFailed {
                path: self.destination.clone(),
                reason: "staging file is empty".to_string(),
            }));
        }

        let had_original = tokio::fs::metadata(&self.destination).await.is_ok();
        if had_original {
            tokio::fs::rename(&self.destination, &self.backup_path)
                .await
                .map_err(|e| {
                    Error::Target(TargetError::FinalizeFailed {
                        path: self.destination.clone(),
                        reason: format!("failed to back up original: {e}"),
                    })
                })?;
        }

        if let Err(e) = tokio::fs::rename(&self.temp_path, &self.destination).await {
            // Put the original back before reporting the failure
            if had_original
                && let Err(restore_err) =
                    tokio::fs::rename(&self.backup_path, &self.destination).await
            {
                tracing::error!(
                    destination = %self.destination.display(),
                    error = %restore_err,
                    "Failed to restore original after aborted swap"
                );
            }
            return Err(Error::Target(TargetError::FinalizeFailed {
                path: self.destination.clone(),
                reason: format!("failed to move staged content into place: {e}"),
            }));
        }

        if had_original {
            // Backup removal is cleanup only; the swap already succeeded
            if let Err(e) = tokio::fs::remove_file(&self.backup_path).await {
                tracing::warn!(
                    backup = %self.backup_path.display(),
                    error = %e,
                    "Failed to remove backup file"
                );
            }
        }

        self.state = ReplaceState::Committed;
        Ok(())
    }

    /// Best-effort rollback: discard staged content and restore the backup.
    ///
    /// Idempotent; a no-op after a successful commit.
    pub async fn rollback(&mut self) {
        if self.state != ReplaceState::Staging {
            return;
        }

        if let Err(e) = tokio::fs::remove_file(&self.temp_path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(
                temp = %self.temp_path.display(),
                error = %e,
                "Failed to remove staging file during rollback"
            );
        }

        if tokio::fs::metadata(&self.backup_path).await.is_ok()
            && let Err(e) = tokio::fs::rename(&self.backup_path, &self.destination).await
        {
            tracing::error!(
                destination = %self.destination.display(),
                error = %e,
                "Failed to restore backup during rollback"
            );
        }

        self.state = ReplaceState::RolledBack;
    }
}
