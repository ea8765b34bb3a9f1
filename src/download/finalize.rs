//! Synchronization download finalization: delta application, atomic
//! destination replacement, and timestamp restoration after a fully merged
//! download.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use super::target::TransferTarget;
use crate::atomic_file::AtomicReplaceFile;
use crate::config::TransferConfig;
use crate::crypto::DeltaApplier;
use crate::error::{Error, Result, TargetError};
use crate::types::{
    ActionGroupDestinations, ActionGroupId, PayloadFormat, SyncMode, TransferDefinition,
    TransferKind,
};

/// Applies a fully extracted synchronization payload to its final
/// destinations.
///
/// Runs only after the download pipeline completed without error. A failed
/// destination write is rolled back for that one destination and re-thrown;
/// other destinations keep whatever state they already reached.
pub struct SynchronizationFinalizer {
    temp_dir: PathBuf,
    delta_applier: Arc<dyn DeltaApplier>,
}

impl SynchronizationFinalizer {
    /// Create a finalizer over the given delta codec. Transient files are
    /// staged under the configured temp directory.
    pub fn new(config: TransferConfig, delta_applier: Arc<dyn DeltaApplier>) -> Self {
        Self {
            temp_dir: config.temp_dir,
            delta_applier,
        }
    }

    /// Apply the extracted payload to every final destination.
    ///
    /// Non-synchronization payloads need no finalization: their landing path
    /// already is the destination.
    pub async fn finalize(
        &self,
        definition: &TransferDefinition,
        target: &TransferTarget,
    ) -> Result<()> {
        let TransferKind::Synchronization { format, mode } = definition.kind else {
            return Ok(());
        };

        match format {
            PayloadFormat::MultiFileZip => self.finalize_zip(definition, target, mode).await,
            PayloadFormat::MonoFile => self.finalize_mono(definition, target, mode).await,
        }
    }

    /// Multi-file-zip payload: iterate entries, route each to its action
    /// group's destinations, then delete the transient zip.
    async fn finalize_zip(
        &self,
        definition: &TransferDefinition,
        target: &TransferTarget,
        mode: SyncMode,
    ) -> Result<()> {
        let zip_path = first_landing_path(target)?;
        let entries = read_zip_entries(zip_path.clone()).await?;
        let groups = target
            .action_groups()
            .ok_or_else(|| Error::Other("zip payload without action groups".to_string()))?;

        for (entry_name, content) in entries {
            let group = lookup_group(groups, &entry_name)?;
            match mode {
                SyncMode::Delta => {
                    self.apply_delta_to_group(definition, &entry_name, &content, group)
                        .await?;
                }
                SyncMode::Full => {
                    replace_group_destinations(&content, group).await?;
                }
            }
            restore_group_timestamps(group).await;
        }

        tokio::fs::remove_file(&zip_path).await?;
        tracing::info!(
            transfer_id = %definition.transfer_id,
            zip = %zip_path.display(),
            "Synchronization zip finalized and removed"
        );
        Ok(())
    }

    /// Mono-file payload: the single action group's content is already at
    /// the landing path(s); commit or delta-apply it.
    async fn finalize_mono(
        &self,
        definition: &TransferDefinition,
        target: &TransferTarget,
        mode: SyncMode,
    ) -> Result<()> {
        let groups = target
            .action_groups()
            .ok_or_else(|| Error::Other("mono payload without action groups".to_string()))?;
        let group_id = definition
            .action_group_ids
            .first()
            .ok_or(Error::Target(TargetError::NoActionGroups(
                definition.transfer_id,
            )))?;
        let group = groups
            .get(group_id)
            .ok_or(Error::Target(TargetError::UnknownActionGroup(*group_id)))?;

        match mode {
            SyncMode::Full => {
                // Parts were merged straight into the managers' staging
                // paths; all that remains is the swap.
                let managers = target
                    .with_replace_managers(std::mem::take)
                    .unwrap_or_default();
                commit_managers(managers).await?;
            }
            SyncMode::Delta => {
                let delta_path = first_landing_path(target)?;
                for destination in &group.final_paths {
                    self.delta_applier.apply(&delta_path, destination).await?;
                }
                tokio::fs::remove_file(&delta_path).await?;
            }
        }

        restore_group_timestamps(group).await;
        Ok(())
    }

    /// Stage a zip entry's delta to a transient file and apply it to every
    /// destination of its group.
    async fn apply_delta_to_group(
        &self,
        definition: &TransferDefinition,
        entry_name: &str,
        content: &[u8],
        group: &ActionGroupDestinations,
    ) -> Result<()> {
        let delta_path = self.temp_dir.join(format!(
            "transfer_{}_entry_{entry_name}.delta",
            definition.transfer_id
        ));
        tokio::fs::create_dir_all(&self.temp_dir).await?;
        tokio::fs::write(&delta_path, content).await?;

        let mut outcome = Ok(());
        for destination in &group.final_paths {
            if let Err(e) = self.delta_applier.apply(&delta_path, destination).await {
                outcome = Err(e);
                break;
            }
        }

        if let Err(e) = tokio::fs::remove_file(&delta_path).await {
            tracing::warn!(path = %delta_path.display(), error = %e, "Failed to remove transient delta");
        }
        outcome
    }
}

/// Commit every staged destination; a failed commit rolls back only that
/// destination and aborts with its error.
async fn commit_managers(mut managers: Vec<AtomicReplaceFile>) -> Result<()> {
    for manager in managers.iter_mut() {
        if let Err(e) = manager.validate_commit().await {
            tracing::error!(
                destination = %manager.destination().display(),
                error = %e,
                "Destination commit failed, rolling back"
            );
            manager.rollback().await;
            return Err(e);
        }
    }
    Ok(())
}

/// Extract a full-content entry into each destination via its own
/// atomic-replace manager.
async fn replace_group_destinations(content: &[u8], group: &ActionGroupDestinations) -> Result<()> {
    for destination in &group.final_paths {
        let mut manager = AtomicReplaceFile::new(destination.clone());
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(manager.temp_path(), content).await?;
        if let Err(e) = manager.validate_commit().await {
            manager.rollback().await;
            return Err(e);
        }
    }
    Ok(())
}

/// Restore the original modification time on every destination of a group.
///
/// Best-effort: a file that cannot be touched keeps its current timestamp.
async fn restore_group_timestamps(group: &ActionGroupDestinations) {
    let Some(modified) = group.original_modified else {
        return;
    };
    for destination in &group.final_paths {
        if let Err(e) = set_modified(destination.clone(), modified).await {
            tracing::warn!(
                destination = %destination.display(),
                error = %e,
                "Failed to restore original timestamp"
            );
        }
    }
}

async fn set_modified(path: PathBuf, modified: SystemTime) -> std::io::Result<()> {
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::options().write(true).open(&path)?;
        file.set_modified(modified)
    })
    .await
    .map_err(|e| std::io::Error::other(format!("timestamp task failed: {e}")))?
}

/// Read every zip entry into memory on the blocking pool.
///
/// Entries are small post-decryption payload files; the zip itself is
/// transient and bounded by the transfer's declared length.
async fn read_zip_entries(zip_path: PathBuf) -> Result<Vec<(String, Vec<u8>)>> {
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&zip_path)?;
        let mut archive = zip::ZipArchive::new(file)?;

        let mut entries = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let mut content = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut content)?;
            entries.push((name, content));
        }
        Ok(entries)
    })
    .await
    .map_err(|e| Error::Other(format!("zip read task failed: {e}")))?
}

fn first_landing_path(target: &TransferTarget) -> Result<PathBuf> {
    target
        .landing_paths()
        .first()
        .cloned()
        .ok_or_else(|| Error::Other("transfer target has no landing path".to_string()))
}

/// Map a zip entry name to its action group: entry names are the group id.
fn lookup_group<'a>(
    groups: &'a std::collections::HashMap<ActionGroupId, ActionGroupDestinations>,
    entry_name: &str,
) -> Result<&'a ActionGroupDestinations> {
    let stem = Path::new(entry_name)
        .file_stem()
        .map(|s| s.to_string_lossy())
        .unwrap_or_else(|| entry_name.into());
    let id: i64 = stem
        .parse()
        .map_err(|_| Error::Target(TargetError::UnknownZipEntry(entry_name.to_string())))?;
    groups
        .get(&ActionGroupId(id))
        .ok_or_else(|| Error::Target(TargetError::UnknownZipEntry(entry_name.to_string())))
}
