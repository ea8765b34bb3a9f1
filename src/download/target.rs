//! Transfer targets: where a download lands on disk, and the session-scoped
//! cache of resolved targets.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::atomic_file::AtomicReplaceFile;
use crate::config::TransferConfig;
use crate::error::{Error, Result, TargetError};
use crate::session::{ActionGroupRepository, SessionScoped};
use crate::types::{
    ActionGroupDestinations, ActionGroupId, PartNumber, PayloadFormat, SyncMode,
    TransferDefinition, TransferKey, TransferKind,
};

/// The set of landing locations for one transfer, plus the in-memory part
/// buffers handed from the download stage to the merge stage.
///
/// Built once per definition by [`DownloadTargetBuilder`] and cached for the
/// session's lifetime.
pub struct TransferTarget {
    /// Raw landing paths the decrypter chain writes into (temp buffer paths,
    /// zip path, or the replace managers' staging paths)
    landing_paths: Vec<PathBuf>,
    /// Final destinations and preserved timestamps per action group, for
    /// synchronization payloads
    action_groups: Option<HashMap<ActionGroupId, ActionGroupDestinations>>,
    /// Atomic-replace managers, one per final destination, for mono-file
    /// "full" synchronization
    replace_managers: Option<Mutex<Vec<AtomicReplaceFile>>>,
    /// Downloaded-but-unmerged part buffers, keyed by part number
    part_buffers: Mutex<HashMap<PartNumber, Vec<u8>>>,
}

impl TransferTarget {
    fn new(
        landing_paths: Vec<PathBuf>,
        action_groups: Option<HashMap<ActionGroupId, ActionGroupDestinations>>,
        replace_managers: Option<Vec<AtomicReplaceFile>>,
    ) -> Self {
        Self {
            landing_paths,
            action_groups,
            replace_managers: replace_managers.map(Mutex::new),
            part_buffers: Mutex::new(HashMap::new()),
        }
    }

    /// The raw landing paths of this transfer.
    pub fn landing_paths(&self) -> &[PathBuf] {
        &self.landing_paths
    }

    /// Final destinations per action group, for synchronization payloads.
    pub fn action_groups(&self) -> Option<&HashMap<ActionGroupId, ActionGroupDestinations>> {
        self.action_groups.as_ref()
    }

    /// Run `f` over the replace managers, if this target carries any.
    pub(crate) fn with_replace_managers<R>(
        &self,
        f: impl FnOnce(&mut Vec<AtomicReplaceFile>) -> R,
    ) -> Option<R> {
        self.replace_managers
            .as_ref()
            .map(|managers| f(&mut managers.lock().unwrap_or_else(|e| e.into_inner())))
    }

    /// Store a downloaded part's encrypted bytes until the merge stage
    /// consumes them.
    pub fn store_part(&self, part_number: PartNumber, data: Vec<u8>) {
        self.part_buffers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(part_number, data);
    }

    /// Take a part's buffer out of the hand-off map.
    pub fn take_part(&self, part_number: PartNumber) -> Option<Vec<u8>> {
        self.part_buffers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&part_number)
    }

    /// Number of parts currently resident between download and merge.
    pub fn buffered_parts(&self) -> usize {
        self.part_buffers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Discard every buffered part.
    pub fn clear_buffers(&self) {
        self.part_buffers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl std::fmt::Debug for TransferTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferTarget")
            .field("landing_paths", &self.landing_paths)
            .field(
                "action_groups",
                &self.action_groups.as_ref().map(|m| m.len()),
            )
            .field("buffered_parts", &self.buffered_parts())
            .finish()
    }
}

/// Session-scoped cache of resolved transfer targets, keyed by definition
/// identity.
#[derive(Default)]
pub struct TargetCache {
    targets: Mutex<HashMap<TransferKey, Arc<TransferTarget>>>,
}

impl TargetCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, key: &TransferKey) -> Option<Arc<TransferTarget>> {
        self.targets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn insert(&self, key: TransferKey, target: Arc<TransferTarget>) -> Arc<TransferTarget> {
        // Another builder may have raced us; the first inserted target wins
        // so every caller of the same definition shares one object.
        self.targets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key)
            .or_insert(target)
            .clone()
    }
}

impl SessionScoped for TargetCache {
    fn invalidate(&self) {
        let evicted: Vec<Arc<TransferTarget>> = {
            let mut targets = self.targets.lock().unwrap_or_else(|e| e.into_inner());
            targets.drain().map(|(_, t)| t).collect()
        };
        for target in &evicted {
            target.clear_buffers();
        }
        if !evicted.is_empty() {
            tracing::debug!(count = evicted.len(), "Evicted cached transfer targets");
        }
    }
}

/// Resolves the landing locations of a transfer according to its kind.
pub struct DownloadTargetBuilder {
    config: TransferConfig,
    repository: Arc<dyn ActionGroupRepository>,
    cache: Arc<TargetCache>,
}

impl DownloadTargetBuilder {
    /// Create a builder over the session's action-group repository and the
    /// shared target cache.
    pub fn new(
        config: TransferConfig,
        repository: Arc<dyn ActionGroupRepository>,
        cache: Arc<TargetCache>,
    ) -> Self {
        Self {
            config,
            repository,
            cache,
        }
    }

    /// The cache this builder populates.
    pub fn cache(&self) -> &Arc<TargetCache> {
        &self.cache
    }

    /// Resolve (or fetch from cache) the target for `definition`.
    pub async fn build_target(
        &self,
        definition: &TransferDefinition,
    ) -> Result<Arc<TransferTarget>> {
        let key = definition.key();
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        tokio::fs::create_dir_all(&self.config.temp_dir).await?;

        let target = match definition.kind {
            TransferKind::Inventory | TransferKind::SyncStart | TransferKind::ProfileBundle => {
                let destination = self.repository.fixed_destination(definition).await?;
                TransferTarget::new(vec![destination], None, None)
            }
            TransferKind::Synchronization {
                format: PayloadFormat::MultiFileZip,
                ..
            } => {
                let zip_path = self
                    .config
                    .temp_dir
                    .join(format!("transfer_{}.zip", definition.transfer_id));
                let groups = self.resolve_action_groups(definition).await?;
                TransferTarget::new(vec![zip_path], Some(groups), None)
            }
            TransferKind::Synchronization {
                format: PayloadFormat::MonoFile,
                mode: SyncMode::Full,
            } => {
                let groups = self.resolve_action_groups(definition).await?;
                let group = single_group(definition, &groups)?;
                let managers: Vec<AtomicReplaceFile> = group
                    .final_paths
                    .iter()
                    .map(|path| AtomicReplaceFile::new(path.clone()))
                    .collect();
                let landing = managers
                    .iter()
                    .map(|m| m.temp_path().to_path_buf())
                    .collect();
                TransferTarget::new(landing, Some(groups), Some(managers))
            }
            TransferKind::Synchronization {
                format: PayloadFormat::MonoFile,
                mode: SyncMode::Delta,
            } => {
                let groups = self.resolve_action_groups(definition).await?;
                single_group(definition, &groups)?;
                let delta_path = self
                    .config
                    .temp_dir
                    .join(format!("transfer_{}.delta", definition.transfer_id));
                TransferTarget::new(vec![delta_path], Some(groups), None)
            }
        };

        Ok(self.cache.insert(key, Arc::new(target)))
    }

    async fn resolve_action_groups(
        &self,
        definition: &TransferDefinition,
    ) -> Result<HashMap<ActionGroupId, ActionGroupDestinations>> {
        let mut groups = HashMap::with_capacity(definition.action_group_ids.len());
        for &id in &definition.action_group_ids {
            let destinations = self.repository.destinations(id).await?;
            groups.insert(id, destinations);
        }
        Ok(groups)
    }
}

fn single_group<'a>(
    definition: &TransferDefinition,
    groups: &'a HashMap<ActionGroupId, ActionGroupDestinations>,
) -> Result<&'a ActionGroupDestinations> {
    let id = definition
        .action_group_ids
        .first()
        .ok_or(Error::Target(TargetError::NoActionGroups(
            definition.transfer_id,
        )))?;
    groups
        .get(id)
        .ok_or(Error::Target(TargetError::UnknownActionGroup(*id)))
}
