//! Shared fixtures and mocks for the download pipeline tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, RetryConfig};
use crate::coordination::CoordinationApi;
use crate::crypto::{DeltaApplier, MergerDecrypter, MergerFactory};
use crate::error::{Error, Result};
use crate::provider::{ProviderCallResult, ProviderRegistry, StorageProviderStrategy};
use crate::retry::BackoffRetryPolicy;
use crate::session::ActionGroupRepository;
use crate::types::{
    ActionGroupDestinations, ActionGroupId, PartLocation, PartNumber, PartOperation, Provider,
    SessionId, TransferDefinition, TransferId, TransferKind,
};

use super::target::{DownloadTargetBuilder, TargetCache};
use super::{DownloadServices, FileDownloader};

/// Coordination mock: locators are derived from the part number, confirmed
/// parts are recorded.
#[derive(Default)]
pub(crate) struct MockCoordination {
    pub(crate) confirmed_downloads: Mutex<Vec<PartNumber>>,
}

#[async_trait]
impl CoordinationApi for MockCoordination {
    async fn resolve_download_location(&self, operation: &PartOperation) -> Result<PartLocation> {
        Ok(PartLocation {
            provider: Provider::S3,
            locator: format!("part_{}", operation.part_number),
        })
    }

    async fn resolve_upload_location(&self, operation: &PartOperation) -> Result<PartLocation> {
        Ok(PartLocation {
            provider: Provider::S3,
            locator: format!("part_{}", operation.part_number),
        })
    }

    async fn confirm_part_downloaded(&self, operation: &PartOperation) -> Result<()> {
        self.confirmed_downloads
            .lock()
            .unwrap()
            .push(operation.part_number);
        Ok(())
    }

    async fn confirm_part_uploaded(&self, _operation: &PartOperation) -> Result<()> {
        Ok(())
    }

    async fn assert_transfer_finished(
        &self,
        _transfer_id: TransferId,
        _total_parts: u32,
    ) -> Result<()> {
        Ok(())
    }
}

/// In-memory object store serving download requests, with failure injection.
#[derive(Default)]
pub(crate) struct MemoryStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail_once: Mutex<Vec<String>>,
    pub(crate) attempts: AtomicU32,
}

impl MemoryStore {
    /// A store holding `total` parts whose content is the part number
    /// repeated `size` times.
    pub(crate) fn with_parts(total: u32, size: usize) -> Self {
        let store = Self::default();
        {
            let mut objects = store.objects.lock().unwrap();
            for n in 1..=total {
                objects.insert(format!("part_{n}"), vec![n as u8; size]);
            }
        }
        store
    }

    pub(crate) fn remove(&self, locator: &str) {
        self.objects.lock().unwrap().remove(locator);
    }

    pub(crate) fn fail_once(&self, locator: &str) {
        self.fail_once.lock().unwrap().push(locator.to_string());
    }
}

#[async_trait]
impl StorageProviderStrategy for MemoryStore {
    async fn download(
        &self,
        location: &PartLocation,
        _cancel_token: &CancellationToken,
    ) -> Result<Vec<u8>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        {
            let mut fail_once = self.fail_once.lock().unwrap();
            if let Some(pos) = fail_once.iter().position(|l| l == &location.locator) {
                fail_once.remove(pos);
                return Err(Error::Provider {
                    provider: location.provider,
                    message: "connection reset by peer".to_string(),
                });
            }
        }
        self.objects
            .lock()
            .unwrap()
            .get(&location.locator)
            .cloned()
            .ok_or_else(|| Error::Provider {
                provider: location.provider,
                message: format!("{} not found", location.locator),
            })
    }

    async fn upload(
        &self,
        _data: &[u8],
        _location: &PartLocation,
        _cancel_token: &CancellationToken,
    ) -> Result<ProviderCallResult> {
        Ok(ProviderCallResult::ok())
    }
}

/// One recorded merge: the part number and its encrypted bytes, appended in
/// the order the merge stage ran.
pub(crate) type MergeLog = Arc<Mutex<Vec<(PartNumber, Vec<u8>)>>>;

struct RecordingLink {
    part_number: PartNumber,
    data: Option<Vec<u8>>,
    log: MergeLog,
    fail: bool,
    disposed: Arc<AtomicU32>,
}

#[async_trait]
impl MergerDecrypter for RecordingLink {
    async fn merge_and_decrypt(&mut self) -> Result<()> {
        if self.fail {
            return Err(Error::Other("decryption failed: bad key material".to_string()));
        }
        if let Some(data) = self.data.take() {
            self.log.lock().unwrap().push((self.part_number, data));
        }
        Ok(())
    }

    fn dispose(&mut self) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory producing a two-link chain per part: a recording link followed by
/// a no-op link, optionally failing at one part number.
pub(crate) struct RecordingMergerFactory {
    pub(crate) log: MergeLog,
    pub(crate) disposed: Arc<AtomicU32>,
    pub(crate) fail_at_part: Option<PartNumber>,
}

impl RecordingMergerFactory {
    pub(crate) fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            disposed: Arc::new(AtomicU32::new(0)),
            fail_at_part: None,
        }
    }

    pub(crate) fn failing_at(part: PartNumber) -> Self {
        Self {
            fail_at_part: Some(part),
            ..Self::new()
        }
    }
}

impl MergerFactory for RecordingMergerFactory {
    fn create_chain(
        &self,
        part_number: PartNumber,
        data: Vec<u8>,
    ) -> Result<Vec<Box<dyn MergerDecrypter>>> {
        let fail = self.fail_at_part == Some(part_number);
        Ok(vec![
            Box::new(RecordingLink {
                part_number,
                data: Some(data),
                log: Arc::clone(&self.log),
                fail,
                disposed: Arc::clone(&self.disposed),
            }),
            Box::new(RecordingLink {
                part_number,
                data: None,
                log: Arc::clone(&self.log),
                fail: false,
                disposed: Arc::clone(&self.disposed),
            }),
        ])
    }
}

/// Repository serving preconfigured action-group destinations; fixed-kind
/// transfers land under the given base directory.
pub(crate) struct StaticRepository {
    pub(crate) base_dir: PathBuf,
    pub(crate) groups: Mutex<HashMap<ActionGroupId, ActionGroupDestinations>>,
}

impl StaticRepository {
    pub(crate) fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            groups: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn add_group(&self, id: ActionGroupId, destinations: ActionGroupDestinations) {
        self.groups.lock().unwrap().insert(id, destinations);
    }
}

#[async_trait]
impl ActionGroupRepository for StaticRepository {
    async fn destinations(&self, id: ActionGroupId) -> Result<ActionGroupDestinations> {
        self.groups
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(Error::Target(
                crate::error::TargetError::UnknownActionGroup(id),
            ))
    }

    async fn fixed_destination(&self, definition: &TransferDefinition) -> Result<PathBuf> {
        Ok(self
            .base_dir
            .join(format!("fixed_{}.bin", definition.transfer_id)))
    }
}

/// Delta codec mock: "applying" a delta overwrites the destination with the
/// delta's bytes and records the call.
#[derive(Default)]
pub(crate) struct RecordingDeltaApplier {
    pub(crate) applied: Mutex<Vec<(PathBuf, PathBuf)>>,
}

#[async_trait]
impl DeltaApplier for RecordingDeltaApplier {
    async fn apply(&self, delta_path: &std::path::Path, destination: &std::path::Path) -> Result<()> {
        let content = tokio::fs::read(delta_path).await?;
        tokio::fs::write(destination, content).await?;
        self.applied
            .lock()
            .unwrap()
            .push((delta_path.to_path_buf(), destination.to_path_buf()));
        Ok(())
    }
}

/// Everything a pipeline test needs, wired together with fast retries and a
/// per-test temp directory.
pub(crate) struct PipelineFixture {
    pub(crate) config: Config,
    pub(crate) coordination: Arc<MockCoordination>,
    pub(crate) store: Arc<MemoryStore>,
    pub(crate) merger_factory: Arc<RecordingMergerFactory>,
    pub(crate) repository: Arc<StaticRepository>,
    pub(crate) cache: Arc<TargetCache>,
    pub(crate) temp: tempfile::TempDir,
}

impl PipelineFixture {
    pub(crate) fn new(store: MemoryStore) -> Self {
        Self::with_factory(store, RecordingMergerFactory::new())
    }

    pub(crate) fn with_factory(store: MemoryStore, factory: RecordingMergerFactory) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.transfer.temp_dir = temp.path().join("landing");
        config.retry = RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter: false,
        };
        Self {
            config,
            coordination: Arc::new(MockCoordination::default()),
            store: Arc::new(store),
            merger_factory: Arc::new(factory),
            repository: Arc::new(StaticRepository::new(temp.path().join("destinations"))),
            cache: Arc::new(TargetCache::new()),
            temp,
        }
    }

    pub(crate) fn services(&self) -> DownloadServices {
        DownloadServices {
            coordination: Arc::clone(&self.coordination) as Arc<dyn CoordinationApi>,
            providers: ProviderRegistry::new().register(
                Provider::S3,
                Arc::clone(&self.store) as Arc<dyn StorageProviderStrategy>,
            ),
            retry_policy: Arc::new(BackoffRetryPolicy::new(self.config.retry.clone())),
            merger_factory: Arc::clone(&self.merger_factory) as Arc<dyn MergerFactory>,
        }
    }

    pub(crate) fn target_builder(&self) -> DownloadTargetBuilder {
        DownloadTargetBuilder::new(
            self.config.transfer.clone(),
            Arc::clone(&self.repository) as Arc<dyn ActionGroupRepository>,
            Arc::clone(&self.cache),
        )
    }

    pub(crate) async fn start(&self, definition: Arc<TransferDefinition>) -> FileDownloader {
        FileDownloader::start(&self.config, definition, &self.target_builder(), self.services())
            .await
            .unwrap()
    }

    /// Part numbers in the order the merge stage processed them.
    pub(crate) fn merged_order(&self) -> Vec<PartNumber> {
        self.merger_factory
            .log
            .lock()
            .unwrap()
            .iter()
            .map(|(n, _)| *n)
            .collect()
    }
}

pub(crate) fn inventory_definition(transfer_id: i64) -> Arc<TransferDefinition> {
    Arc::new(TransferDefinition::new(
        SessionId(1),
        TransferId(transfer_id),
        TransferKind::Inventory,
    ))
}
