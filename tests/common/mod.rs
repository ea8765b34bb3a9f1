//! Shared fixtures for the integration tests, built entirely on the public
//! API: an in-memory object store, a pass-through cipher pair, and a
//! coordination stub.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use sync_transfer::{
    ActionGroupDestinations, ActionGroupId, ActionGroupRepository, CoordinationApi, DeltaApplier,
    Error, MergerDecrypter, MergerFactory, PartLocation, PartNumber, PartOperation, Provider,
    ProviderCallResult, Result, Slice, SliceEncrypter, StorageProviderStrategy,
    TransferDefinition, TransferId, UploadSource,
};

/// In-memory object store shared between the upload and download sides.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn remove(&self, locator: &str) {
        self.objects.lock().unwrap().remove(locator);
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl StorageProviderStrategy for MemoryObjectStore {
    async fn download(
        &self,
        location: &PartLocation,
        _cancel_token: &CancellationToken,
    ) -> Result<Vec<u8>> {
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
        data: &[u8],
        location: &PartLocation,
        _cancel_token: &CancellationToken,
    ) -> Result<ProviderCallResult> {
        self.objects
            .lock()
            .unwrap()
            .insert(location.locator.clone(), data.to_vec());
        Ok(ProviderCallResult::ok())
    }
}

/// Coordination stub: locators are derived from identity, confirmations and
/// the finish assertion are recorded.
#[derive(Default)]
pub struct StubCoordination {
    pub finished: Mutex<Option<(TransferId, u32)>>,
}

fn locator(operation: &PartOperation) -> String {
    format!(
        "s{}/t{}/p{}",
        operation.session_id, operation.transfer_id, operation.part_number
    )
}

#[async_trait]
impl CoordinationApi for StubCoordination {
    async fn resolve_download_location(&self, operation: &PartOperation) -> Result<PartLocation> {
        Ok(PartLocation {
            provider: Provider::S3,
            locator: locator(operation),
        })
    }

    async fn resolve_upload_location(&self, operation: &PartOperation) -> Result<PartLocation> {
        Ok(PartLocation {
            provider: Provider::S3,
            locator: locator(operation),
        })
    }

    async fn confirm_part_downloaded(&self, _operation: &PartOperation) -> Result<()> {
        Ok(())
    }

    async fn confirm_part_uploaded(&self, _operation: &PartOperation) -> Result<()> {
        Ok(())
    }

    async fn assert_transfer_finished(
        &self,
        transfer_id: TransferId,
        total_parts: u32,
    ) -> Result<()> {
        *self.finished.lock().unwrap() = Some((transfer_id, total_parts));
        Ok(())
    }
}

/// Pass-through "cipher": slices the source into max-length chunks without
/// transforming the bytes.
#[derive(Default)]
pub struct PassthroughSlicer {
    data: Vec<u8>,
    cursor: usize,
    max_slice_length: usize,
    next_part: PartNumber,
}

impl PassthroughSlicer {
    pub fn new() -> Box<dyn SliceEncrypter> {
        Box::new(Self {
            max_slice_length: usize::MAX,
            next_part: 1,
            ..Self::default()
        })
    }
}

#[async_trait]
impl SliceEncrypter for PassthroughSlicer {
    async fn initialize(
        &mut self,
        source: UploadSource,
        definition: &TransferDefinition,
    ) -> Result<()> {
        self.data = match source {
            UploadSource::File(path) => tokio::fs::read(&path).await?,
            UploadSource::Stream(mut stream) => {
                let mut data = Vec::new();
                stream.read_to_end(&mut data).await?;
                data
            }
        };
        definition.set_iv(vec![0; 16]).ok();
        definition.set_declared_length(self.data.len() as u64).ok();
        Ok(())
    }

    fn set_max_slice_length(&mut self, max_slice_length: usize) {
        self.max_slice_length = max_slice_length;
    }

    async fn slice_and_encrypt(&mut self) -> Result<Option<Slice>> {
        if self.cursor >= self.data.len() {
            return Ok(None);
        }
        let end = (self.cursor + self.max_slice_length).min(self.data.len());
        let slice = Slice {
            part_number: self.next_part,
            data: self.data[self.cursor..end].to_vec(),
        };
        self.cursor = end;
        self.next_part += 1;
        Ok(Some(slice))
    }

    fn dispose(&mut self) {
        self.data.clear();
    }
}

struct AppendingLink {
    path: PathBuf,
    data: Vec<u8>,
}

#[async_trait]
impl MergerDecrypter for AppendingLink {
    async fn merge_and_decrypt(&mut self) -> Result<()> {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&self.data)?;
        Ok(())
    }

    fn dispose(&mut self) {}
}

/// Merger counterpart of [`PassthroughSlicer`]: appends each part's bytes to
/// the landing path. Order-sensitive, like the real decryption chain.
pub struct AppendingMergerFactory {
    landing_path: PathBuf,
}

impl AppendingMergerFactory {
    pub fn new(landing_path: PathBuf) -> Self {
        Self { landing_path }
    }
}

impl MergerFactory for AppendingMergerFactory {
    fn create_chain(
        &self,
        _part_number: PartNumber,
        data: Vec<u8>,
    ) -> Result<Vec<Box<dyn MergerDecrypter>>> {
        Ok(vec![Box::new(AppendingLink {
            path: self.landing_path.clone(),
            data,
        })])
    }
}

/// Repository routing every transfer to a file under one base directory.
pub struct TempRepository {
    pub base_dir: PathBuf,
    pub groups: Mutex<HashMap<ActionGroupId, ActionGroupDestinations>>,
}

impl TempRepository {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            groups: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ActionGroupRepository for TempRepository {
    async fn destinations(&self, id: ActionGroupId) -> Result<ActionGroupDestinations> {
        self.groups
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::Other(format!("unknown action group {id}")))
    }

    async fn fixed_destination(&self, definition: &TransferDefinition) -> Result<PathBuf> {
        Ok(self
            .base_dir
            .join(format!("transfer_{}.bin", definition.transfer_id)))
    }
}

/// Delta codec stub: replaces the destination with the delta's bytes.
#[derive(Default)]
pub struct OverwritingDeltaApplier;

#[async_trait]
impl DeltaApplier for OverwritingDeltaApplier {
    async fn apply(&self, delta_path: &std::path::Path, destination: &std::path::Path) -> Result<()> {
        let content = tokio::fs::read(delta_path).await?;
        tokio::fs::write(destination, content).await?;
        Ok(())
    }
}
