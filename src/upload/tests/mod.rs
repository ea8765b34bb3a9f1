//! Upload pipeline tests: slicing arithmetic, worker pool accounting, and
//! the single aggregate error per failed upload.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, RetryConfig};
use crate::coordination::CoordinationApi;
use crate::crypto::{SliceEncrypter, UploadSource};
use crate::error::{Error, Result, UploadError};
use crate::provider::{ProviderCallResult, ProviderRegistry, StorageProviderStrategy};
use crate::retry::BackoffRetryPolicy;
use crate::types::{
    PartLocation, PartNumber, PartOperation, Provider, SessionId, Slice, TransferDefinition,
    TransferId, TransferKind,
};

use super::{FileUploadProcessor, UploadServices};

/// Encrypter over an in-memory buffer: slices sequentially up to the
/// configured length, optionally failing at a given slice index.
struct VecSliceEncrypter {
    data: Vec<u8>,
    cursor: usize,
    max_slice_length: usize,
    next_part: PartNumber,
    fail_at_part: Option<PartNumber>,
    disposed: Arc<AtomicBool>,
}

impl VecSliceEncrypter {
    fn new(data: Vec<u8>) -> (Box<dyn SliceEncrypter>, Arc<AtomicBool>) {
        Self::build(data, None)
    }

    fn failing_at(data: Vec<u8>, part: PartNumber) -> (Box<dyn SliceEncrypter>, Arc<AtomicBool>) {
        Self::build(data, Some(part))
    }

    fn build(
        data: Vec<u8>,
        fail_at_part: Option<PartNumber>,
    ) -> (Box<dyn SliceEncrypter>, Arc<AtomicBool>) {
        let disposed = Arc::new(AtomicBool::new(false));
        let encrypter = Box::new(Self {
            data,
            cursor: 0,
            max_slice_length: usize::MAX,
            next_part: 1,
            fail_at_part,
            disposed: Arc::clone(&disposed),
        });
        (encrypter, disposed)
    }
}

#[async_trait]
impl SliceEncrypter for VecSliceEncrypter {
    async fn initialize(
        &mut self,
        _source: UploadSource,
        definition: &TransferDefinition,
    ) -> Result<()> {
        definition.set_iv(vec![0x11; 16]).ok();
        definition.set_declared_length(self.data.len() as u64).ok();
        Ok(())
    }

    fn set_max_slice_length(&mut self, max_slice_length: usize) {
        self.max_slice_length = max_slice_length;
    }

    async fn slice_and_encrypt(&mut self) -> Result<Option<Slice>> {
        if self.fail_at_part == Some(self.next_part) {
            return Err(Error::Other("cipher state corrupted".to_string()));
        }
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
        self.disposed.store(true, Ordering::SeqCst);
    }
}

/// Coordination mock recording confirmations and the finish assertion.
#[derive(Default)]
struct RecordingCoordination {
    confirmed: Mutex<Vec<PartNumber>>,
    finished: Mutex<Option<(TransferId, u32)>>,
}

#[async_trait]
impl CoordinationApi for RecordingCoordination {
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

    async fn confirm_part_downloaded(&self, _operation: &PartOperation) -> Result<()> {
        Ok(())
    }

    async fn confirm_part_uploaded(&self, operation: &PartOperation) -> Result<()> {
        self.confirmed.lock().unwrap().push(operation.part_number);
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

/// In-memory object store with per-locator failure injection.
#[derive(Default)]
struct MemoryStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail_always: Mutex<Vec<String>>,
    fail_once: Mutex<Vec<String>>,
    attempts: AtomicU32,
}

impl MemoryStore {
    fn failing_always(locator: &str) -> Self {
        let store = Self::default();
        store.fail_always.lock().unwrap().push(locator.to_string());
        store
    }

    fn failing_once(locator: &str) -> Self {
        let store = Self::default();
        store.fail_once.lock().unwrap().push(locator.to_string());
        store
    }

    fn object(&self, locator: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(locator).cloned()
    }
}

#[async_trait]
impl StorageProviderStrategy for MemoryStore {
    async fn download(
        &self,
        location: &PartLocation,
        _cancel_token: &CancellationToken,
    ) -> Result<Vec<u8>> {
        self.object(&location.locator).ok_or_else(|| Error::Provider {
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
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_always.lock().unwrap().contains(&location.locator) {
            return Ok(ProviderCallResult::failed("access denied"));
        }
        {
            let mut fail_once = self.fail_once.lock().unwrap();
            if let Some(pos) = fail_once.iter().position(|l| l == &location.locator) {
                fail_once.remove(pos);
                return Ok(ProviderCallResult::failed("connection reset"));
            }
        }
        self.objects
            .lock()
            .unwrap()
            .insert(location.locator.clone(), data.to_vec());
        Ok(ProviderCallResult::ok())
    }
}

struct Fixture {
    processor: FileUploadProcessor,
    coordination: Arc<RecordingCoordination>,
    store: Arc<MemoryStore>,
}

/// Small slices and fast retries so tests exercise the pipeline quickly.
fn fast_config() -> Config {
    let mut config = Config::default();
    config.transfer.max_slice_length = 1024;
    config.retry = RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config
}

fn fixture_with_store(store: MemoryStore) -> Fixture {
    let config = fast_config();
    let coordination = Arc::new(RecordingCoordination::default());
    let store = Arc::new(store);
    let services = UploadServices {
        coordination: Arc::clone(&coordination) as Arc<dyn CoordinationApi>,
        providers: ProviderRegistry::new().register(
            Provider::S3,
            Arc::clone(&store) as Arc<dyn StorageProviderStrategy>,
        ),
        retry_policy: Arc::new(BackoffRetryPolicy::new(config.retry.clone())),
    };
    let processor = FileUploadProcessor::new(config, services).unwrap();
    Fixture {
        processor,
        coordination,
        store,
    }
}

fn fixture() -> Fixture {
    fixture_with_store(MemoryStore::default())
}

fn definition() -> Arc<TransferDefinition> {
    Arc::new(TransferDefinition::new(
        SessionId(1),
        TransferId(100),
        TransferKind::Inventory,
    ))
}

fn stream_source() -> UploadSource {
    UploadSource::Stream(Box::new(tokio::io::empty()))
}

#[tokio::test]
async fn source_is_sliced_at_the_configured_length() {
    let fx = fixture();
    let (encrypter, _) = VecSliceEncrypter::new(vec![0xAA; 3000]);

    let outcome = fx
        .processor
        .upload(definition(), stream_source(), encrypter)
        .await
        .unwrap();

    assert_eq!(outcome.slices_created, 3);
    assert_eq!(outcome.slices_uploaded, 3);
    assert_eq!(fx.store.object("part_1").unwrap().len(), 1024);
    assert_eq!(fx.store.object("part_2").unwrap().len(), 1024);
    assert_eq!(fx.store.object("part_3").unwrap().len(), 952);
}

#[tokio::test]
async fn every_created_slice_is_uploaded_and_confirmed() {
    let fx = fixture();
    let (encrypter, _) = VecSliceEncrypter::new(vec![0x42; 20 * 1024]);

    let outcome = fx
        .processor
        .upload(definition(), stream_source(), encrypter)
        .await
        .unwrap();

    assert_eq!(outcome.slices_created, 20);
    assert_eq!(outcome.slices_uploaded, 20);
    assert!(outcome.max_concurrency <= 6);

    let mut confirmed = fx.coordination.confirmed.lock().unwrap().clone();
    confirmed.sort_unstable();
    assert_eq!(confirmed, (1..=20).collect::<Vec<_>>());
    assert_eq!(
        *fx.coordination.finished.lock().unwrap(),
        Some((TransferId(100), 20))
    );
}

#[tokio::test]
async fn rejected_upload_raises_one_error_naming_the_source() {
    let fx = fixture_with_store(MemoryStore::failing_always("part_2"));
    let (encrypter, disposed) = VecSliceEncrypter::new(vec![0x1; 3000]);

    let err = fx
        .processor
        .upload(definition(), stream_source(), encrypter)
        .await
        .unwrap_err();

    match err {
        Error::Upload(UploadError::SourceFailed {
            source_name,
            transfer_id,
            reason,
        }) => {
            assert_eq!(source_name, "a stream");
            assert_eq!(transfer_id, TransferId(100));
            assert!(reason.contains("slice 2"), "got reason: {reason}");
        }
        other => panic!("expected SourceFailed, got {other:?}"),
    }
    assert!(disposed.load(Ordering::SeqCst), "encrypter must be disposed");
    assert!(fx.coordination.finished.lock().unwrap().is_none());
}

#[tokio::test]
async fn file_source_errors_name_the_path() {
    let fx = fixture_with_store(MemoryStore::failing_always("part_1"));
    let (encrypter, _) = VecSliceEncrypter::new(vec![0x1; 64]);

    let err = fx
        .processor
        .upload(
            definition(),
            UploadSource::File("/data/session/payload.bin".into()),
            encrypter,
        )
        .await
        .unwrap_err();

    assert!(
        err.to_string().contains("/data/session/payload.bin"),
        "got: {err}"
    );
}

#[tokio::test]
async fn slicing_failure_aborts_the_upload() {
    let fx = fixture();
    let (encrypter, disposed) = VecSliceEncrypter::failing_at(vec![0x1; 64], 1);

    let err = fx
        .processor
        .upload(definition(), stream_source(), encrypter)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("slicing failed"), "got: {err}");
    assert!(disposed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn empty_source_is_rejected() {
    let fx = fixture();
    let (encrypter, _) = VecSliceEncrypter::new(Vec::new());

    let err = fx
        .processor
        .upload(definition(), stream_source(), encrypter)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("no slices"), "got: {err}");
}

#[tokio::test]
async fn transient_rejection_is_retried() {
    let fx = fixture_with_store(MemoryStore::failing_once("part_1"));
    let (encrypter, _) = VecSliceEncrypter::new(vec![0x7; 64]);

    let outcome = fx
        .processor
        .upload(definition(), stream_source(), encrypter)
        .await
        .unwrap();

    assert_eq!(outcome.slices_uploaded, 1);
    assert!(
        fx.store.attempts.load(Ordering::SeqCst) >= 2,
        "the rejected attempt must have been repeated"
    );
}

#[tokio::test]
async fn initialization_records_iv_and_length_once() {
    let fx = fixture();
    let (encrypter, _) = VecSliceEncrypter::new(vec![0x5; 128]);
    let def = definition();

    fx.processor
        .upload(Arc::clone(&def), stream_source(), encrypter)
        .await
        .unwrap();

    assert_eq!(def.iv(), Some(&[0x11; 16][..]));
    assert_eq!(def.declared_length(), Some(128));
}
