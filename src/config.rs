//! Configuration types for sync-transfer

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Transfer pipeline configuration (worker counts, backpressure, directories)
///
/// Groups the knobs of the chunked transfer pipeline. Used as a nested
/// sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Directory for transient landing files (default: "./transfer-temp")
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Upper bound on download workers per transfer (default: 8)
    ///
    /// The effective pool size is `min(download_worker_cap, 2 × available
    /// cores)`.
    #[serde(default = "default_download_worker_cap")]
    pub download_worker_cap: usize,

    /// Parts allowed to sit in memory between download and merge (default: 8)
    ///
    /// Backs the per-transfer semaphore; a slot is held from the moment a
    /// worker dequeues a part until the merge stage has consumed it.
    #[serde(default = "default_in_flight_part_limit")]
    pub in_flight_part_limit: usize,

    /// Upload workers per transfer (default: 6)
    #[serde(default = "default_upload_workers")]
    pub upload_workers: usize,

    /// Slices allowed to sit between the slicer and the upload pool (default: 8)
    ///
    /// Capacity of the bounded slice channel; the slicer blocks once this
    /// many encrypted slices are buffered.
    #[serde(default = "default_slice_channel_capacity")]
    pub slice_channel_capacity: usize,

    /// Maximum encrypted slice length in bytes (default: 4 MiB)
    #[serde(default = "default_max_slice_length")]
    pub max_slice_length: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            download_worker_cap: default_download_worker_cap(),
            in_flight_part_limit: default_in_flight_part_limit(),
            upload_workers: default_upload_workers(),
            slice_channel_capacity: default_slice_channel_capacity(),
            max_slice_length: default_max_slice_length(),
        }
    }
}

impl TransferConfig {
    /// Effective download worker pool size: `min(cap, 2 × available cores)`.
    pub fn download_workers(&self) -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.download_worker_cap.min(2 * cores).max(1)
    }
}

/// Retry configuration for transient part-level failures
///
/// The engine wraps every provider call in the configured retry policy;
/// everything beyond these per-attempt settings (no overall timeout) is the
/// policy's business.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Main configuration for the transfer engine
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Transfer pipeline settings
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Retry settings for provider calls
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    /// Validate the configuration, returning a descriptive error for the
    /// first invalid setting found.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.transfer.download_worker_cap == 0 {
            return Err(crate::error::Error::Config {
                message: "download_worker_cap must be at least 1".to_string(),
                key: Some("transfer.download_worker_cap".to_string()),
            });
        }
        if self.transfer.in_flight_part_limit == 0 {
            return Err(crate::error::Error::Config {
                message: "in_flight_part_limit must be at least 1".to_string(),
                key: Some("transfer.in_flight_part_limit".to_string()),
            });
        }
        if self.transfer.upload_workers == 0 {
            return Err(crate::error::Error::Config {
                message: "upload_workers must be at least 1".to_string(),
                key: Some("transfer.upload_workers".to_string()),
            });
        }
        if self.transfer.slice_channel_capacity == 0 {
            return Err(crate::error::Error::Config {
                message: "slice_channel_capacity must be at least 1".to_string(),
                key: Some("transfer.slice_channel_capacity".to_string()),
            });
        }
        if self.transfer.max_slice_length == 0 {
            return Err(crate::error::Error::Config {
                message: "max_slice_length must be at least 1 byte".to_string(),
                key: Some("transfer.max_slice_length".to_string()),
            });
        }
        Ok(())
    }
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./transfer-temp")
}

fn default_download_worker_cap() -> usize {
    8
}

fn default_in_flight_part_limit() -> usize {
    8
}

fn default_upload_workers() -> usize {
    6
}

fn default_slice_channel_capacity() -> usize {
    8
}

fn default_max_slice_length() -> usize {
    4 * 1024 * 1024
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
