//! Storage provider strategies and the provider registry
//!
//! The engine is agnostic to every provider's wire format: each cloud vendor
//! contributes a [`StorageProviderStrategy`] and the pipelines dispatch
//! through an enum-keyed [`ProviderRegistry`] resolved once at construction.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::types::{PartLocation, Provider};

/// Outcome of one provider call, as reported by the provider binding.
///
/// Carries success/failure plus an optional status message; the engine maps
/// failures into [`Error::Provider`] without interpreting the message beyond
/// retry classification.
#[must_use]
#[derive(Debug, Clone)]
pub struct ProviderCallResult {
    /// Whether the call succeeded
    pub success: bool,
    /// Status or error message carried by the provider response
    pub message: Option<String>,
}

impl ProviderCallResult {
    /// A successful call with no message.
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    /// A failed call with the given status message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

/// Per-provider transfer strategy
///
/// One implementation exists per [`Provider`]; implementations own the wire
/// protocol, authentication, and any provider-specific request shaping. The
/// cancellation token is the transfer's shared token — implementations must
/// honor it so in-flight calls abort promptly once a transfer is poisoned.
#[async_trait]
pub trait StorageProviderStrategy: Send + Sync {
    /// Download one part from `location`, returning its encrypted bytes.
    async fn download(
        &self,
        location: &PartLocation,
        cancel_token: &CancellationToken,
    ) -> Result<Vec<u8>>;

    /// Upload one encrypted slice to `location`.
    async fn upload(
        &self,
        data: &[u8],
        location: &PartLocation,
        cancel_token: &CancellationToken,
    ) -> Result<ProviderCallResult>;
}

/// Enum-keyed registry of provider strategies, resolved once at construction.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    strategies: HashMap<Provider, Arc<dyn StorageProviderStrategy>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the strategy for one provider, replacing any previous one.
    pub fn register(
        mut self,
        provider: Provider,
        strategy: Arc<dyn StorageProviderStrategy>,
    ) -> Self {
        self.strategies.insert(provider, strategy);
        self
    }

    /// Resolve the strategy for `provider`.
    ///
    /// An unregistered provider is a part-level error: the coordination API
    /// told us a part lives somewhere we have no binding for.
    pub fn resolve(&self, provider: Provider) -> Result<Arc<dyn StorageProviderStrategy>> {
        self.strategies.get(&provider).cloned().ok_or_else(|| {
            Error::Provider {
                provider,
                message: "no strategy registered".to_string(),
            }
        })
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.strategies.keys().collect::<Vec<_>>())
            .finish()
    }
}
