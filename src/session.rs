//! Session lifecycle events and session-scoped caches
//!
//! The engine keeps per-session lookup caches (download targets, downloader
//! instances). They are explicitly injected services exposing `invalidate()`,
//! wired to the session component's lifecycle events — never statics.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::types::{ActionGroupDestinations, ActionGroupId, SessionId, TransferDefinition};

/// Lifecycle notifications published by the session component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The session transitioned back to preparation; cached transfer state is stale
    PreparationStarted {
        /// Session being prepared
        session_id: SessionId,
    },
    /// The session ended
    Ended {
        /// Session that ended
        session_id: SessionId,
    },
}

/// A cache whose contents are only valid for the current session round.
pub trait SessionScoped: Send + Sync {
    /// Drop all cached state. Must be a no-op when already empty.
    fn invalidate(&self);
}

/// The session's action-group repository.
///
/// Resolves where an action group's content finally lands and which original
/// timestamps to restore, plus the fixed destination of non-synchronization
/// payloads (inventory, sync-start, profile bundle).
#[async_trait]
pub trait ActionGroupRepository: Send + Sync {
    /// Final destinations and preserved metadata of one action group.
    async fn destinations(&self, id: ActionGroupId) -> Result<ActionGroupDestinations>;

    /// Concrete destination path of a non-synchronization payload.
    async fn fixed_destination(&self, definition: &TransferDefinition) -> Result<PathBuf>;
}

/// Spawn a task that invalidates `caches` on every session lifecycle event.
///
/// The task ends when the event channel closes. Lagged receivers just skip
/// ahead: missing an event only means invalidating slightly later, on the
/// next one.
pub fn spawn_invalidation_listener(
    mut events: broadcast::Receiver<SessionEvent>,
    caches: Vec<Arc<dyn SessionScoped>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    tracing::debug!(?event, caches = caches.len(), "Invalidating session caches");
                    for cache in &caches {
                        cache.invalidate();
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Session event listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
