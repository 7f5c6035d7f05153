use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::{DomainError, HistoryQuery, Transcription};
use crate::ports::EntitySource;
use crate::store::{Placement, Store, StorePolicy, Subscription};

/// Bounded, newest-first transcription history.
///
/// New entries come from the backend's push events; the UI can delete
/// entries or clear the history, which the backend then echoes back.
#[derive(Clone, Debug)]
pub struct TranscriptionStore {
    store: Store<Transcription>,
    limit: usize,
}

impl TranscriptionStore {
    pub fn new(source: Arc<dyn EntitySource<Transcription>>, limit: usize) -> Self {
        let policy = StorePolicy {
            capacity: Some(limit),
            placement: Placement::Front,
            order: None,
        };
        Self {
            store: Store::new("transcriptions", policy, source),
            limit,
        }
    }

    pub async fn initialize(&self) -> Result<Arc<Vec<Transcription>>, DomainError> {
        self.store
            .initialize(HistoryQuery { limit: self.limit })
            .await
    }

    pub fn add(&self, transcription: Transcription) -> bool {
        self.store.upsert(transcription)
    }

    pub fn snapshot(&self) -> Arc<Vec<Transcription>> {
        self.store.snapshot()
    }

    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.store.subscribe(listener)
    }

    /// Delete on the backend, then drop locally without waiting for the echo.
    pub async fn delete(&self, id: i64) -> Result<bool, DomainError> {
        let outcome = self.store.source().delete(&id).await?;
        if !outcome.success {
            let message = outcome
                .message
                .unwrap_or_else(|| format!("backend refused to delete transcription {}", id));
            warn!(id, message = %message, "Transcription delete failed");
            return Err(DomainError::Backend(message));
        }
        Ok(self.store.remove(&id))
    }

    /// Clear the whole history. Returns the backend's cleared count.
    pub async fn clear(&self) -> Result<u64, DomainError> {
        let outcome = self.store.source().clear().await?;
        let local = self.store.clear();
        info!(cleared = outcome.cleared, local, "Transcription history cleared");
        Ok(outcome.cleared)
    }

    pub fn store(&self) -> &Store<Transcription> {
        &self.store
    }
}
