use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::{ClearOutcome, DeleteOutcome, DomainError, Entity, EntityDeleted, UsageStats};

/// Callback invoked by the backend for each push event.
pub type PushCallback<P> = Arc<dyn Fn(P) + Send + Sync>;

/// Handle that detaches a push subscription.
///
/// Disposing more than once is safe; only the first call runs the teardown.
pub struct Disposer {
    teardown: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Disposer {
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            teardown: Mutex::new(Some(Box::new(teardown))),
        }
    }

    /// A disposer with nothing to tear down.
    pub fn noop() -> Self {
        Self {
            teardown: Mutex::new(None),
        }
    }

    /// Run the teardown. Returns true if this call ran it.
    pub fn dispose(&self) -> bool {
        // Take first so the teardown runs without the lock held.
        let teardown = self.teardown.lock().take();
        match teardown {
            Some(f) => {
                f();
                true
            }
            None => false,
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.teardown.lock().is_none()
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Port for one entity family on the backend: a pull method, a triplet of
/// push subscriptions and the mutation methods.
#[async_trait]
pub trait EntitySource<T: Entity>: Send + Sync {
    /// Pull the current entities matching `query`.
    async fn fetch(&self, query: &T::Query) -> Result<Vec<T>, DomainError>;

    fn on_added(&self, callback: PushCallback<T>) -> Disposer;

    fn on_updated(&self, callback: PushCallback<T>) -> Disposer;

    fn on_deleted(&self, callback: PushCallback<EntityDeleted<T::Id>>) -> Disposer;

    /// Delete one entity. The backend later echoes a deleted event.
    async fn delete(&self, id: &T::Id) -> Result<DeleteOutcome, DomainError> {
        Err(DomainError::Backend(format!("delete not supported for {:?}", id)))
    }

    /// Delete every entity of the family.
    async fn clear(&self) -> Result<ClearOutcome, DomainError> {
        Err(DomainError::Backend("clear not supported".to_string()))
    }
}

/// Port for the aggregate usage statistics pull.
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn aggregate_stats(&self) -> Result<UsageStats, DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_dispose_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let disposer = Disposer::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!disposer.is_disposed());
        assert!(disposer.dispose());
        assert!(!disposer.dispose());
        assert!(disposer.is_disposed());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_noop_disposer() {
        let disposer = Disposer::noop();
        assert!(!disposer.dispose());
    }
}
