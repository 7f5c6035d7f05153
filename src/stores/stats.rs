use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::domain::{DomainError, UsageStats};
use crate::ports::StatsSource;
use crate::store::{ListenerRegistry, PullGuard, Subscription};

#[derive(Default)]
struct StatsState {
    current: Option<Arc<UsageStats>>,
    /// Ticket of the newest pull whose result was applied.
    applied: Option<u64>,
}

struct StatsInner {
    source: Arc<dyn StatsSource>,
    state: Mutex<StatsState>,
    listeners: ListenerRegistry,
    pulls: PullGuard<Arc<UsageStats>>,
}

/// Single-entity snapshot of aggregate usage statistics.
#[derive(Clone)]
pub struct StatsStore {
    inner: Arc<StatsInner>,
}

impl StatsStore {
    pub fn new(source: Arc<dyn StatsSource>) -> Self {
        Self {
            inner: Arc::new(StatsInner {
                source,
                state: Mutex::new(StatsState::default()),
                listeners: ListenerRegistry::new(),
                pulls: PullGuard::new(),
            }),
        }
    }

    /// Pull the stats, joining a pull already in flight.
    pub async fn initialize(&self) -> Result<Arc<UsageStats>, DomainError> {
        let (future, _) = self.inner.pulls.join_or_start(|ticket| self.pull(ticket));
        future.await
    }

    /// Pull again even if a pull is in flight. Use after mutations known
    /// to invalidate the stats.
    pub async fn refresh(&self) -> Result<Arc<UsageStats>, DomainError> {
        let future = self.inner.pulls.force(|ticket| self.pull(ticket));
        future.await
    }

    fn pull(
        &self,
        ticket: u64,
    ) -> futures_util::future::BoxFuture<'static, Result<Arc<UsageStats>, DomainError>> {
        let source = self.inner.source.clone();
        let weak = Arc::downgrade(&self.inner);
        async move {
            debug!(ticket, "Stats pull started");
            let result = source.aggregate_stats().await;
            match weak.upgrade() {
                Some(inner) => {
                    let store = StatsStore { inner };
                    let applied = store.apply(ticket, result);
                    store.inner.pulls.finish(ticket);
                    applied
                }
                None => result.map(Arc::new),
            }
        }
        .boxed()
    }

    fn apply(
        &self,
        ticket: u64,
        result: Result<UsageStats, DomainError>,
    ) -> Result<Arc<UsageStats>, DomainError> {
        let stats = match result {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "Stats pull failed, keeping last snapshot");
                return Err(e);
            }
        };

        let (current, changed) = {
            let mut state = self.inner.state.lock();
            if let (Some(applied), Some(current)) = (state.applied, &state.current) {
                if applied > ticket {
                    debug!(ticket, applied, "Discarding stale stats pull");
                    return Ok(current.clone());
                }
            }
            state.applied = Some(ticket);
            Self::replace_locked(&mut state, stats)
        };

        if changed {
            self.inner.listeners.notify();
        }
        Ok(current)
    }

    /// Full replace. Returns true if the value changed.
    pub fn replace(&self, stats: UsageStats) -> bool {
        let (_, changed) = Self::replace_locked(&mut self.inner.state.lock(), stats);
        if changed {
            self.inner.listeners.notify();
        }
        changed
    }

    fn replace_locked(state: &mut StatsState, stats: UsageStats) -> (Arc<UsageStats>, bool) {
        if let Some(current) = &state.current {
            if **current == stats {
                return (current.clone(), false);
            }
        }
        let current = Arc::new(stats);
        state.current = Some(current.clone());
        (current, true)
    }

    /// Current stats; the same `Arc` until the next change.
    pub fn snapshot(&self) -> Option<Arc<UsageStats>> {
        self.inner.state.lock().current.clone()
    }

    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.inner.listeners.subscribe(listener)
    }
}

impl std::fmt::Debug for StatsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsStore")
            .field("current", &self.snapshot())
            .finish()
    }
}
