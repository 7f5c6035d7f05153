use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};

use futures_util::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::domain::{DomainError, Entity};
use crate::ports::EntitySource;
use crate::store::binder::{bind_push_events, ListenerBinding};
use crate::store::listeners::{ListenerRegistry, Subscription};
use crate::store::pull::PullGuard;

/// Where newly seen entities go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Newest first; trimming drops from the back.
    Front,
    /// Oldest first; trimming drops from the front.
    Back,
}

/// Entity-specific rules for a [`Store`].
pub struct StorePolicy<T> {
    /// Maximum length, enforced after every insert.
    pub capacity: Option<usize>,
    pub placement: Placement,
    /// Explicit sort key; when set, the list is re-sorted after each mutation.
    pub order: Option<fn(&T, &T) -> CmpOrdering>,
}

impl<T> Default for StorePolicy<T> {
    fn default() -> Self {
        Self {
            capacity: None,
            placement: Placement::Back,
            order: None,
        }
    }
}

impl<T> Clone for StorePolicy<T> {
    fn clone(&self) -> Self {
        Self {
            capacity: self.capacity,
            placement: self.placement,
            order: self.order,
        }
    }
}

/// Predicate deciding which entities belong in the store.
pub type Admission<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

struct StoreState<T: Entity> {
    items: Arc<Vec<T>>,
    admission: Option<Admission<T>>,
    /// Bumped on every local or pushed mutation.
    seq: u64,
    /// Pulls started but not yet applied.
    pulls_in_flight: usize,
    /// Last mutation seq per id, recorded only while a pull is in flight.
    touched: HashMap<T::Id, u64>,
}

impl<T: Entity> StoreState<T> {
    fn admits(&self, entity: &T) -> bool {
        self.admission.as_ref().map_or(true, |admit| admit(entity))
    }

    fn touch(&mut self, id: &T::Id) {
        self.seq += 1;
        if self.pulls_in_flight > 0 {
            self.touched.insert(id.clone(), self.seq);
        }
    }
}

struct StoreInner<T: Entity> {
    name: &'static str,
    policy: StorePolicy<T>,
    source: Arc<dyn EntitySource<T>>,
    state: Mutex<StoreState<T>>,
    listeners: ListenerRegistry,
    pulls: PullGuard<Arc<Vec<T>>>,
    binding: ListenerBinding,
}

/// Snapshot-holding, subscribable list of entities mirrored from the backend.
///
/// Cloning is cheap and yields a handle to the same store.
pub struct Store<T: Entity> {
    inner: Arc<StoreInner<T>>,
}

impl<T: Entity> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Non-owning handle used by push callbacks.
pub struct WeakStore<T: Entity> {
    inner: Weak<StoreInner<T>>,
}

impl<T: Entity> WeakStore<T> {
    pub fn upgrade(&self) -> Option<Store<T>> {
        self.inner.upgrade().map(|inner| Store { inner })
    }
}

impl<T: Entity> Store<T> {
    pub fn new(name: &'static str, policy: StorePolicy<T>, source: Arc<dyn EntitySource<T>>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                name,
                policy,
                source,
                state: Mutex::new(StoreState {
                    items: Arc::new(Vec::new()),
                    admission: None,
                    seq: 0,
                    pulls_in_flight: 0,
                    touched: HashMap::new(),
                }),
                listeners: ListenerRegistry::new(),
                pulls: PullGuard::new(),
                binding: ListenerBinding::new(name),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub(crate) fn source(&self) -> &Arc<dyn EntitySource<T>> {
        &self.inner.source
    }

    pub fn downgrade(&self) -> WeakStore<T> {
        WeakStore {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Pull the initial snapshot and attach push listeners.
    ///
    /// While a pull is outstanding, further calls join it instead of
    /// issuing another backend request. Listeners are bound once per store
    /// no matter how often this is called. On failure the current snapshot
    /// is left untouched and the error is returned.
    pub async fn initialize(&self, query: T::Query) -> Result<Arc<Vec<T>>, DomainError> {
        self.bind_push_listeners();

        let (future, started) = self.inner.pulls.join_or_start(|ticket| {
            let since = self.begin_pull();
            let source = self.inner.source.clone();
            let weak = self.downgrade();
            let name = self.inner.name;
            async move {
                debug!(store = name, ticket, "Pull started");
                let result = source.fetch(&query).await;
                match weak.upgrade() {
                    Some(store) => {
                        let applied = store.apply_pull(since, result);
                        store.inner.pulls.finish(ticket);
                        applied
                    }
                    None => result.map(Arc::new),
                }
            }
            .boxed()
        });
        if !started {
            debug!(store = self.inner.name, "Joining in-flight pull");
        }
        future.await
    }

    /// Attach push listeners if not already attached.
    pub fn bind_push_listeners(&self) -> bool {
        self.inner
            .binding
            .ensure_bound(|| bind_push_events(self, self.inner.source.as_ref()))
    }

    /// Detach push listeners. Called once at process teardown.
    pub fn teardown_listeners(&self) -> usize {
        self.inner.binding.teardown()
    }

    pub fn listeners_bound(&self) -> bool {
        self.inner.binding.is_bound()
    }

    pub fn pull_in_flight(&self) -> bool {
        self.inner.pulls.in_flight()
    }

    /// Current immutable view. The same `Arc` is returned until the next change.
    pub fn snapshot(&self) -> Arc<Vec<T>> {
        self.inner.state.lock().items.clone()
    }

    pub fn get(&self, id: &T::Id) -> Option<T> {
        self.inner
            .state
            .lock()
            .items
            .iter()
            .find(|e| e.id() == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.inner.listeners.subscribe(listener)
    }

    /// Insert a new entity or replace the one with the same id in place.
    ///
    /// Entities rejected by the admission predicate are not stored; if an
    /// older version is present it leaves the store. Returns true if the
    /// snapshot changed.
    pub fn upsert(&self, entity: T) -> bool {
        let changed = {
            let mut state = self.inner.state.lock();
            let id = entity.id().clone();
            state.touch(&id);
            let position = state.items.iter().position(|e| e.id() == &id);

            if !state.admits(&entity) {
                match position {
                    Some(index) => {
                        let mut items = state.items.as_ref().clone();
                        items.remove(index);
                        state.items = Arc::new(items);
                        true
                    }
                    None => {
                        debug!(store = self.inner.name, id = ?id, "Dropped entity outside store scope");
                        false
                    }
                }
            } else {
                match position {
                    Some(index) if state.items[index] == entity => false,
                    Some(index) => {
                        let mut items = state.items.as_ref().clone();
                        items[index] = entity;
                        self.arrange(&mut items);
                        state.items = Arc::new(items);
                        true
                    }
                    None => {
                        let mut items = state.items.as_ref().clone();
                        match self.inner.policy.placement {
                            Placement::Front => items.insert(0, entity),
                            Placement::Back => items.push(entity),
                        }
                        self.arrange(&mut items);
                        // Capacity zero trims the newcomer straight away.
                        if items == *state.items {
                            false
                        } else {
                            state.items = Arc::new(items);
                            true
                        }
                    }
                }
            }
        };

        if changed {
            self.inner.listeners.notify();
        }
        changed
    }

    /// Remove by id. Absent ids are a silent no-op with no notification.
    pub fn remove(&self, id: &T::Id) -> bool {
        let changed = {
            let mut state = self.inner.state.lock();
            // Recorded even when absent so an in-flight pull cannot resurrect it.
            state.touch(id);
            match state.items.iter().position(|e| e.id() == id) {
                Some(index) => {
                    let mut items = state.items.as_ref().clone();
                    items.remove(index);
                    state.items = Arc::new(items);
                    true
                }
                None => false,
            }
        };

        if changed {
            self.inner.listeners.notify();
        }
        changed
    }

    /// Drop every entity locally. Returns the number removed.
    pub fn clear(&self) -> usize {
        let removed = {
            let mut state = self.inner.state.lock();
            let ids: Vec<T::Id> = state.items.iter().map(|e| e.id().clone()).collect();
            for id in &ids {
                state.touch(id);
            }
            if !ids.is_empty() {
                state.items = Arc::new(Vec::new());
            }
            ids.len()
        };

        if removed > 0 {
            self.inner.listeners.notify();
        }
        removed
    }

    /// Replace the admission predicate and drop entities it rejects.
    pub fn set_admission(&self, admission: Option<Admission<T>>) -> bool {
        let changed = {
            let mut state = self.inner.state.lock();
            state.admission = admission;
            let before = state.items.len();
            let kept: Vec<T> = state
                .items
                .iter()
                .filter(|e| state.admits(e))
                .cloned()
                .collect();
            let changed = kept.len() != before;
            if changed {
                state.items = Arc::new(kept);
            }
            changed
        };

        if changed {
            self.inner.listeners.notify();
        }
        changed
    }

    /// Notify subscribers of a change held outside the entity list.
    pub(crate) fn notify_listeners(&self) {
        self.inner.listeners.notify();
    }

    fn begin_pull(&self) -> u64 {
        let mut state = self.inner.state.lock();
        state.pulls_in_flight += 1;
        state.seq
    }

    /// Merge a pull result: pulled entities win unless a push touched the
    /// same id after the pull was issued, and entities pushed since then
    /// survive even if the pull does not list them.
    fn apply_pull(
        &self,
        since: u64,
        result: Result<Vec<T>, DomainError>,
    ) -> Result<Arc<Vec<T>>, DomainError> {
        let outcome = {
            let mut state = self.inner.state.lock();
            state.pulls_in_flight = state.pulls_in_flight.saturating_sub(1);

            let outcome = match result {
                Err(e) => Err(e),
                Ok(pulled) => {
                    let merged = self.merge(&state, since, pulled);
                    let changed = merged != *state.items;
                    if changed {
                        state.items = Arc::new(merged);
                    }
                    Ok((state.items.clone(), changed))
                }
            };

            if state.pulls_in_flight == 0 {
                state.touched.clear();
            }
            outcome
        };

        match outcome {
            Ok((items, changed)) => {
                info!(store = self.inner.name, count = items.len(), changed, "Pull applied");
                if changed {
                    self.inner.listeners.notify();
                }
                Ok(items)
            }
            Err(e) => {
                warn!(store = self.inner.name, error = %e, "Pull failed, keeping last snapshot");
                Err(e)
            }
        }
    }

    fn merge(&self, state: &StoreState<T>, since: u64, pulled: Vec<T>) -> Vec<T> {
        let is_recent = |id: &T::Id| state.touched.get(id).is_some_and(|seq| *seq > since);
        let local = |id: &T::Id| state.items.iter().find(|e| e.id() == id);

        let mut seen: HashSet<T::Id> = HashSet::with_capacity(pulled.len());
        let mut merged: Vec<T> = Vec::with_capacity(pulled.len());
        for entity in pulled {
            let id = entity.id().clone();
            if !seen.insert(id.clone()) {
                continue;
            }
            if is_recent(&id) {
                // Pushed state is newer; a missing local copy means it was deleted.
                if let Some(current) = local(&id) {
                    merged.push(current.clone());
                }
            } else {
                merged.push(entity);
            }
        }

        let pushed: Vec<T> = state
            .items
            .iter()
            .filter(|e| is_recent(e.id()) && !seen.contains(e.id()))
            .cloned()
            .collect();
        if !pushed.is_empty() {
            merged = match self.inner.policy.placement {
                Placement::Front => pushed.into_iter().chain(merged).collect(),
                Placement::Back => merged.into_iter().chain(pushed).collect(),
            };
        }

        merged.retain(|e| state.admits(e));
        self.arrange(&mut merged);
        merged
    }

    /// Apply ordering, then the capacity cap.
    fn arrange(&self, items: &mut Vec<T>) {
        let policy = &self.inner.policy;
        if let Some(order) = policy.order {
            items.sort_by(order);
        }
        if let Some(capacity) = policy.capacity {
            if items.len() > capacity {
                let excess = items.len() - capacity;
                match (policy.order, policy.placement) {
                    (None, Placement::Back) => {
                        items.drain(..excess);
                    }
                    _ => items.truncate(capacity),
                }
                debug!(store = self.inner.name, evicted = excess, "Trimmed to capacity");
            }
        }
    }
}

impl<T: Entity> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.inner.name)
            .field("len", &self.len())
            .field("bound", &self.listeners_bound())
            .finish()
    }
}
