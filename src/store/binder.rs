use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::domain::{Entity, EntityDeleted};
use crate::ports::{Disposer, EntitySource};
use crate::store::Store;

/// Lifecycle of a store's push-listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BindingState {
    Unbound = 0,
    Binding = 1,
    Bound = 2,
    TornDown = 3,
}

impl From<u8> for BindingState {
    fn from(value: u8) -> Self {
        match value {
            0 => BindingState::Unbound,
            1 => BindingState::Binding,
            2 => BindingState::Bound,
            _ => BindingState::TornDown,
        }
    }
}

/// One-shot "listeners attached" flag plus the disposers it recorded.
///
/// Entry is guarded by a compare-and-swap so reentrant or concurrent
/// callers never register twice. Once torn down it stays torn down.
#[derive(Debug)]
pub struct ListenerBinding {
    name: &'static str,
    state: AtomicU8,
    disposers: Mutex<Vec<Disposer>>,
}

impl ListenerBinding {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: AtomicU8::new(BindingState::Unbound as u8),
            disposers: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> BindingState {
        self.state.load(Ordering::Acquire).into()
    }

    pub fn is_bound(&self) -> bool {
        self.state() == BindingState::Bound
    }

    /// Run `bind` unless this binding was already claimed.
    ///
    /// Returns true if this call performed the registration.
    pub fn ensure_bound(&self, bind: impl FnOnce() -> Vec<Disposer>) -> bool {
        if self
            .state
            .compare_exchange(
                BindingState::Unbound as u8,
                BindingState::Binding as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            debug!(store = self.name, state = ?self.state(), "Push listeners already bound");
            return false;
        }

        let disposers = bind();
        let count = disposers.len();
        self.disposers.lock().extend(disposers);

        let promoted = self
            .state
            .compare_exchange(
                BindingState::Binding as u8,
                BindingState::Bound as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if !promoted {
            // Torn down while we were registering.
            self.dispose_all();
            return true;
        }

        info!(store = self.name, listeners = count, "Push listeners bound");
        true
    }

    /// Detach every recorded subscription. Safe to call repeatedly.
    ///
    /// Returns the number of disposers run by this call.
    pub fn teardown(&self) -> usize {
        let previous: BindingState = self
            .state
            .swap(BindingState::TornDown as u8, Ordering::AcqRel)
            .into();
        let disposed = self.dispose_all();
        if previous != BindingState::TornDown {
            info!(store = self.name, disposed, "Push listeners torn down");
        }
        disposed
    }

    fn dispose_all(&self) -> usize {
        let disposers: Vec<Disposer> = std::mem::take(&mut *self.disposers.lock());
        disposers.iter().filter(|d| d.dispose()).count()
    }
}

/// Subscribe a store to its source's added/updated/deleted events.
///
/// Callbacks hold only a weak reference, so a dropped store turns late
/// events into no-ops.
pub(crate) fn bind_push_events<T: Entity>(
    store: &Store<T>,
    source: &dyn EntitySource<T>,
) -> Vec<Disposer> {
    let added = store.downgrade();
    let updated = store.downgrade();
    let deleted = store.downgrade();

    vec![
        source.on_added(Arc::new(move |entity: T| {
            if let Some(store) = added.upgrade() {
                store.upsert(entity);
            }
        })),
        source.on_updated(Arc::new(move |entity: T| {
            if let Some(store) = updated.upgrade() {
                store.upsert(entity);
            }
        })),
        source.on_deleted(Arc::new(move |event: EntityDeleted<T::Id>| {
            if let Some(store) = deleted.upgrade() {
                store.remove(&event.id);
            }
        })),
    ]
}
