use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Zero-argument change callback.
pub type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct RegistryInner {
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
    /// A fan-out is running.
    notifying: AtomicBool,
    /// A notification was requested and not yet delivered.
    pending: AtomicBool,
}

impl RegistryInner {
    fn is_registered(&self, id: u64) -> bool {
        self.listeners.lock().iter().any(|(i, _)| *i == id)
    }

    fn remove(&self, id: u64) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(i, _)| *i != id);
        listeners.len() != before
    }
}

/// Set of change listeners with reentrancy-safe fan-out.
///
/// Listeners run without any lock held. A listener may unsubscribe itself
/// or a sibling mid fan-out; a removed sibling that has not run yet is
/// skipped, every other sibling runs exactly once. A notification raised
/// from inside a listener is queued and delivered as a fresh fan-out after
/// the current one finishes.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    inner: Arc<RegistryInner>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        Subscription {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notify every listener once.
    pub fn notify(&self) {
        let inner = &self.inner;
        inner.pending.store(true, Ordering::Release);
        if inner.notifying.swap(true, Ordering::AcqRel) {
            // The running fan-out picks up the pending flag.
            return;
        }

        loop {
            while inner.pending.swap(false, Ordering::AcqRel) {
                self.fan_out();
            }
            inner.notifying.store(false, Ordering::Release);
            // Re-check: a request may have landed between the last swap and the store.
            if !inner.pending.load(Ordering::Acquire)
                || inner.notifying.swap(true, Ordering::AcqRel)
            {
                break;
            }
        }
    }

    fn fan_out(&self) {
        let snapshot: Vec<(u64, Listener)> = self.inner.listeners.lock().clone();
        for (id, listener) in snapshot {
            if self.inner.is_registered(id) {
                listener();
            }
        }
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

/// Handle returned by `subscribe`.
///
/// Dropping it does not unsubscribe; call [`Subscription::unsubscribe`].
#[derive(Clone)]
pub struct Subscription {
    id: u64,
    registry: Weak<RegistryInner>,
}

impl Subscription {
    /// Remove the listener. Returns false if it was already removed.
    pub fn unsubscribe(&self) -> bool {
        match self.registry.upgrade() {
            Some(inner) => inner.remove(self.id),
            None => false,
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
