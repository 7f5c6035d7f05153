use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::domain::DomainError;

/// A pull that any number of callers can await.
pub type PullFuture<V> = Shared<BoxFuture<'static, Result<V, DomainError>>>;

struct PullState<V: Clone> {
    inflight: Option<(u64, PullFuture<V>)>,
    next_ticket: u64,
}

/// Single-flight guard: at most one outstanding pull per store.
///
/// The pull future itself is responsible for calling [`PullGuard::finish`]
/// with its ticket once it has applied its result.
pub struct PullGuard<V: Clone> {
    state: Mutex<PullState<V>>,
}

impl<V> PullGuard<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PullState {
                inflight: None,
                next_ticket: 0,
            }),
        }
    }

    /// Join the in-flight pull, or start one with `start(ticket)`.
    ///
    /// Returns the future and whether this call started it.
    pub fn join_or_start<F>(&self, start: F) -> (PullFuture<V>, bool)
    where
        F: FnOnce(u64) -> BoxFuture<'static, Result<V, DomainError>>,
    {
        let mut state = self.state.lock();
        if let Some((_, future)) = &state.inflight {
            return (future.clone(), false);
        }
        let future = Self::launch(&mut state, start);
        (future, true)
    }

    /// Start a pull even if one is already in flight. Later callers join this one.
    pub fn force<F>(&self, start: F) -> PullFuture<V>
    where
        F: FnOnce(u64) -> BoxFuture<'static, Result<V, DomainError>>,
    {
        let mut state = self.state.lock();
        Self::launch(&mut state, start)
    }

    fn launch<F>(state: &mut PullState<V>, start: F) -> PullFuture<V>
    where
        F: FnOnce(u64) -> BoxFuture<'static, Result<V, DomainError>>,
    {
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        let future = start(ticket).shared();
        state.inflight = Some((ticket, future.clone()));
        future
    }

    /// Clear the in-flight slot if it still belongs to `ticket`.
    pub fn finish(&self, ticket: u64) {
        let mut state = self.state.lock();
        if matches!(&state.inflight, Some((t, _)) if *t == ticket) {
            state.inflight = None;
        }
    }

    pub fn in_flight(&self) -> bool {
        self.state.lock().inflight.is_some()
    }
}

impl<V> Default for PullGuard<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
