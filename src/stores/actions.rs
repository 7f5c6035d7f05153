use std::cmp::Ordering;
use std::sync::Arc;

use crate::domain::{Action, DomainError};
use crate::ports::EntitySource;
use crate::store::{Placement, Store, StorePolicy, Subscription};

fn by_sort_order(a: &Action, b: &Action) -> Ordering {
    a.sort_order.cmp(&b.sort_order).then(a.id.cmp(&b.id))
}

/// Post-processing actions, always ordered by `sort_order`.
#[derive(Clone, Debug)]
pub struct ActionsStore {
    store: Store<Action>,
}

impl ActionsStore {
    pub fn new(source: Arc<dyn EntitySource<Action>>) -> Self {
        let policy = StorePolicy {
            capacity: None,
            placement: Placement::Back,
            order: Some(by_sort_order),
        };
        Self {
            store: Store::new("actions", policy, source),
        }
    }

    pub async fn initialize(&self) -> Result<Arc<Vec<Action>>, DomainError> {
        self.store.initialize(()).await
    }

    pub fn upsert(&self, action: Action) -> bool {
        self.store.upsert(action)
    }

    pub fn remove(&self, id: i64) -> bool {
        self.store.remove(&id)
    }

    pub fn snapshot(&self) -> Arc<Vec<Action>> {
        self.store.snapshot()
    }

    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.store.subscribe(listener)
    }

    pub fn store(&self) -> &Store<Action> {
        &self.store
    }
}
