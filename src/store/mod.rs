//! Store Core: generic snapshot/subscribe containers kept in sync with the
//! backend through one initial pull and a stream of push events.

pub mod binder;
pub mod collection;
pub mod listeners;
pub mod pull;

pub use binder::{BindingState, ListenerBinding};
pub use collection::{Admission, Placement, Store, StorePolicy, WeakStore};
pub use listeners::{Listener, ListenerRegistry, Subscription};
pub use pull::{PullFuture, PullGuard};
