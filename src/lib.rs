//! Client-side synchronization core for a dictation app.
//!
//! Mirrors backend-owned entities (transcriptions, notes, actions, usage
//! stats) into observable in-memory stores, drives per-model download
//! lifecycles, and resolves model catalogs from remote endpoints.

#![forbid(unsafe_code)]

pub mod adapters;
pub mod app;
pub mod catalog;
pub mod domain;
pub mod infrastructure;
pub mod ports;
pub mod store;
pub mod stores;
pub mod tasks;

#[cfg(test)]
mod test_support;

pub use app::{AppController, Backends};
pub use catalog::{CatalogEntry, CatalogResolver, SelectionUpdate};
pub use domain::{AppConfig, DomainError, ErrorKind, ModelFamily, ModelSelection, TaskKey, TaskStatus};
pub use store::{Store, Subscription};
pub use stores::{ActionsStore, NotesStore, StatsStore, TranscriptionStore};
pub use tasks::{DownloadManager, TaskHandle};
