//! Per-model download lifecycle.

pub mod manager;

pub use manager::{DownloadManager, TaskHandle};
