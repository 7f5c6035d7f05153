pub mod backend;
pub mod config;
pub mod http;
pub mod models;

pub use backend::{Disposer, EntitySource, PushCallback, StatsSource};
pub use config::ConfigStore;
pub use http::HttpClient;
pub use models::{ModelBackend, ProgressSender};
