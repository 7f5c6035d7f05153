pub mod config;
pub mod endpoint;
pub mod entity;
pub mod error;
pub mod model;
pub mod selection;

pub use config::AppConfig;
pub use endpoint::{Endpoint, EndpointPolicy, HostScope};
pub use entity::{
    Action, ClearOutcome, DeleteOutcome, Entity, EntityDeleted, HistoryQuery, Note, NoteQuery,
    Transcription, UsageStats,
};
pub use error::{DomainError, ErrorKind};
pub use model::{
    DownloadEvent, DownloadOutcome, LocalModel, ModelFamily, ModelOption, TaskKey, TaskSnapshot,
    TaskStatus,
};
pub use selection::ModelSelection;
