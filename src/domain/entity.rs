use std::fmt::Debug;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// A record mirrored from the backend and held in a store.
pub trait Entity: Clone + PartialEq + Debug + Send + Sync + 'static {
    /// Caller-assigned unique identifier.
    type Id: Clone + Eq + Hash + Debug + Send + Sync + 'static;
    /// Parameters for the initial pull.
    type Query: Clone + Debug + Send + Sync + 'static;

    fn id(&self) -> &Self::Id;
}

/// Payload of a backend "deleted" push event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDeleted<Id> {
    pub id: Id,
}

/// Result of a backend delete call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Result of a backend clear call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearOutcome {
    pub cleared: u64,
}

/// A finished dictation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub id: i64,
    pub text: String,
    /// Creation time as milliseconds since the Unix epoch.
    pub created_at: i64,
    #[serde(default)]
    pub raw_text: Option<String>,
}

/// Pull parameters for transcription history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryQuery {
    pub limit: usize,
}

impl Entity for Transcription {
    type Id = i64;
    type Query = HistoryQuery;

    fn id(&self) -> &i64 {
        &self.id
    }
}

/// A note, optionally filed in a folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: i64,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub folder_id: Option<String>,
    pub updated_at: i64,
}

/// Pull parameters for notes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteQuery {
    /// Restrict the pull to one folder; `None` means every folder.
    pub folder_id: Option<String>,
    pub limit: usize,
}

impl Entity for Note {
    type Id = i64;
    type Query = NoteQuery;

    fn id(&self) -> &i64 {
        &self.id
    }
}

/// A user-defined post-processing action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: i64,
    pub name: String,
    pub prompt: String,
    /// Display position; lower sorts first.
    pub sort_order: i64,
    #[serde(default)]
    pub is_builtin: bool,
}

impl Entity for Action {
    type Id = i64;
    type Query = ();

    fn id(&self) -> &i64 {
        &self.id
    }
}

/// Aggregate usage numbers. Held as a single snapshot, not a list.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UsageStats {
    pub total_transcriptions: u64,
    pub total_words: u64,
    pub total_audio_seconds: f64,
    #[serde(default)]
    pub words_per_minute: Option<f64>,
}
