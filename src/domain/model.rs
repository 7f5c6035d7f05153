use std::fmt;

use serde::{Deserialize, Serialize};

/// A group of interchangeable models (e.g. "whisper", "parakeet").
///
/// Tasks in different families never share state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelFamily(String);

impl ModelFamily {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModelFamily {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Unit of mutual exclusion for model tasks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub family: ModelFamily,
    pub model_id: String,
}

impl TaskKey {
    pub fn new(family: impl Into<ModelFamily>, model_id: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            model_id: model_id.into(),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.family, self.model_id)
    }
}

/// Download task state machine.
///
/// State transitions:
/// - Idle -> Downloading (download)
/// - Downloading -> Installing (backend reports install phase)
/// - Downloading | Installing -> Done (backend reports completion)
/// - Downloading -> Cancelling (cancel)
/// - Cancelling -> Idle (backend confirms abort)
/// - Cancelling -> Done (backend completed before honouring the abort)
/// - any -> Error (failure); Error | Done -> Downloading (retry)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Idle,
    Downloading,
    Installing,
    Cancelling,
    Done,
    Error,
}

impl TaskStatus {
    /// True while a backend operation is outstanding for the key.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TaskStatus::Downloading | TaskStatus::Installing | TaskStatus::Cancelling
        )
    }

    #[must_use]
    pub fn can_cancel(&self) -> bool {
        matches!(self, TaskStatus::Downloading)
    }

    #[must_use]
    pub fn can_delete(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Idle => "idle",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Installing => "installing",
            TaskStatus::Cancelling => "cancelling",
            TaskStatus::Done => "done",
            TaskStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Observable state of one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub status: TaskStatus,
    /// Percentage 0-100, never decreasing within one task.
    pub progress: f32,
    pub error: Option<String>,
}

impl TaskSnapshot {
    pub fn idle() -> Self {
        Self {
            status: TaskStatus::Idle,
            progress: 0.0,
            error: None,
        }
    }

    pub(crate) fn downloading() -> Self {
        Self {
            status: TaskStatus::Downloading,
            ..Self::idle()
        }
    }

    /// Raise progress, ignoring regressions and clamping to 0-100.
    /// Returns true if the value changed.
    pub(crate) fn advance(&mut self, percent: f32) -> bool {
        let percent = if percent.is_finite() {
            percent.clamp(0.0, 100.0)
        } else {
            return false;
        };
        if percent > self.progress {
            self.progress = percent;
            true
        } else {
            false
        }
    }
}

/// Progress event emitted by the backend while a download runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownloadEvent {
    /// Transfer progress, percentage 0-100.
    Progress { percent: f32 },
    /// Transfer finished, unpacking/installing.
    Installing,
    /// Model is installed and usable.
    Complete,
}

/// How the backend's download call resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    Completed,
    Cancelled,
}

/// A model known to the backend for one family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalModel {
    pub id: String,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    pub downloaded: bool,
}

/// An option in a remote model catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOption {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub owned_by: Option<String>,
}
