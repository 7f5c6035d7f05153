use thiserror::Error;

/// How a failure should be treated by callers.
///
/// Push events for unknown or filtered-out ids are not errors: store
/// mutations report them as a `false` return and drop them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Pull or catalog fetch failed; last-good state is kept and the caller may retry.
    TransientFetch,
    /// A download or install failed; the task shows the message until retried.
    TaskFailure,
    /// Absorbed by ordering rules and never shown to the user.
    RaceResolved,
    /// Bad configuration or input that a retry will not fix.
    Configuration,
}

/// Domain-level errors for the synchronization core.
///
/// `Clone` so a single in-flight result can be handed to every joined caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("HTTP request failed: {0}")]
    HttpRequest(String),

    #[error("Backend call failed: {0}")]
    Backend(String),

    #[error("Invalid endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("Insecure endpoint rejected: {url} (use https or a local-network address)")]
    InsecureEndpoint { url: String },

    #[error("Request for {key} was superseded")]
    Superseded { key: String },

    #[error("Model task {key} is busy ({status})")]
    TaskBusy { key: String, status: String },

    #[error("Model download failed: {0}")]
    ModelDownload(String),
}

impl DomainError {
    /// Classify this error for display decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::HttpRequest(_) | DomainError::Backend(_) | DomainError::Io(_) => {
                ErrorKind::TransientFetch
            }
            DomainError::Serialization(_) => ErrorKind::TransientFetch,
            DomainError::ModelDownload(_) => ErrorKind::TaskFailure,
            DomainError::Superseded { .. } => ErrorKind::RaceResolved,
            DomainError::Config(_)
            | DomainError::InvalidEndpoint { .. }
            | DomainError::InsecureEndpoint { .. }
            | DomainError::TaskBusy { .. } => ErrorKind::Configuration,
        }
    }

    /// True for errors the user should never see.
    pub fn is_race_resolved(&self) -> bool {
        self.kind() == ErrorKind::RaceResolved
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for DomainError {
    fn from(err: toml::de::Error) -> Self {
        DomainError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for DomainError {
    fn from(err: toml::ser::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}
