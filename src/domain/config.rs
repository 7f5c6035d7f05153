use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::EndpointPolicy;

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Enable file logging with rotation.
    pub file_logging: bool,
    /// Maximum number of log files to keep.
    pub max_files: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_logging: true,
            max_files: 7,
        }
    }
}

/// Limits for the entity stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum transcriptions kept in the history store.
    pub transcription_history_limit: usize,
    /// Page size for the notes pull.
    pub notes_page_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            transcription_history_limit: 50,
            notes_page_limit: 100,
        }
    }
}

/// Remote model catalog configuration.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Base URL of an OpenAI-compatible API.
    pub base_url: String,
    /// Optional bearer token.
    pub api_key: Option<String>,
    /// Permit plain HTTP to private-network hosts.
    pub allow_local_network: bool,
    /// Per-request timeout.
    pub request_timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            allow_local_network: true,
            request_timeout_secs: 30,
        }
    }
}

impl CatalogConfig {
    pub fn policy(&self) -> EndpointPolicy {
        EndpointPolicy {
            allow_local_network: self.allow_local_network,
        }
    }
}

// Manual Debug so the key never reaches a log line.
impl std::fmt::Debug for CatalogConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("allow_local_network", &self.allow_local_network)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Local model selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Selected model id per family.
    pub selected: HashMap<String, String>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        let mut selected = HashMap::new();
        selected.insert("whisper".to_string(), "base".to_string());
        Self { selected }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub stores: StoreConfig,
    pub catalog: CatalogConfig,
    pub models: ModelsConfig,
}

impl AppConfig {
    /// Create a new AppConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [catalog]
            base_url = "http://localhost:11434/v1"
            "#,
        )
        .unwrap();
        assert_eq!(config.catalog.base_url, "http://localhost:11434/v1");
        assert_eq!(config.catalog.request_timeout_secs, 30);
        assert_eq!(config.stores.transcription_history_limit, 50);
        assert_eq!(config.models.selected.get("whisper").map(String::as_str), Some("base"));
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let mut config = CatalogConfig::default();
        config.api_key = Some("sk-secret".to_string());
        let printed = format!("{:?}", config);
        assert!(!printed.contains("sk-secret"));
        assert!(printed.contains("<redacted>"));
    }
}
