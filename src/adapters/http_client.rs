use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use tracing::{debug, info};

use crate::domain::config::CatalogConfig;
use crate::domain::DomainError;
use crate::ports::HttpClient;

/// reqwest-backed client for catalog requests.
///
/// Endpoint policy is checked by the caller before a URL reaches this
/// client; the client itself only enforces the timeout.
pub struct ReqwestHttpClient {
    client: Client,
    timeout: RwLock<Duration>,
}

impl ReqwestHttpClient {
    pub fn new(timeout: Duration) -> Result<Self, DomainError> {
        let client = Client::builder()
            .use_rustls_tls()
            .user_agent(format!("dictation-core/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DomainError::HttpRequest(format!("Failed to create HTTP client: {}", e)))?;

        info!(timeout_secs = timeout.as_secs(), "HTTP client initialized");
        Ok(Self {
            client,
            timeout: RwLock::new(timeout),
        })
    }

    pub fn from_config(config: &CatalogConfig) -> Result<Self, DomainError> {
        Self::new(timeout_of(config))
    }

    pub fn timeout(&self) -> Duration {
        *self.timeout.read()
    }
}

/// Request timeout from config, at least one second.
pub fn timeout_of(config: &CatalogConfig) -> Duration {
    Duration::from_secs(config.request_timeout_secs.max(1))
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, url: &str, bearer: Option<&str>) -> Result<String, DomainError> {
        let mut request = self.client.get(url).timeout(self.timeout());
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        debug!(url = url, authenticated = bearer.is_some(), "GET");

        let response = request
            .send()
            .await
            .map_err(|e| DomainError::HttpRequest(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DomainError::HttpRequest(format!(
                "HTTP {} for {}",
                status, url
            )));
        }

        response
            .text()
            .await
            .map_err(|e| DomainError::HttpRequest(e.to_string()))
    }

    fn set_timeout(&self, timeout: Duration) {
        info!(timeout_secs = timeout.as_secs(), "HTTP timeout updated");
        *self.timeout.write() = timeout;
    }
}
