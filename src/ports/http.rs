use std::time::Duration;

use async_trait::async_trait;

use crate::domain::DomainError;

/// HTTP client port for remote catalog requests.
/// All network traffic must go through this interface.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Perform a GET request and return the body.
    ///
    /// `bearer` is sent as an `Authorization: Bearer` header when present.
    /// Non-success statuses are errors.
    async fn get(&self, url: &str, bearer: Option<&str>) -> Result<String, DomainError>;

    /// Change the per-request timeout for requests started after this call.
    fn set_timeout(&self, _timeout: Duration) {}
}
