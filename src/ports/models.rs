use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::{DomainError, DownloadEvent, DownloadOutcome, LocalModel, ModelFamily};

/// Channel on which the backend reports download progress.
pub type ProgressSender = mpsc::UnboundedSender<DownloadEvent>;

/// Port for the backend's model lifecycle methods.
///
/// Implementations own the actual transfer and storage; the task manager
/// only drives and observes them.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// List every model of a family with its download state.
    async fn list_models(&self, family: &ModelFamily) -> Result<Vec<LocalModel>, DomainError>;

    /// Download and install a model.
    ///
    /// Progress is reported on `progress` while the call is pending. The
    /// call resolves with `Cancelled` once an abort requested through
    /// `cancel_download` has taken effect.
    async fn download_model(
        &self,
        family: &ModelFamily,
        model_id: &str,
        progress: ProgressSender,
    ) -> Result<DownloadOutcome, DomainError>;

    /// Ask the backend to abort a running download.
    ///
    /// Cooperative: returning does not mean the transfer has stopped.
    async fn cancel_download(&self, family: &ModelFamily, model_id: &str)
        -> Result<(), DomainError>;

    /// Remove a downloaded model from disk.
    async fn delete_model(&self, family: &ModelFamily, model_id: &str) -> Result<(), DomainError>;
}
