use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use zeroize::Zeroizing;

use crate::adapters::http_client::timeout_of;
use crate::adapters::{ReqwestHttpClient, TomlConfigStore};
use crate::catalog::CatalogResolver;
use crate::domain::{
    Action, AppConfig, DomainError, LocalModel, ModelFamily, ModelOption, ModelSelection, Note,
    Transcription,
};
use crate::infrastructure::init_logging;
use crate::ports::{ConfigStore, EntitySource, HttpClient, ModelBackend, StatsSource};
use crate::stores::{ActionsStore, NotesStore, StatsStore, TranscriptionStore};
use crate::tasks::{DownloadManager, TaskHandle};

/// Backend capabilities the controller wires into its stores.
#[derive(Clone)]
pub struct Backends {
    pub transcriptions: Arc<dyn EntitySource<Transcription>>,
    pub notes: Arc<dyn EntitySource<Note>>,
    pub actions: Arc<dyn EntitySource<Action>>,
    pub stats: Arc<dyn StatsSource>,
    pub models: Arc<dyn ModelBackend>,
}

/// Composition root: one store per entity family, the download manager,
/// the catalog resolver and the model selection, all sharing one config.
pub struct AppController {
    config: Arc<RwLock<AppConfig>>,
    config_store: Arc<dyn ConfigStore>,
    http: Arc<dyn HttpClient>,
    transcriptions: TranscriptionStore,
    notes: NotesStore,
    actions: ActionsStore,
    stats: StatsStore,
    downloads: DownloadManager,
    catalog: RwLock<Arc<CatalogResolver>>,
    selection: Arc<ModelSelection>,
    shut_down: AtomicBool,
    _log_guard: Option<WorkerGuard>,
}

fn resolver(http: &Arc<dyn HttpClient>, config: &AppConfig) -> CatalogResolver {
    CatalogResolver::new(
        http.clone(),
        config.catalog.policy(),
        config.catalog.api_key.clone().map(Zeroizing::new),
    )
}

impl AppController {
    /// Load config from the OS data directory, start logging and build
    /// every component.
    pub fn new(backends: Backends) -> Result<Self, DomainError> {
        let config_store = Arc::new(TomlConfigStore::new()?);
        let config = config_store.load()?;
        let log_guard = init_logging(&config_store.logs_dir(), &config.logging)?;
        info!("Dictation core starting up");

        let http = Arc::new(ReqwestHttpClient::from_config(&config.catalog)?);
        Ok(Self::with_parts(config_store, config, backends, http, log_guard))
    }

    /// Build from already-loaded parts.
    pub fn with_parts(
        config_store: Arc<dyn ConfigStore>,
        config: AppConfig,
        backends: Backends,
        http: Arc<dyn HttpClient>,
        log_guard: Option<WorkerGuard>,
    ) -> Self {
        let limits = &config.stores;
        let controller = Self {
            transcriptions: TranscriptionStore::new(
                backends.transcriptions,
                limits.transcription_history_limit,
            ),
            notes: NotesStore::new(backends.notes, limits.notes_page_limit),
            actions: ActionsStore::new(backends.actions),
            stats: StatsStore::new(backends.stats),
            downloads: DownloadManager::new(backends.models),
            catalog: RwLock::new(Arc::new(resolver(&http, &config))),
            selection: Arc::new(ModelSelection::from_map(&config.models.selected)),
            http,
            config: Arc::new(RwLock::new(config)),
            config_store,
            shut_down: AtomicBool::new(false),
            _log_guard: log_guard,
        };
        info!(
            catalog = ?controller.config.read().catalog,
            "AppController initialized"
        );
        controller
    }

    /// Pull every store. Each failure is logged; the first is returned.
    pub async fn initialize(&self, folder: Option<String>) -> Result<(), DomainError> {
        let (transcriptions, notes, actions, stats) = tokio::join!(
            self.transcriptions.initialize(),
            self.notes.initialize(folder),
            self.actions.initialize(),
            self.stats.initialize(),
        );

        let results = [
            ("transcriptions", transcriptions.map(|_| ())),
            ("notes", notes.map(|_| ())),
            ("actions", actions.map(|_| ())),
            ("stats", stats.map(|_| ())),
        ];
        let mut first = None;
        for (store, result) in results {
            if let Err(e) = result {
                warn!(store, error = %e, "Store initialization failed");
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }

    pub fn transcriptions(&self) -> &TranscriptionStore {
        &self.transcriptions
    }

    pub fn notes(&self) -> &NotesStore {
        &self.notes
    }

    pub fn actions(&self) -> &ActionsStore {
        &self.actions
    }

    pub fn stats(&self) -> &StatsStore {
        &self.stats
    }

    pub fn downloads(&self) -> &DownloadManager {
        &self.downloads
    }

    pub fn selection(&self) -> &ModelSelection {
        &self.selection
    }

    pub fn catalog(&self) -> Arc<CatalogResolver> {
        self.catalog.read().clone()
    }

    /// Download a model and select it on completion.
    pub fn download_model(&self, family: &ModelFamily, model_id: &str) -> TaskHandle {
        let selection = self.selection.clone();
        let config = self.config.clone();
        let store = self.config_store.clone();
        let family_for_callback = family.clone();
        self.downloads.download(family, model_id, move |id| {
            selection.set(&family_for_callback, id);
            info!(family = %family_for_callback, model_id = id, "Model selected");
            persist_selection(&selection, &config, store.as_ref());
        })
    }

    pub async fn cancel_download(
        &self,
        family: &ModelFamily,
        model_id: &str,
    ) -> Result<bool, DomainError> {
        self.downloads.cancel(family, model_id).await
    }

    /// Delete a model, then persist the revalidated selection.
    pub async fn delete_model(
        &self,
        family: &ModelFamily,
        model_id: &str,
        on_after_delete: impl FnOnce(),
    ) -> Result<String, DomainError> {
        let selected = self
            .downloads
            .delete(family, model_id, &self.selection, on_after_delete)
            .await?;
        self.persist_selection();
        Ok(selected)
    }

    pub async fn list_models(&self, family: &ModelFamily) -> Result<Vec<LocalModel>, DomainError> {
        let before = self.selection.get(family);
        let models = self.downloads.list_models(family, &self.selection).await?;
        if self.selection.get(family) != before {
            self.persist_selection();
        }
        Ok(models)
    }

    /// Load the catalog of the configured endpoint.
    pub async fn load_catalog(&self) -> Result<Arc<Vec<ModelOption>>, DomainError> {
        let base_url = self.config.read().catalog.base_url.clone();
        self.catalog().load_models(&base_url, None).await
    }

    pub fn config(&self) -> AppConfig {
        self.config.read().clone()
    }

    /// Save and apply a new configuration. Catalog settings, the request
    /// timeout included, take effect for the next load; store limits on
    /// the next start.
    pub fn update_config(&self, config: AppConfig) -> Result<(), DomainError> {
        self.config_store.save(&config)?;

        let previous = self.config.read().catalog.clone();
        if previous.request_timeout_secs != config.catalog.request_timeout_secs {
            self.http.set_timeout(timeout_of(&config.catalog));
        }
        if previous != config.catalog {
            *self.catalog.write() = Arc::new(resolver(&self.http, &config));
            info!("Catalog resolver rebuilt");
        }
        *self.config.write() = config;

        info!("Configuration updated");
        Ok(())
    }

    fn persist_selection(&self) {
        persist_selection(&self.selection, &self.config, self.config_store.as_ref());
    }

    /// Tear down every store's push listeners. Only the first call does
    /// anything; returns the number of disposers run.
    pub fn shutdown(&self) -> usize {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return 0;
        }
        let disposed = self.transcriptions.store().teardown_listeners()
            + self.notes.store().teardown_listeners()
            + self.actions.store().teardown_listeners();
        info!(disposed, "AppController shut down");
        disposed
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    pub fn data_dir(&self) -> String {
        self.config_store.data_dir().to_string_lossy().to_string()
    }

    pub fn logs_dir(&self) -> String {
        self.config_store.logs_dir().to_string_lossy().to_string()
    }

    pub fn config_path(&self) -> String {
        self.config_store.config_path().to_string_lossy().to_string()
    }
}

impl Drop for AppController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn persist_selection(
    selection: &ModelSelection,
    config: &RwLock<AppConfig>,
    store: &dyn ConfigStore,
) {
    let snapshot = {
        let mut config = config.write();
        let selected = selection.to_map();
        if config.models.selected == selected {
            return;
        }
        config.models.selected = selected;
        config.clone()
    };
    if let Err(e) = store.save(&snapshot) {
        warn!(error = %e, "Failed to persist model selection");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::TaskStatus;
    use crate::test_support::{FakeHttp, FakeModels, FakeSource, FakeStats};

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<TomlConfigStore>,
        transcriptions: Arc<FakeSource<Transcription>>,
        notes: Arc<FakeSource<Note>>,
        models: Arc<FakeModels>,
        http: Arc<FakeHttp>,
        controller: AppController,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TomlConfigStore::with_data_dir(dir.path().to_path_buf()).unwrap());
        let transcriptions = FakeSource::new(Vec::new());
        let notes = FakeSource::new(Vec::new());
        let models = FakeModels::new();
        let http = FakeHttp::new();
        let backends = Backends {
            transcriptions: transcriptions.clone(),
            notes: notes.clone(),
            actions: FakeSource::new(Vec::new()),
            stats: FakeStats::new(),
            models: models.clone(),
        };
        let controller = AppController::with_parts(
            store.clone(),
            store.load().unwrap(),
            backends,
            http.clone(),
            None,
        );
        Fixture {
            _dir: dir,
            store,
            transcriptions,
            notes,
            models,
            http,
            controller,
        }
    }

    #[tokio::test]
    async fn test_initialize_binds_each_store_once() {
        let f = fixture();
        f.controller.initialize(None).await.unwrap();
        f.controller.initialize(None).await.unwrap();
        assert_eq!(f.transcriptions.listener_count(), 3);
        assert_eq!(f.notes.listener_count(), 3);

        assert_eq!(f.controller.shutdown(), 9);
        assert_eq!(f.controller.shutdown(), 0);
        assert_eq!(f.transcriptions.listener_count(), 0);
        assert!(f.controller.is_shut_down());
    }

    #[tokio::test]
    async fn test_drop_tears_down_listeners() {
        let f = fixture();
        f.controller.initialize(None).await.unwrap();
        let notes = f.notes.clone();
        drop(f);
        assert_eq!(notes.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_download_selects_and_persists() {
        let f = fixture();
        let parakeet = ModelFamily::new("parakeet");

        let mut handle = f.controller.download_model(&parakeet, "large");
        assert_eq!(handle.finished().await.status, TaskStatus::Done);
        assert_eq!(f.controller.selection().get(&parakeet), "large");
        assert_eq!(f.store.load().unwrap().models.selected["parakeet"], "large");
    }

    #[tokio::test]
    async fn test_delete_persists_fallback() {
        let f = fixture();
        let whisper = ModelFamily::new("whisper");
        f.models.set_models("whisper", &[("base", true), ("small", true)]);

        let selected = f.controller.delete_model(&whisper, "base", || {}).await.unwrap();
        assert_eq!(selected, "small");
        assert_eq!(f.store.load().unwrap().models.selected["whisper"], "small");
    }

    #[tokio::test]
    async fn test_delete_persists_cleared_selection_when_listing_fails() {
        let f = fixture();
        let whisper = ModelFamily::new("whisper");
        f.models.set_models("whisper", &[("base", true), ("small", true)]);
        f.models.fail_listing(DomainError::Backend("list offline".into()));

        let selected = f.controller.delete_model(&whisper, "base", || {}).await.unwrap();
        assert_eq!(selected, "");
        assert_eq!(f.store.load().unwrap().models.selected["whisper"], "");
    }

    #[test]
    fn test_update_config_rebuilds_catalog() {
        let f = fixture();
        let before = f.controller.catalog();

        let mut config = f.controller.config();
        config.logging.level = "debug".to_string();
        f.controller.update_config(config.clone()).unwrap();
        assert!(Arc::ptr_eq(&before, &f.controller.catalog()));

        config.catalog.allow_local_network = false;
        f.controller.update_config(config).unwrap();
        assert!(!Arc::ptr_eq(&before, &f.controller.catalog()));
        assert!(!f.store.load().unwrap().catalog.allow_local_network);
    }

    #[test]
    fn test_update_config_applies_request_timeout() {
        let f = fixture();
        let mut config = f.controller.config();
        config.catalog.allow_local_network = false;
        f.controller.update_config(config.clone()).unwrap();
        assert!(f.http.timeouts.lock().is_empty());

        config.catalog.request_timeout_secs = 42;
        f.controller.update_config(config).unwrap();
        assert_eq!(*f.http.timeouts.lock(), vec![Duration::from_secs(42)]);
        assert_eq!(f.store.load().unwrap().catalog.request_timeout_secs, 42);
    }
}
