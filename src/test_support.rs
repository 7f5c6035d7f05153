//! Scripted in-memory backends for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::domain::{
    ClearOutcome, DeleteOutcome, DomainError, DownloadEvent, DownloadOutcome, Entity,
    EntityDeleted, LocalModel, ModelFamily, UsageStats,
};
use crate::ports::{
    Disposer, EntitySource, HttpClient, ModelBackend, ProgressSender, PushCallback, StatsSource,
};

type Slots<P> = Arc<Mutex<Vec<(usize, PushCallback<P>)>>>;

fn register<P: 'static>(slots: &Slots<P>, next: &AtomicUsize, cb: PushCallback<P>) -> Disposer {
    let id = next.fetch_add(1, Ordering::SeqCst);
    slots.lock().push((id, cb));
    let slots = slots.clone();
    Disposer::new(move || slots.lock().retain(|(i, _)| *i != id))
}

fn emit<P: Clone>(slots: &Slots<P>, payload: P) {
    let callbacks: Vec<PushCallback<P>> = slots.lock().iter().map(|(_, cb)| cb.clone()).collect();
    for cb in callbacks {
        cb(payload.clone());
    }
}

/// Entity backend with call counting, gated pulls and push emitters.
pub struct FakeSource<T: Entity> {
    data: Mutex<Vec<T>>,
    gates: Mutex<VecDeque<oneshot::Receiver<Result<Vec<T>, DomainError>>>>,
    pub fetch_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
    next: AtomicUsize,
    added: Slots<T>,
    updated: Slots<T>,
    deleted: Slots<EntityDeleted<T::Id>>,
}

impl<T: Entity> FakeSource<T> {
    pub fn new(data: Vec<T>) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(data),
            gates: Mutex::new(VecDeque::new()),
            fetch_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            next: AtomicUsize::new(0),
            added: Arc::new(Mutex::new(Vec::new())),
            updated: Arc::new(Mutex::new(Vec::new())),
            deleted: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Make the next fetch wait for the returned sender.
    pub fn gate_next_fetch(&self) -> oneshot::Sender<Result<Vec<T>, DomainError>> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().push_back(rx);
        tx
    }

    pub fn set_data(&self, data: Vec<T>) {
        *self.data.lock() = data;
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.added.lock().len() + self.updated.lock().len() + self.deleted.lock().len()
    }

    pub fn push_added(&self, entity: T) {
        emit(&self.added, entity);
    }

    pub fn push_updated(&self, entity: T) {
        emit(&self.updated, entity);
    }

    pub fn push_deleted(&self, id: T::Id) {
        emit(&self.deleted, EntityDeleted { id });
    }
}

#[async_trait]
impl<T: Entity> EntitySource<T> for FakeSource<T> {
    async fn fetch(&self, _query: &T::Query) -> Result<Vec<T>, DomainError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gates.lock().pop_front();
        match gate {
            Some(rx) => rx
                .await
                .unwrap_or_else(|_| Err(DomainError::Backend("gate dropped".into()))),
            None => Ok(self.data.lock().clone()),
        }
    }

    fn on_added(&self, callback: PushCallback<T>) -> Disposer {
        register(&self.added, &self.next, callback)
    }

    fn on_updated(&self, callback: PushCallback<T>) -> Disposer {
        register(&self.updated, &self.next, callback)
    }

    fn on_deleted(&self, callback: PushCallback<EntityDeleted<T::Id>>) -> Disposer {
        register(&self.deleted, &self.next, callback)
    }

    async fn delete(&self, id: &T::Id) -> Result<DeleteOutcome, DomainError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.data.lock().retain(|e| e.id() != id);
        Ok(DeleteOutcome {
            success: true,
            message: None,
        })
    }

    async fn clear(&self) -> Result<ClearOutcome, DomainError> {
        let mut data = self.data.lock();
        let cleared = data.len() as u64;
        data.clear();
        Ok(ClearOutcome { cleared })
    }
}

/// Stats backend returning queued results.
pub struct FakeStats {
    results: Mutex<VecDeque<Result<UsageStats, DomainError>>>,
    gates: Mutex<VecDeque<oneshot::Receiver<Result<UsageStats, DomainError>>>>,
    pub calls: AtomicUsize,
}

impl FakeStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(VecDeque::new()),
            gates: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn push_result(&self, result: Result<UsageStats, DomainError>) {
        self.results.lock().push_back(result);
    }

    pub fn gate_next(&self) -> oneshot::Sender<Result<UsageStats, DomainError>> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().push_back(rx);
        tx
    }
}

#[async_trait]
impl StatsSource for FakeStats {
    async fn aggregate_stats(&self) -> Result<UsageStats, DomainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gates.lock().pop_front();
        if let Some(rx) = gate {
            return rx
                .await
                .unwrap_or_else(|_| Err(DomainError::Backend("gate dropped".into())));
        }
        self.results
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(UsageStats::default()))
    }
}

/// Handle the test uses to drive one scripted download.
pub struct DownloadScript {
    pub events: ProgressSender,
    pub finish: oneshot::Sender<Result<DownloadOutcome, DomainError>>,
}

/// Model backend whose downloads are driven by the test.
#[derive(Default)]
pub struct FakeModels {
    models: Mutex<HashMap<ModelFamily, Vec<LocalModel>>>,
    scripts: Mutex<HashMap<(ModelFamily, String), mpsc::UnboundedSender<DownloadScript>>>,
    pending: Mutex<HashMap<(ModelFamily, String), mpsc::UnboundedReceiver<DownloadScript>>>,
    pub download_calls: AtomicUsize,
    pub cancel_calls: Mutex<Vec<(ModelFamily, String)>>,
    pub delete_calls: Mutex<Vec<(ModelFamily, String)>>,
    list_error: Mutex<Option<DomainError>>,
    stale_listing: AtomicBool,
}

impl FakeModels {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_models(&self, family: &str, models: &[(&str, bool)]) {
        let list = models
            .iter()
            .map(|(id, downloaded)| LocalModel {
                id: id.to_string(),
                size_bytes: None,
                downloaded: *downloaded,
            })
            .collect();
        self.models.lock().insert(ModelFamily::new(family), list);
    }

    /// Receiver yielding a script each time a download for the key starts.
    pub fn expect_download(&self, family: &str, model_id: &str) -> mpsc::UnboundedReceiver<DownloadScript> {
        let (tx, rx) = mpsc::unbounded_channel();
        let key = (ModelFamily::new(family), model_id.to_string());
        self.scripts.lock().insert(key, tx);
        rx
    }

    /// Make every following `list_models` call fail.
    pub fn fail_listing(&self, err: DomainError) {
        *self.list_error.lock() = Some(err);
    }

    /// Keep reporting deleted models as downloaded.
    pub fn keep_stale_listing(&self) {
        self.stale_listing.store(true, Ordering::SeqCst);
    }

    pub fn cancels(&self) -> usize {
        self.cancel_calls.lock().len()
    }

    pub fn downloads(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelBackend for FakeModels {
    async fn list_models(&self, family: &ModelFamily) -> Result<Vec<LocalModel>, DomainError> {
        if let Some(err) = self.list_error.lock().clone() {
            return Err(err);
        }
        Ok(self.models.lock().get(family).cloned().unwrap_or_default())
    }

    async fn download_model(
        &self,
        family: &ModelFamily,
        model_id: &str,
        progress: ProgressSender,
    ) -> Result<DownloadOutcome, DomainError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        let key = (family.clone(), model_id.to_string());
        let script_tx = self.scripts.lock().get(&key).cloned();
        let Some(script_tx) = script_tx else {
            let _ = progress.send(DownloadEvent::Complete);
            return Ok(DownloadOutcome::Completed);
        };

        let (finish_tx, finish_rx) = oneshot::channel();
        let _ = script_tx.send(DownloadScript {
            events: progress,
            finish: finish_tx,
        });
        finish_rx
            .await
            .unwrap_or_else(|_| Err(DomainError::ModelDownload("script dropped".into())))
    }

    async fn cancel_download(&self, family: &ModelFamily, model_id: &str) -> Result<(), DomainError> {
        self.cancel_calls
            .lock()
            .push((family.clone(), model_id.to_string()));
        Ok(())
    }

    async fn delete_model(&self, family: &ModelFamily, model_id: &str) -> Result<(), DomainError> {
        self.delete_calls
            .lock()
            .push((family.clone(), model_id.to_string()));
        if self.stale_listing.load(Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(models) = self.models.lock().get_mut(family) {
            for model in models.iter_mut().filter(|m| m.id == model_id) {
                model.downloaded = false;
            }
        }
        Ok(())
    }
}

/// HTTP client that answers per URL, optionally gated by the test.
#[derive(Default)]
pub struct FakeHttp {
    bodies: Mutex<HashMap<String, Result<String, DomainError>>>,
    gates: Mutex<HashMap<String, oneshot::Receiver<Result<String, DomainError>>>>,
    pub calls: Mutex<Vec<(String, Option<String>)>>,
    pub timeouts: Mutex<Vec<Duration>>,
}

impl FakeHttp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, url: &str, body: &str) {
        self.bodies
            .lock()
            .insert(url.to_string(), Ok(body.to_string()));
    }

    pub fn fail(&self, url: &str, error: DomainError) {
        self.bodies.lock().insert(url.to_string(), Err(error));
    }

    pub fn gate(&self, url: &str) -> oneshot::Sender<Result<String, DomainError>> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().insert(url.to_string(), rx);
        tx
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl HttpClient for FakeHttp {
    async fn get(&self, url: &str, bearer: Option<&str>) -> Result<String, DomainError> {
        self.calls
            .lock()
            .push((url.to_string(), bearer.map(str::to_string)));
        let gate = self.gates.lock().remove(url);
        if let Some(rx) = gate {
            return rx
                .await
                .unwrap_or_else(|_| Err(DomainError::HttpRequest("gate dropped".into())));
        }
        self.bodies
            .lock()
            .get(url)
            .cloned()
            .unwrap_or_else(|| Err(DomainError::HttpRequest(format!("HTTP 404 for {}", url))))
    }

    fn set_timeout(&self, timeout: Duration) {
        self.timeouts.lock().push(timeout);
    }
}
