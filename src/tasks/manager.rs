use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::domain::{
    DomainError, DownloadEvent, DownloadOutcome, LocalModel, ModelFamily, ModelSelection, TaskKey,
    TaskSnapshot, TaskStatus,
};
use crate::ports::ModelBackend;

struct TaskEntry {
    tx: watch::Sender<TaskSnapshot>,
    cancel_requested: AtomicBool,
    /// Distinguishes a retry from the attempt it replaced.
    task_id: u64,
}

type TaskMap = Arc<Mutex<HashMap<TaskKey, TaskEntry>>>;

/// Observer for one download attempt.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    key: TaskKey,
    rx: watch::Receiver<TaskSnapshot>,
}

impl TaskHandle {
    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        self.rx.borrow().clone()
    }

    /// Wait until `pred` holds or the attempt ends, returning the state seen last.
    pub async fn wait_until(&mut self, pred: impl FnMut(&TaskSnapshot) -> bool) -> TaskSnapshot {
        let reached = self.rx.wait_for(pred).await.map(|s| s.clone());
        // On error the entry was dropped; the last published value is final.
        reached.unwrap_or_else(|_| self.rx.borrow().clone())
    }

    /// Wait until the attempt reaches `done`, `error` or `idle`.
    pub async fn finished(&mut self) -> TaskSnapshot {
        self.wait_until(|s| !s.status.is_active()).await
    }
}

/// Keyed map of download state machines, one per `(family, model id)`.
///
/// At most one attempt is in flight per key. Keys never share state, so
/// cancelling one leaves every other key untouched.
pub struct DownloadManager {
    backend: Arc<dyn ModelBackend>,
    tasks: TaskMap,
    next_task: AtomicU64,
}

impl DownloadManager {
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        Self {
            backend,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_task: AtomicU64::new(1),
        }
    }

    /// Start downloading a model, or join the attempt already in flight.
    ///
    /// `on_selected` runs once with the model id when the download
    /// completes, unless a cancel was requested first. Must be called from
    /// within a tokio runtime.
    pub fn download<F>(&self, family: &ModelFamily, model_id: &str, on_selected: F) -> TaskHandle
    where
        F: FnOnce(&str) + Send + 'static,
    {
        let key = TaskKey::new(family.clone(), model_id);
        let mut tasks = self.tasks.lock();

        if let Some(entry) = tasks.get(&key) {
            let status = entry.tx.borrow().status;
            if status.is_active() {
                debug!(key = %key, status = %status, "Download already in flight, joining");
                return TaskHandle {
                    key,
                    rx: entry.tx.subscribe(),
                };
            }
        }

        let task_id = self.next_task.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = watch::channel(TaskSnapshot::downloading());
        tasks.insert(
            key.clone(),
            TaskEntry {
                tx,
                cancel_requested: AtomicBool::new(false),
                task_id,
            },
        );
        drop(tasks);

        info!(key = %key, task_id, "Download started");
        let driver = Driver {
            key: key.clone(),
            task_id,
            tasks: self.tasks.clone(),
        };
        tokio::spawn(driver.run(self.backend.clone(), on_selected));

        TaskHandle { key, rx }
    }

    /// Request a cooperative abort.
    ///
    /// Only a `downloading` task can be cancelled. Anything else, including
    /// a cancel that lands after completion, is a no-op returning `false`.
    pub async fn cancel(&self, family: &ModelFamily, model_id: &str) -> Result<bool, DomainError> {
        let key = TaskKey::new(family.clone(), model_id);

        let task_id = {
            let tasks = self.tasks.lock();
            tasks.get(&key).and_then(|entry| {
                let moved = entry.tx.send_if_modified(|s| {
                    if s.status.can_cancel() {
                        s.status = TaskStatus::Cancelling;
                        true
                    } else {
                        false
                    }
                });
                if moved {
                    entry.cancel_requested.store(true, Ordering::SeqCst);
                    Some(entry.task_id)
                } else {
                    None
                }
            })
        };

        let Some(task_id) = task_id else {
            debug!(key = %key, status = %self.status(family, model_id), "Cancel ignored");
            return Ok(false);
        };

        info!(key = %key, "Cancel requested");
        if let Err(e) = self.backend.cancel_download(family, model_id).await {
            warn!(key = %key, error = %e, "Cancel request failed, download continues");
            let tasks = self.tasks.lock();
            if let Some(entry) = tasks.get(&key).filter(|entry| entry.task_id == task_id) {
                entry.cancel_requested.store(false, Ordering::SeqCst);
                entry.tx.send_if_modified(|s| {
                    if s.status == TaskStatus::Cancelling {
                        s.status = TaskStatus::Downloading;
                        true
                    } else {
                        false
                    }
                });
            }
            return Err(e);
        }
        Ok(true)
    }

    /// Delete a downloaded model and re-check the selection for its family.
    ///
    /// Refused while a download for the key is active. `on_after_delete`
    /// runs after the backend delete succeeds. Returns the family's
    /// selection after revalidation.
    pub async fn delete<F>(
        &self,
        family: &ModelFamily,
        model_id: &str,
        selection: &ModelSelection,
        on_after_delete: F,
    ) -> Result<String, DomainError>
    where
        F: FnOnce(),
    {
        let key = TaskKey::new(family.clone(), model_id);
        let status = self.status(family, model_id);
        if !status.can_delete() {
            return Err(DomainError::TaskBusy {
                key: key.to_string(),
                status: status.to_string(),
            });
        }

        self.backend.delete_model(family, model_id).await?;
        info!(key = %key, "Model deleted");
        self.reset(family, model_id);
        on_after_delete();

        match self.backend.list_models(family).await {
            Ok(mut models) => {
                // The listing may lag behind the delete.
                for model in models.iter_mut().filter(|m| m.id == model_id) {
                    model.downloaded = false;
                }
                selection.revalidate(family, &models);
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Model listing failed after delete");
                selection.forget(family, model_id);
            }
        }
        Ok(selection.get(family))
    }

    /// List a family's models and revalidate its selection against them.
    pub async fn list_models(
        &self,
        family: &ModelFamily,
        selection: &ModelSelection,
    ) -> Result<Vec<LocalModel>, DomainError> {
        let models = self.backend.list_models(family).await?;
        selection.revalidate(family, &models);
        Ok(models)
    }

    pub fn status(&self, family: &ModelFamily, model_id: &str) -> TaskStatus {
        self.snapshot(family, model_id).status
    }

    /// Current state of a key; `idle` when nothing is tracked.
    pub fn snapshot(&self, family: &ModelFamily, model_id: &str) -> TaskSnapshot {
        let key = TaskKey::new(family.clone(), model_id);
        self.tasks
            .lock()
            .get(&key)
            .map(|entry| entry.tx.borrow().clone())
            .unwrap_or_else(TaskSnapshot::idle)
    }

    /// Re-attach to the tracked attempt for a key, if any.
    pub fn handle(&self, family: &ModelFamily, model_id: &str) -> Option<TaskHandle> {
        let key = TaskKey::new(family.clone(), model_id);
        let rx = self.tasks.lock().get(&key).map(|entry| entry.tx.subscribe())?;
        Some(TaskHandle { key, rx })
    }

    /// Dismiss a `done` or `error` task back to `idle`.
    pub fn reset(&self, family: &ModelFamily, model_id: &str) -> bool {
        let key = TaskKey::new(family.clone(), model_id);
        let mut tasks = self.tasks.lock();
        let terminal = tasks
            .get(&key)
            .is_some_and(|entry| !entry.tx.borrow().status.is_active());
        if terminal {
            if let Some(entry) = tasks.remove(&key) {
                entry.tx.send_replace(TaskSnapshot::idle());
            }
        }
        terminal
    }

    /// Every tracked key with its state.
    pub fn tasks(&self) -> Vec<(TaskKey, TaskSnapshot)> {
        self.tasks
            .lock()
            .iter()
            .map(|(key, entry)| (key.clone(), entry.tx.borrow().clone()))
            .collect()
    }
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadManager")
            .field("tasks", &self.tasks.lock().len())
            .finish()
    }
}

/// Drives one attempt: forwards backend progress into the task's state.
struct Driver {
    key: TaskKey,
    task_id: u64,
    tasks: TaskMap,
}

impl Driver {
    async fn run<F>(self, backend: Arc<dyn ModelBackend>, on_selected: F)
    where
        F: FnOnce(&str) + Send + 'static,
    {
        let mut on_selected = Some(on_selected);
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let mut download = backend.download_model(&self.key.family, &self.key.model_id, progress_tx);

        let result = loop {
            tokio::select! {
                biased;
                Some(event) = progress_rx.recv() => self.on_event(event, &mut on_selected),
                result = &mut download => break result,
            }
        };
        // Events sent just before the call resolved.
        while let Ok(event) = progress_rx.try_recv() {
            self.on_event(event, &mut on_selected);
        }

        match result {
            Ok(DownloadOutcome::Completed) => self.complete(&mut on_selected),
            Ok(DownloadOutcome::Cancelled) => self.cancelled(),
            Err(e) => self.failed(e),
        }
    }

    /// Run `f` on this attempt's entry, if it is still the tracked one.
    fn with_entry<R>(&self, f: impl FnOnce(&TaskEntry) -> R) -> Option<R> {
        let tasks = self.tasks.lock();
        tasks
            .get(&self.key)
            .filter(|entry| entry.task_id == self.task_id)
            .map(f)
    }

    fn on_event<F: FnOnce(&str)>(&self, event: DownloadEvent, on_selected: &mut Option<F>) {
        match event {
            DownloadEvent::Progress { percent } => {
                self.with_entry(|entry| {
                    entry.tx.send_if_modified(|s| {
                        matches!(s.status, TaskStatus::Downloading | TaskStatus::Cancelling)
                            && s.advance(percent)
                    })
                });
            }
            DownloadEvent::Installing => {
                let moved = self.with_entry(|entry| {
                    entry.tx.send_if_modified(|s| {
                        if s.status == TaskStatus::Downloading {
                            s.status = TaskStatus::Installing;
                            true
                        } else {
                            false
                        }
                    })
                });
                if moved == Some(true) {
                    debug!(key = %self.key, "Installing");
                }
            }
            DownloadEvent::Complete => self.complete(on_selected),
        }
    }

    fn complete<F: FnOnce(&str)>(&self, on_selected: &mut Option<F>) {
        let outcome = self.with_entry(|entry| {
            let moved = entry.tx.send_if_modified(|s| {
                if s.status.is_active() {
                    s.status = TaskStatus::Done;
                    s.progress = 100.0;
                    s.error = None;
                    true
                } else {
                    false
                }
            });
            (moved, entry.cancel_requested.load(Ordering::SeqCst))
        });

        let Some((true, cancel_requested)) = outcome else {
            return;
        };
        if cancel_requested {
            info!(key = %self.key, "Download completed before the cancel took effect");
            return;
        }
        info!(key = %self.key, "Download complete");
        if let Some(callback) = on_selected.take() {
            callback(&self.key.model_id);
        }
    }

    fn cancelled(&self) {
        let mut tasks = self.tasks.lock();
        let Some(entry) = tasks
            .get(&self.key)
            .filter(|entry| entry.task_id == self.task_id)
        else {
            return;
        };
        if entry.tx.borrow().status == TaskStatus::Done {
            debug!(key = %self.key, "Cancel acknowledged after completion, keeping done");
            return;
        }
        if let Some(entry) = tasks.remove(&self.key) {
            entry.tx.send_replace(TaskSnapshot::idle());
        }
        info!(key = %self.key, "Download cancelled");
    }

    fn failed(&self, error: DomainError) {
        let cancelling = self.with_entry(|entry| {
            let status = entry.tx.borrow().status;
            status == TaskStatus::Cancelling
                || (status.is_active() && entry.cancel_requested.load(Ordering::SeqCst))
        });
        match cancelling {
            None => {}
            // An abort surfaced as an error still confirms the cancel.
            Some(true) => self.cancelled(),
            Some(false) => {
                let message = error.to_string();
                let moved = self.with_entry(|entry| {
                    entry.tx.send_if_modified(|s| {
                        if s.status.is_active() {
                            s.status = TaskStatus::Error;
                            s.error = Some(message.clone());
                            true
                        } else {
                            false
                        }
                    })
                });
                if moved == Some(true) {
                    warn!(key = %self.key, error = %message, "Download failed");
                }
            }
        }
    }
}
