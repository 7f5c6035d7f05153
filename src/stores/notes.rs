use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::domain::{DomainError, Note, NoteQuery};
use crate::ports::EntitySource;
use crate::store::{Admission, Placement, Store, StorePolicy, Subscription};

#[derive(Debug, Default)]
struct Pointers {
    active_note: Option<i64>,
    active_folder: Option<String>,
}

/// Notes visible under the current folder filter, plus the open-note and
/// active-folder pointers.
///
/// The pointers are only changed by explicit calls, never as a side effect
/// of store mutations. Notes from other folders are not stored at all.
#[derive(Clone)]
pub struct NotesStore {
    store: Store<Note>,
    pointers: Arc<Mutex<Pointers>>,
    page_limit: usize,
}

fn folder_admission(folder: &Option<String>) -> Option<Admission<Note>> {
    folder.clone().map(|folder| -> Admission<Note> {
        Arc::new(move |note: &Note| note.folder_id.as_deref() == Some(folder.as_str()))
    })
}

impl NotesStore {
    pub fn new(source: Arc<dyn EntitySource<Note>>, page_limit: usize) -> Self {
        let policy = StorePolicy {
            capacity: None,
            placement: Placement::Front,
            order: None,
        };
        Self {
            store: Store::new("notes", policy, source),
            pointers: Arc::new(Mutex::new(Pointers::default())),
            page_limit,
        }
    }

    /// Open `folder` (or every folder for `None`) and pull its notes.
    pub async fn initialize(&self, folder: Option<String>) -> Result<Arc<Vec<Note>>, DomainError> {
        self.set_active_folder(folder.clone());
        self.store
            .initialize(NoteQuery {
                folder_id: folder,
                limit: self.page_limit,
            })
            .await
    }

    /// Change the folder filter. Notes outside the new folder leave the
    /// store immediately; re-initialize to pull the new folder's notes.
    pub fn set_active_folder(&self, folder: Option<String>) -> bool {
        {
            let mut pointers = self.pointers.lock();
            if pointers.active_folder == folder {
                return false;
            }
            pointers.active_folder = folder.clone();
        }
        debug!(folder = ?folder, "Active folder changed");
        if !self.store.set_admission(folder_admission(&folder)) {
            self.store.notify_listeners();
        }
        true
    }

    pub fn active_folder(&self) -> Option<String> {
        self.pointers.lock().active_folder.clone()
    }

    pub fn set_active_note(&self, note_id: Option<i64>) -> bool {
        {
            let mut pointers = self.pointers.lock();
            if pointers.active_note == note_id {
                return false;
            }
            pointers.active_note = note_id;
        }
        self.store.notify_listeners();
        true
    }

    pub fn active_note(&self) -> Option<i64> {
        self.pointers.lock().active_note
    }

    /// Store a note if it belongs to the active folder.
    pub fn upsert(&self, note: Note) -> bool {
        self.store.upsert(note)
    }

    pub fn remove(&self, id: i64) -> bool {
        self.store.remove(&id)
    }

    pub async fn delete(&self, id: i64) -> Result<bool, DomainError> {
        let outcome = self.store.source().delete(&id).await?;
        if !outcome.success {
            let message = outcome
                .message
                .unwrap_or_else(|| format!("backend refused to delete note {}", id));
            warn!(id, message = %message, "Note delete failed");
            return Err(DomainError::Backend(message));
        }
        Ok(self.store.remove(&id))
    }

    pub fn snapshot(&self) -> Arc<Vec<Note>> {
        self.store.snapshot()
    }

    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.store.subscribe(listener)
    }

    pub fn store(&self) -> &Store<Note> {
        &self.store
    }
}

impl std::fmt::Debug for NotesStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotesStore")
            .field("store", &self.store)
            .field("pointers", &*self.pointers.lock())
            .finish()
    }
}
