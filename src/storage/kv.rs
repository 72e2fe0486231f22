//! Key-value backend: one JSON document of string values, the layout a
//! browser's local storage would have, plus an in-memory content table.

use crate::config::BackendKind;
use crate::error::{AppError, Result};
use crate::library::book::{BookRecord, ContentRef, NewBook, RecentEntry, now_millis};
use crate::library::recent::RecentList;
use crate::library::shelf::{Shelf, ShelfList, unknown_shelf};
use crate::storage::{ContentRemoval, Identity, LibraryBackend};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Key holding the serialized record list.
pub const LIBRARY_KEY: &str = "readshelf_library";
/// Key holding the serialized recent list.
pub const RECENT_KEY: &str = "readshelf_recent_books";
/// Key holding the serialized shelves.
pub const SHELVES_KEY: &str = "readshelf_shelves";

const STORE_FILE: &str = "local_storage.json";

struct KvState {
    entries: BTreeMap<String, String>,
    books: Vec<BookRecord>,
    recent: RecentList,
    shelves: ShelfList,
}

/// Library persisted in a single key-value file.
///
/// Content bytes are only kept for the lifetime of the process, like object
/// URLs in a browser; records reloaded from disk whose handle is gone can be
/// listed but not opened.
pub struct KeyValueBackend {
    path: PathBuf,
    state: tokio::sync::Mutex<KvState>,
    handles: Mutex<HashMap<String, Vec<u8>>>,
    recent_limit: usize,
}

impl KeyValueBackend {
    /// Open (or create) the store in `data_dir`.
    pub fn open(data_dir: &Path, recent_limit: usize) -> Result<Self> {
        // Sync I/O: runs once at startup.
        std::fs::create_dir_all(data_dir).map_err(|e| {
            AppError::BackendUnavailable(format!("Cannot create {}: {}", data_dir.display(), e))
        })?;

        let path = data_dir.join(STORE_FILE);
        let entries: BTreeMap<String, String> = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                AppError::BackendUnavailable(format!("Cannot read {}: {}", path.display(), e))
            })?;
            serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Unreadable key-value store, starting empty");
                BTreeMap::new()
            })
        } else {
            BTreeMap::new()
        };

        let books: Vec<BookRecord> = decode_key(&entries, LIBRARY_KEY);
        let recent = RecentList::from_entries(decode_key(&entries, RECENT_KEY), recent_limit);
        let shelves: ShelfList = decode_key(&entries, SHELVES_KEY);

        tracing::debug!(path = %path.display(), books = books.len(), "Key-value store opened");

        Ok(Self {
            path,
            state: tokio::sync::Mutex::new(KvState {
                entries,
                books,
                recent,
                shelves,
            }),
            handles: Mutex::new(HashMap::new()),
            recent_limit,
        })
    }

    async fn persist(&self, state: &mut KvState) -> Result<()> {
        state
            .entries
            .insert(LIBRARY_KEY.to_string(), serde_json::to_string(&state.books)?);
        state
            .entries
            .insert(RECENT_KEY.to_string(), serde_json::to_string(&state.recent)?);
        state
            .entries
            .insert(SHELVES_KEY.to_string(), serde_json::to_string(&state.shelves)?);

        let json = serde_json::to_string_pretty(&state.entries)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// A missing or malformed value reads as empty, as a failed JSON.parse would.
fn decode_key<T: DeserializeOwned + Default>(entries: &BTreeMap<String, String>, key: &str) -> T {
    let Some(raw) = entries.get(key) else {
        return T::default();
    };
    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::warn!(key, error = %e, "Malformed stored value, ignoring");
        T::default()
    })
}

fn not_found(id: &str) -> AppError {
    AppError::NotFound(format!("Book '{}'", id))
}

#[async_trait]
impl LibraryBackend for KeyValueBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn list(&self, _identity: &Identity) -> Result<Vec<BookRecord>> {
        Ok(self.state.lock().await.books.clone())
    }

    async fn get(&self, _identity: &Identity, id: &str) -> Result<Option<BookRecord>> {
        let state = self.state.lock().await;
        Ok(state.books.iter().find(|b| b.id == id).cloned())
    }

    async fn insert(&self, _identity: &Identity, book: NewBook) -> Result<BookRecord> {
        let created_at = now_millis();
        let handle = uuid::Uuid::new_v4().to_string();

        let record = BookRecord {
            id: book.local_id(created_at),
            title: book.title,
            format: book.format,
            content: ContentRef::Handle(handle.clone()),
            cover: book.cover,
            created_at,
            last_opened: None,
            progress: 0,
            is_favorite: None,
        };

        self.handles.lock().insert(handle.clone(), book.data);

        let mut state = self.state.lock().await;
        state.books.insert(0, record.clone());
        if let Err(e) = self.persist(&mut state).await {
            state.books.remove(0);
            self.handles.lock().remove(&handle);
            return Err(AppError::UploadFailed(e.to_string()));
        }

        Ok(record)
    }

    async fn remove(&self, _identity: &Identity, id: &str) -> Result<ContentRemoval> {
        let mut state = self.state.lock().await;
        let index = state
            .books
            .iter()
            .position(|b| b.id == id)
            .ok_or_else(|| not_found(id))?;

        let record = state.books.remove(index);
        let recent_before = state.recent.clone();
        let shelves_before = state.shelves.clone();
        state.recent.remove(id);
        state.shelves.forget_book(id);

        if let Err(e) = self.persist(&mut state).await {
            state.books.insert(index, record);
            state.recent = recent_before;
            state.shelves = shelves_before;
            return Err(AppError::QueryFailed(e.to_string()));
        }

        // Handles are gone after a restart; nothing left to free then.
        if let ContentRef::Handle(handle) = &record.content {
            self.handles.lock().remove(handle);
        }
        Ok(ContentRemoval::Removed)
    }

    async fn update_progress(&self, _identity: &Identity, id: &str, progress: u8) -> Result<()> {
        let mut state = self.state.lock().await;
        let book = state
            .books
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| not_found(id))?;

        let previous = book.progress;
        book.progress = progress;
        state.recent.set_progress(id, progress);

        if let Err(e) = self.persist(&mut state).await {
            if let Some(book) = state.books.iter_mut().find(|b| b.id == id) {
                book.progress = previous;
            }
            state.recent.set_progress(id, previous);
            return Err(AppError::QueryFailed(e.to_string()));
        }
        Ok(())
    }

    async fn content(&self, _identity: &Identity, record: &BookRecord) -> Result<Vec<u8>> {
        let ContentRef::Handle(handle) = &record.content else {
            return Err(AppError::NotFound(format!("No content handle for '{}'", record.id)));
        };

        self.handles.lock().get(handle).cloned().ok_or_else(|| {
            AppError::NotFound(format!("Content of '{}' is no longer available", record.title))
        })
    }

    async fn recent(&self, _identity: &Identity) -> Result<Vec<RecentEntry>> {
        Ok(self.state.lock().await.recent.entries().to_vec())
    }

    async fn record_opened(&self, _identity: &Identity, record: &BookRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        let now = now_millis();

        let Some(book) = state.books.iter_mut().find(|b| b.id == record.id) else {
            return Err(not_found(&record.id));
        };
        book.last_opened = Some(now);
        let entry = RecentEntry::from(&*book);

        state.recent.touch(entry, self.recent_limit);
        self.persist(&mut state)
            .await
            .map_err(|e| AppError::QueryFailed(e.to_string()))
    }

    async fn clear_recent(&self, _identity: &Identity) -> Result<()> {
        let mut state = self.state.lock().await;
        let before = std::mem::take(&mut state.recent);

        if let Err(e) = self.persist(&mut state).await {
            state.recent = before;
            return Err(AppError::QueryFailed(e.to_string()));
        }
        Ok(())
    }

    async fn shelves(&self, _identity: &Identity) -> Result<Vec<Shelf>> {
        Ok(self.state.lock().await.shelves.entries().to_vec())
    }

    async fn create_shelf(&self, _identity: &Identity, name: &str) -> Result<Shelf> {
        let mut state = self.state.lock().await;
        let before = state.shelves.clone();
        let shelf = state.shelves.create(name)?;

        if let Err(e) = self.persist(&mut state).await {
            state.shelves = before;
            return Err(AppError::QueryFailed(e.to_string()));
        }
        Ok(shelf)
    }

    async fn delete_shelf(&self, _identity: &Identity, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let before = state.shelves.clone();
        if !state.shelves.delete(id) {
            return Err(unknown_shelf(id));
        }

        if let Err(e) = self.persist(&mut state).await {
            state.shelves = before;
            return Err(AppError::QueryFailed(e.to_string()));
        }
        Ok(())
    }

    async fn add_to_shelf(
        &self,
        _identity: &Identity,
        shelf_id: &str,
        book_id: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.books.iter().any(|b| b.id == book_id) {
            return Err(not_found(book_id));
        }

        let before = state.shelves.clone();
        if !state.shelves.add_book(shelf_id, book_id) {
            return Err(unknown_shelf(shelf_id));
        }

        if let Err(e) = self.persist(&mut state).await {
            state.shelves = before;
            return Err(AppError::QueryFailed(e.to_string()));
        }
        Ok(())
    }
}
