//! Object-store backend: one metadata object and one content object per
//! book, keyed by the percent-encoded book id.

use crate::config::BackendKind;
use crate::error::{AppError, Result};
use crate::library::book::{
    BookRecord, ContentRef, NewBook, RecentEntry, now_millis, sort_newest_first,
};
use crate::library::recent::RecentList;
use crate::library::shelf::{Shelf, ShelfList, unknown_shelf};
use crate::storage::{ContentRemoval, Identity, LibraryBackend};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

const OBJECTS_DIR: &str = "objects";
const RECENT_FILE: &str = "recent.json";
const SHELVES_FILE: &str = "shelves.json";

/// Library stored as a directory of objects.
pub struct ObjectBackend {
    root: PathBuf,
    recent_path: PathBuf,
    shelves_path: PathBuf,
    // Serializes read-modify-write of metadata, the recent list and shelves.
    write_lock: tokio::sync::Mutex<()>,
    recent_limit: usize,
}

impl ObjectBackend {
    /// Open (or create) the object directory under `data_dir`.
    pub fn open(data_dir: &Path, recent_limit: usize) -> Result<Self> {
        let root = data_dir.join(OBJECTS_DIR);
        std::fs::create_dir_all(&root).map_err(|e| {
            AppError::BackendUnavailable(format!("Cannot create {}: {}", root.display(), e))
        })?;

        Ok(Self {
            root,
            recent_path: data_dir.join(RECENT_FILE),
            shelves_path: data_dir.join(SHELVES_FILE),
            write_lock: tokio::sync::Mutex::new(()),
            recent_limit,
        })
    }

    /// Object key of a book id.
    pub fn key_for(id: &str) -> String {
        urlencoding::encode(id).into_owned()
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", key))
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.bin", key))
    }

    async fn read_meta(&self, id: &str) -> Result<Option<BookRecord>> {
        match fs::read(self.meta_path(&Self::key_for(id))).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::QueryFailed(format!("Cannot read '{}': {}", id, e))),
        }
    }

    async fn write_meta(&self, record: &BookRecord) -> Result<()> {
        let path = self.meta_path(&Self::key_for(&record.id));
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(record)?).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load_recent(&self) -> RecentList {
        match fs::read(&self.recent_path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(entries) => RecentList::from_entries(entries, self.recent_limit),
                Err(e) => {
                    tracing::warn!(error = %e, "Malformed recent list, ignoring");
                    RecentList::default()
                }
            },
            Err(_) => RecentList::default(),
        }
    }

    async fn save_recent(&self, recent: &RecentList) -> Result<()> {
        fs::write(&self.recent_path, serde_json::to_vec_pretty(recent)?).await?;
        Ok(())
    }

    /// Stored shelves; the default set until the first save.
    async fn load_shelves(&self) -> Result<ShelfList> {
        match fs::read(&self.shelves_path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Malformed shelves, using defaults");
                ShelfList::default()
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(ShelfList::default()),
            Err(e) => Err(AppError::QueryFailed(format!("Cannot read shelves: {}", e))),
        }
    }

    async fn save_shelves(&self, shelves: &ShelfList) -> Result<()> {
        let tmp = self.shelves_path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(shelves)?).await?;
        fs::rename(&tmp, &self.shelves_path)
            .await
            .map_err(|e| AppError::QueryFailed(format!("Cannot save shelves: {}", e)))
    }
}

fn not_found(id: &str) -> AppError {
    AppError::NotFound(format!("Book '{}'", id))
}

#[async_trait]
impl LibraryBackend for ObjectBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Object
    }

    async fn list(&self, _identity: &Identity) -> Result<Vec<BookRecord>> {
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::QueryFailed(format!("Cannot list objects: {}", e))),
        };

        let mut records = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let bytes = fs::read(&path).await?;
            match serde_json::from_slice::<BookRecord>(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping malformed object")
                }
            }
        }

        sort_newest_first(&mut records);
        Ok(records)
    }

    async fn get(&self, _identity: &Identity, id: &str) -> Result<Option<BookRecord>> {
        self.read_meta(id).await
    }

    async fn insert(&self, _identity: &Identity, book: NewBook) -> Result<BookRecord> {
        let created_at = now_millis();
        let id = book.local_id(created_at);
        let key = Self::key_for(&id);

        fs::write(self.blob_path(&key), &book.data)
            .await
            .map_err(|e| AppError::UploadFailed(format!("Cannot store '{}': {}", book.filename, e)))?;

        let record = BookRecord {
            id,
            title: book.title,
            format: book.format,
            content: ContentRef::BlobKey(key.clone()),
            cover: book.cover,
            created_at,
            last_opened: None,
            progress: 0,
            is_favorite: None,
        };

        if let Err(e) = self.write_meta(&record).await {
            // Leave no orphan content behind a failed insert.
            let _ = fs::remove_file(self.blob_path(&key)).await;
            return Err(AppError::QueryFailed(format!("Cannot save '{}': {}", record.id, e)));
        }

        Ok(record)
    }

    async fn remove(&self, _identity: &Identity, id: &str) -> Result<ContentRemoval> {
        let _guard = self.write_lock.lock().await;
        let key = Self::key_for(id);

        match fs::remove_file(self.meta_path(&key)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_found(id)),
            Err(e) => return Err(AppError::QueryFailed(format!("Cannot delete '{}': {}", id, e))),
        }

        let mut recent = self.load_recent().await;
        if recent.remove(id)
            && let Err(e) = self.save_recent(&recent).await
        {
            tracing::warn!(book_id = %id, error = %e, "Failed to update recent list");
        }

        match self.load_shelves().await {
            Ok(mut shelves) => {
                if shelves.forget_book(id)
                    && let Err(e) = self.save_shelves(&shelves).await
                {
                    tracing::warn!(book_id = %id, error = %e, "Failed to update shelves");
                }
            }
            Err(e) => tracing::warn!(book_id = %id, error = %e, "Failed to update shelves"),
        }

        match fs::remove_file(self.blob_path(&key)).await {
            Ok(()) => Ok(ContentRemoval::Removed),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(ContentRemoval::Removed),
            Err(e) => Ok(ContentRemoval::Failed(e.to_string())),
        }
    }

    async fn update_progress(&self, _identity: &Identity, id: &str, progress: u8) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut record = self.read_meta(id).await?.ok_or_else(|| not_found(id))?;
        record.progress = progress;
        self.write_meta(&record)
            .await
            .map_err(|e| AppError::QueryFailed(e.to_string()))?;

        let mut recent = self.load_recent().await;
        if recent.set_progress(id, progress) {
            self.save_recent(&recent).await?;
        }
        Ok(())
    }

    async fn content(&self, _identity: &Identity, record: &BookRecord) -> Result<Vec<u8>> {
        let ContentRef::BlobKey(key) = &record.content else {
            return Err(AppError::NotFound(format!("No content key for '{}'", record.id)));
        };

        match fs::read(self.blob_path(key)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(AppError::NotFound(format!(
                "Content of '{}' is missing",
                record.title
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn recent(&self, _identity: &Identity) -> Result<Vec<RecentEntry>> {
        Ok(self.load_recent().await.into_entries())
    }

    async fn record_opened(&self, _identity: &Identity, record: &BookRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut stored = self
            .read_meta(&record.id)
            .await?
            .ok_or_else(|| not_found(&record.id))?;
        stored.last_opened = Some(now_millis());
        self.write_meta(&stored).await?;

        let mut recent = self.load_recent().await;
        recent.touch(RecentEntry::from(&stored), self.recent_limit);
        self.save_recent(&recent).await
    }

    async fn clear_recent(&self, _identity: &Identity) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.save_recent(&RecentList::default())
            .await
            .map_err(|e| AppError::QueryFailed(format!("Cannot clear history: {}", e)))
    }

    async fn shelves(&self, _identity: &Identity) -> Result<Vec<Shelf>> {
        Ok(self.load_shelves().await?.into_entries())
    }

    async fn create_shelf(&self, _identity: &Identity, name: &str) -> Result<Shelf> {
        let _guard = self.write_lock.lock().await;
        let mut shelves = self.load_shelves().await?;
        let shelf = shelves.create(name)?;
        self.save_shelves(&shelves).await?;
        Ok(shelf)
    }

    async fn delete_shelf(&self, _identity: &Identity, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut shelves = self.load_shelves().await?;
        if !shelves.delete(id) {
            return Err(unknown_shelf(id));
        }
        self.save_shelves(&shelves).await
    }

    async fn add_to_shelf(
        &self,
        _identity: &Identity,
        shelf_id: &str,
        book_id: &str,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.read_meta(book_id).await?.is_none() {
            return Err(not_found(book_id));
        }

        let mut shelves = self.load_shelves().await?;
        if !shelves.add_book(shelf_id, book_id) {
            return Err(unknown_shelf(shelf_id));
        }
        self.save_shelves(&shelves).await
    }
}
