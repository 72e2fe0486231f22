//! Remote backend: book rows in the database, content in the blob bucket,
//! every call scoped to the signed-in user.

use crate::config::BackendKind;
use crate::db::{Database, StoredBook};
use crate::error::{AppError, Result};
use crate::library::book::{BookRecord, ContentRef, NewBook, RecentEntry, now_millis};
use crate::storage::{BlobBucket, ContentRemoval, Identity, LibraryBackend};
use async_trait::async_trait;

/// Database plus bucket backend.
pub struct RemoteBackend {
    db: Database,
    bucket: BlobBucket,
    recent_limit: usize,
}

impl RemoteBackend {
    /// Create the backend. `recent_limit` bounds the history view, which is
    /// derived from creation time.
    pub fn new(db: Database, bucket: BlobBucket, recent_limit: usize) -> Self {
        Self {
            db,
            bucket,
            recent_limit,
        }
    }

    fn require(&self, identity: &Identity, id: &str) -> Result<StoredBook> {
        self.db
            .get_book(id, identity.user_id()?)?
            .ok_or_else(|| AppError::NotFound(format!("Book '{}'", id)))
    }
}

#[async_trait]
impl LibraryBackend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn requires_auth(&self) -> bool {
        true
    }

    async fn list(&self, identity: &Identity) -> Result<Vec<BookRecord>> {
        let books = self.db.list_books(identity.user_id()?)?;
        Ok(books.into_iter().map(StoredBook::into_record).collect())
    }

    async fn get(&self, identity: &Identity, id: &str) -> Result<Option<BookRecord>> {
        Ok(self
            .db
            .get_book(id, identity.user_id()?)?
            .map(StoredBook::into_record))
    }

    async fn insert(&self, identity: &Identity, book: NewBook) -> Result<BookRecord> {
        let user_id = identity.user_id()?;
        let created_at = now_millis();

        let path = BlobBucket::object_path(user_id, created_at, &book.filename);
        self.bucket.upload(&path, &book.data).await?;

        let row = StoredBook {
            id: uuid::Uuid::new_v4().to_string(),
            title: book.title,
            file_url: self.bucket.public_url(&path),
            file_type: book.format.mime_type().to_string(),
            user_id: user_id.to_string(),
            cover: book.cover,
            progress: 0,
            is_favorite: false,
            created_at,
        };

        if let Err(e) = self.db.insert_book(&row) {
            if let Err(cleanup) = self.bucket.delete(&path).await {
                tracing::warn!(path, error = %cleanup, "Failed to delete orphaned upload");
            }
            return Err(e);
        }

        Ok(row.into_record())
    }

    async fn remove(&self, identity: &Identity, id: &str) -> Result<ContentRemoval> {
        let user_id = identity.user_id()?;
        let row = self.require(identity, id)?;

        if !self.db.delete_book(id, user_id)? {
            return Err(AppError::NotFound(format!("Book '{}'", id)));
        }

        let Some(path) = self.bucket.path_from_url(&row.file_url) else {
            return Ok(ContentRemoval::Failed(format!(
                "'{}' is not a URL of this bucket",
                row.file_url
            )));
        };

        match self.bucket.delete(&path).await {
            Ok(()) => Ok(ContentRemoval::Removed),
            Err(e) => Ok(ContentRemoval::Failed(e.to_string())),
        }
    }

    async fn update_progress(&self, identity: &Identity, id: &str, progress: u8) -> Result<()> {
        if !self
            .db
            .update_book_progress(id, identity.user_id()?, progress as i64)?
        {
            return Err(AppError::NotFound(format!("Book '{}'", id)));
        }
        Ok(())
    }

    async fn content(&self, _identity: &Identity, record: &BookRecord) -> Result<Vec<u8>> {
        let ContentRef::RemoteUrl(url) = &record.content else {
            return Err(AppError::NotFound(format!("No content URL for '{}'", record.id)));
        };

        let path = self
            .bucket
            .path_from_url(url)
            .ok_or_else(|| AppError::NotFound(format!("'{}' is not a URL of this bucket", url)))?;
        self.bucket.download(&path).await
    }

    async fn recent(&self, identity: &Identity) -> Result<Vec<RecentEntry>> {
        let books = self.db.recent_books(identity.user_id()?, self.recent_limit)?;
        Ok(books
            .into_iter()
            .map(|row| RecentEntry::from(&row.into_record()))
            .collect())
    }

    async fn record_opened(&self, _identity: &Identity, _record: &BookRecord) -> Result<()> {
        // History is derived from creation time.
        Ok(())
    }

    fn supports_favorites(&self) -> bool {
        true
    }

    async fn set_favorite(&self, identity: &Identity, id: &str, favorite: bool) -> Result<()> {
        if !self.db.set_book_favorite(id, identity.user_id()?, favorite)? {
            return Err(AppError::NotFound(format!("Book '{}'", id)));
        }
        Ok(())
    }

    async fn favorites(&self, identity: &Identity) -> Result<Vec<BookRecord>> {
        let books = self.db.favorite_books(identity.user_id()?)?;
        Ok(books.into_iter().map(StoredBook::into_record).collect())
    }
}
