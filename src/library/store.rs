//! Library store: the in-memory collection for the current identity, kept
//! consistent with the active backend.

use crate::config::{Config, ReaderConfig};
use crate::covers;
use crate::error::{AppError, Result};
use crate::library::book::{BookRecord, NewBook, RecentEntry, clamp_progress};
use crate::library::intake::Upload;
use crate::library::shelf::Shelf;
use crate::notify::Notifier;
use crate::progress::ProgressSink;
use crate::reader::{self, ReaderSession};
use crate::session::{AccountInfo, AuthGuard, Registration};
use crate::storage::{ContentRemoval, Identity, LibraryBackend};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Owns the book records of the current identity.
///
/// Mutating operations report exactly one outcome through the notifier.
/// Fetches carry a request generation; a fetch superseded by any later
/// collection change or identity change is discarded when it lands.
pub struct LibraryStore {
    backend: Arc<dyn LibraryBackend>,
    guard: Option<Arc<AuthGuard>>,
    notifier: Notifier,
    reader: ReaderConfig,
    thumbnail_width: u32,
    books: RwLock<Vec<BookRecord>>,
    generation: AtomicU64,
}

impl LibraryStore {
    /// Create a store over a backend. `guard` is required by backends that
    /// need a signed-in user.
    pub fn new(
        backend: Arc<dyn LibraryBackend>,
        guard: Option<Arc<AuthGuard>>,
        notifier: Notifier,
        config: &Config,
    ) -> Self {
        Self {
            backend,
            guard,
            notifier,
            reader: config.reader.clone(),
            thumbnail_width: config.covers.thumbnail_width,
            books: RwLock::new(Vec::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Notification channel the store reports to.
    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Auth guard, when the backend has accounts.
    pub fn guard(&self) -> Option<&Arc<AuthGuard>> {
        self.guard.as_ref()
    }

    /// Snapshot of the in-memory collection.
    pub fn books(&self) -> Vec<BookRecord> {
        self.books.read().clone()
    }

    fn identity(&self) -> Result<Identity> {
        if !self.backend.requires_auth() {
            return Ok(Identity::Local);
        }
        match &self.guard {
            Some(guard) => guard.identity(),
            None => Err(AppError::NotAuthenticated),
        }
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn fail<T>(&self, error: AppError) -> Result<T> {
        self.notifier.report(&error);
        Err(error)
    }

    fn identity_or_report(&self) -> Result<Identity> {
        self.identity().or_else(|e| self.fail(e))
    }

    fn clear(&self) {
        self.books.write().clear();
        self.next_generation();
    }

    // ========== COLLECTION OPERATIONS ==========

    /// Fetch all records, newest first. Reports only failures.
    pub async fn list(&self) -> Result<Vec<BookRecord>> {
        let generation = self.next_generation();
        let identity = self.identity_or_report()?;

        let result = self.backend.list(&identity).await;

        let mut books = self.books.write();
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(generation, "Discarding stale library fetch");
            return Ok(books.clone());
        }

        match result {
            Ok(fetched) => {
                *books = fetched.clone();
                Ok(fetched)
            }
            Err(e) => {
                drop(books);
                tracing::error!(error = %e, "Failed to load library");
                self.fail(e)
            }
        }
    }

    /// Add a book. The extension is validated before anything is stored.
    pub async fn add(&self, upload: Upload, title: Option<&str>) -> Result<BookRecord> {
        let format = match upload.format() {
            Ok(format) => format,
            Err(e) => return self.fail(e),
        };
        let identity = self.identity_or_report()?;

        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .unwrap_or_else(|| upload.default_title());
        let cover = covers::cover_for(format, &upload.data, &title, self.thumbnail_width);

        let book = NewBook {
            title,
            filename: upload.filename,
            format,
            cover: Some(cover),
            data: upload.data,
        };

        match self.backend.insert(&identity, book).await {
            Ok(record) => {
                self.books.write().insert(0, record.clone());
                self.next_generation();

                tracing::info!(book_id = %record.id, format = %record.format, "Book added");
                self.notifier
                    .success(format!("'{}' added to your library", record.title));
                Ok(record)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to add book");
                self.fail(e)
            }
        }
    }

    /// Remove a book. Content deletion is best effort: a failure there is
    /// reported as a warning and the record stays deleted.
    pub async fn remove(&self, id: &str) -> Result<ContentRemoval> {
        let identity = self.identity_or_report()?;

        let removal = match self.backend.remove(&identity, id).await {
            Ok(removal) => removal,
            Err(e) => {
                tracing::error!(book_id = %id, error = %e, "Failed to remove book");
                return self.fail(e);
            }
        };

        self.books.write().retain(|b| b.id != id);
        self.next_generation();

        match &removal {
            ContentRemoval::Removed => {
                tracing::info!(book_id = %id, "Book removed");
                self.notifier.success("Book removed");
            }
            ContentRemoval::Failed(reason) => {
                tracing::warn!(book_id = %id, reason = %reason, "Book removed but content was kept");
                self.notifier
                    .warning("Book removed, but its file could not be deleted");
            }
        }
        Ok(removal)
    }

    async fn write_progress(&self, id: &str, progress: u8) -> Result<()> {
        let identity = self.identity()?;
        self.backend.update_progress(&identity, id, progress).await?;

        let mut books = self.books.write();
        // A fetch started before this write may carry the old value.
        self.next_generation();
        if let Some(book) = books.iter_mut().find(|b| b.id == id) {
            book.progress = progress;
        }
        Ok(())
    }

    /// Set the progress of a book, clamped to 0-100.
    pub async fn update_progress(&self, id: &str, progress: i64) -> Result<u8> {
        let progress = clamp_progress(progress);

        match self.write_progress(id, progress).await {
            Ok(()) => {
                self.notifier.success("Progress saved");
                Ok(progress)
            }
            Err(e) => {
                tracing::error!(book_id = %id, error = %e, "Failed to save progress");
                self.fail(e)
            }
        }
    }

    /// Flip the favorite flag. Returns the new value.
    pub async fn toggle_favorite(&self, id: &str) -> Result<bool> {
        if !self.backend.supports_favorites() {
            return self.fail(AppError::Unsupported(
                "Favorites are only available with an account".to_string(),
            ));
        }
        let identity = self.identity_or_report()?;

        let cached = self
            .books
            .read()
            .iter()
            .find(|b| b.id == id)
            .and_then(|b| b.is_favorite);

        let current = match cached {
            Some(current) => current,
            None => match self.backend.get(&identity, id).await {
                Ok(Some(record)) => record.is_favorite.unwrap_or(false),
                Ok(None) => return self.fail(AppError::NotFound(format!("Book '{}'", id))),
                Err(e) => return self.fail(e),
            },
        };

        let favorite = !current;
        if let Err(e) = self.backend.set_favorite(&identity, id, favorite).await {
            tracing::error!(book_id = %id, error = %e, "Failed to update favorite");
            return self.fail(e);
        }

        if let Some(book) = self.books.write().iter_mut().find(|b| b.id == id) {
            book.is_favorite = Some(favorite);
        }

        self.notifier.success(if favorite {
            "Added to favorites"
        } else {
            "Removed from favorites"
        });
        Ok(favorite)
    }

    /// Favorite books, newest first.
    pub async fn favorites(&self) -> Result<Vec<BookRecord>> {
        let identity = self.identity_or_report()?;
        match self.backend.favorites(&identity).await {
            Ok(books) => Ok(books),
            Err(e) => self.fail(e),
        }
    }

    /// Reading history, most recent first.
    pub async fn recent(&self) -> Result<Vec<RecentEntry>> {
        let identity = self.identity_or_report()?;
        match self.backend.recent(&identity).await {
            Ok(entries) => Ok(entries),
            Err(e) => self.fail(e),
        }
    }

    /// Forget the reading history. Books and their progress are kept.
    pub async fn clear_history(&self) -> Result<()> {
        let identity = self.identity_or_report()?;
        match self.backend.clear_recent(&identity).await {
            Ok(()) => {
                tracing::info!("Reading history cleared");
                self.notifier.success("History cleared");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to clear history");
                self.fail(e)
            }
        }
    }

    // ========== SHELVES ==========

    /// Shelves in creation order. Reports only failures.
    pub async fn shelves(&self) -> Result<Vec<Shelf>> {
        let identity = self.identity_or_report()?;
        match self.backend.shelves(&identity).await {
            Ok(shelves) => Ok(shelves),
            Err(e) => self.fail(e),
        }
    }

    /// Create an empty shelf. A blank name is rejected without a backend call.
    pub async fn create_shelf(&self, name: &str) -> Result<Shelf> {
        if name.trim().is_empty() {
            return self.fail(AppError::InvalidInput("Please enter a shelf name".to_string()));
        }
        let identity = self.identity_or_report()?;

        match self.backend.create_shelf(&identity, name).await {
            Ok(shelf) => {
                self.notifier.success(format!("Shelf \"{}\" created", shelf.name));
                Ok(shelf)
            }
            Err(e) => {
                tracing::error!(name, error = %e, "Failed to create shelf");
                self.fail(e)
            }
        }
    }

    /// Delete a shelf. Its books stay in the library.
    pub async fn delete_shelf(&self, id: &str) -> Result<()> {
        let identity = self.identity_or_report()?;
        match self.backend.delete_shelf(&identity, id).await {
            Ok(()) => {
                self.notifier.success("Shelf deleted");
                Ok(())
            }
            Err(e) => {
                tracing::error!(shelf_id = %id, error = %e, "Failed to delete shelf");
                self.fail(e)
            }
        }
    }

    /// Put a book on a shelf. Shelving a book twice keeps one entry.
    pub async fn add_to_shelf(&self, shelf_id: &str, book_id: &str) -> Result<()> {
        let identity = self.identity_or_report()?;
        match self.backend.add_to_shelf(&identity, shelf_id, book_id).await {
            Ok(()) => {
                self.notifier.success("Added to shelf");
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    shelf_id = %shelf_id,
                    book_id = %book_id,
                    error = %e,
                    "Failed to shelve book"
                );
                self.fail(e)
            }
        }
    }

    // ========== READER ==========

    /// Open a book for reading, resumed at its stored progress.
    ///
    /// A document the engine cannot parse is returned as
    /// [`AppError::CorruptDocument`] without a notification; the reader
    /// shows it in place.
    pub async fn open_reader(self: &Arc<Self>, id: &str) -> Result<ReaderSession> {
        let identity = self.identity_or_report()?;

        let cached = self.books.read().iter().find(|b| b.id == id).cloned();
        let record = match cached {
            Some(record) => record,
            None => match self.backend.get(&identity, id).await {
                Ok(Some(record)) => record,
                Ok(None) => return self.fail(AppError::NotFound(format!("Book '{}'", id))),
                Err(e) => return self.fail(e),
            },
        };

        let data = match self.backend.content(&identity, &record).await {
            Ok(data) => data,
            Err(e) => return self.fail(e),
        };

        let document = match reader::open_format(record.format, &data, &self.reader) {
            Ok(document) => document,
            Err(e) if e.is_inline() => {
                tracing::warn!(book_id = %id, error = %e, "Cannot render book");
                return Err(e);
            }
            Err(e) => return self.fail(e),
        };

        if let Err(e) = self.backend.record_opened(&identity, &record).await {
            tracing::warn!(book_id = %id, error = %e, "Failed to update reading history");
        }

        let sink: Arc<dyn ProgressSink> = self.clone();
        Ok(ReaderSession::start(
            record,
            document,
            sink,
            self.reader.debounce(),
        ))
    }

    // ========== ACCOUNT ==========

    fn require_guard(&self) -> Result<&Arc<AuthGuard>> {
        match &self.guard {
            Some(guard) => Ok(guard),
            None => self.fail(AppError::Unsupported(
                "Accounts are only available with the remote backend".to_string(),
            )),
        }
    }

    /// Sign in. The collection is reset for the new identity.
    pub fn sign_in(&self, email: &str, password: &str) -> Result<AccountInfo> {
        let account = self.require_guard()?.sign_in(email, password)?;
        self.clear();
        Ok(account)
    }

    /// Create an account.
    pub fn sign_up(&self, name: &str, email: &str, password: &str) -> Result<Registration> {
        let registration = self.require_guard()?.sign_up(name, email, password)?;
        self.clear();
        Ok(registration)
    }

    /// Confirm an account from its emailed token and sign it in.
    pub fn confirm_email(&self, confirmation_token: &str) -> Result<AccountInfo> {
        let account = self.require_guard()?.confirm_email(confirmation_token)?;
        self.clear();
        Ok(account)
    }

    /// Sign out and drop every record of the previous identity.
    pub fn sign_out(&self) -> Result<()> {
        self.require_guard()?.sign_out();
        self.clear();
        Ok(())
    }
}

#[async_trait]
impl ProgressSink for LibraryStore {
    async fn persist_progress(&self, book_id: &str, progress: u8) -> Result<()> {
        self.write_progress(book_id, progress).await.inspect_err(|e| {
            self.notifier.report(e);
        })
    }
}
