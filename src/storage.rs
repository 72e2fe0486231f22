//! Persistence backends.
//!
//! [`LibraryBackend`] is the one interface the library store talks to. Three
//! implementations exist, selected by `storage.backend`:
//!
//! - [`KeyValueBackend`]: a single JSON file emulating browser local
//!   storage, with content held in an in-memory handle table.
//! - [`ObjectBackend`]: a directory of per-book metadata and content objects.
//! - [`RemoteBackend`]: the SQLite database plus a blob bucket, scoped to the
//!   signed-in user.

mod bucket;
mod kv;
mod object;
mod remote;

pub use bucket::BlobBucket;
pub use kv::KeyValueBackend;
pub use object::ObjectBackend;
pub use remote::RemoteBackend;

use crate::config::{BackendKind, Config};
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::library::book::{BookRecord, NewBook, RecentEntry};
use crate::library::shelf::Shelf;
use async_trait::async_trait;
use std::sync::Arc;

/// Whose library a call operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// The single anonymous owner of a local backend.
    Local,
    /// A signed-in remote user.
    User(String),
}

impl Identity {
    /// User id for remote calls.
    pub fn user_id(&self) -> Result<&str> {
        match self {
            Identity::User(id) => Ok(id),
            Identity::Local => Err(AppError::NotAuthenticated),
        }
    }
}

/// Result of deleting a record's content after the record itself is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentRemoval {
    /// Content deleted, or there was nothing left to delete.
    Removed,
    /// The record is gone but its content could not be deleted.
    Failed(String),
}

/// Unified interface over the persistence variants.
#[async_trait]
pub trait LibraryBackend: Send + Sync {
    /// Variant of this backend.
    fn kind(&self) -> BackendKind;

    /// Whether calls need a signed-in user.
    fn requires_auth(&self) -> bool {
        false
    }

    /// All records, newest first.
    async fn list(&self, identity: &Identity) -> Result<Vec<BookRecord>>;

    /// One record by id.
    async fn get(&self, identity: &Identity, id: &str) -> Result<Option<BookRecord>>;

    /// Store content and insert a record with progress 0.
    async fn insert(&self, identity: &Identity, book: NewBook) -> Result<BookRecord>;

    /// Delete the record, then its content on a best-effort basis.
    async fn remove(&self, identity: &Identity, id: &str) -> Result<ContentRemoval>;

    /// Set the progress of a record.
    async fn update_progress(&self, identity: &Identity, id: &str, progress: u8) -> Result<()>;

    /// Raw content of a record.
    async fn content(&self, identity: &Identity, record: &BookRecord) -> Result<Vec<u8>>;

    /// Most recently read books.
    async fn recent(&self, identity: &Identity) -> Result<Vec<RecentEntry>>;

    /// Note that a book was opened for reading.
    async fn record_opened(&self, identity: &Identity, record: &BookRecord) -> Result<()>;

    /// Whether favorites are tracked.
    fn supports_favorites(&self) -> bool {
        false
    }

    /// Set the favorite flag of a record.
    async fn set_favorite(&self, _identity: &Identity, _id: &str, _favorite: bool) -> Result<()> {
        Err(unsupported("Favorites", self.kind()))
    }

    /// Favorite records, newest first.
    async fn favorites(&self, _identity: &Identity) -> Result<Vec<BookRecord>> {
        Err(unsupported("Favorites", self.kind()))
    }

    /// Forget the reading history. Records keep their progress.
    async fn clear_recent(&self, _identity: &Identity) -> Result<()> {
        Err(unsupported("Clearing history", self.kind()))
    }

    /// All shelves in creation order.
    async fn shelves(&self, _identity: &Identity) -> Result<Vec<Shelf>> {
        Err(unsupported("Shelves", self.kind()))
    }

    /// Append an empty shelf named `name`.
    async fn create_shelf(&self, _identity: &Identity, _name: &str) -> Result<Shelf> {
        Err(unsupported("Shelves", self.kind()))
    }

    /// Delete a shelf, leaving its books in the library.
    async fn delete_shelf(&self, _identity: &Identity, _id: &str) -> Result<()> {
        Err(unsupported("Shelves", self.kind()))
    }

    /// Put a book on a shelf.
    async fn add_to_shelf(
        &self,
        _identity: &Identity,
        _shelf_id: &str,
        _book_id: &str,
    ) -> Result<()> {
        Err(unsupported("Shelves", self.kind()))
    }
}

fn unsupported(feature: &str, kind: BackendKind) -> AppError {
    AppError::Unsupported(format!("{} not available with the {:?} backend", feature, kind))
}

/// An opened backend. For the remote variant the database handle is returned
/// as well so account management shares the same connection.
pub struct OpenedBackend {
    /// The library backend.
    pub backend: Arc<dyn LibraryBackend>,
    /// Database of the remote backend.
    pub database: Option<Database>,
}

/// Build the backend selected by the configuration.
pub fn open_backend(config: &Config) -> Result<OpenedBackend> {
    let opened = match config.storage.backend {
        BackendKind::Local => OpenedBackend {
            backend: Arc::new(KeyValueBackend::open(
                &config.storage.data_dir,
                config.library.recent_limit,
            )?),
            database: None,
        },
        BackendKind::Object => OpenedBackend {
            backend: Arc::new(ObjectBackend::open(
                &config.storage.data_dir,
                config.library.recent_limit,
            )?),
            database: None,
        },
        BackendKind::Remote => {
            let db = Database::open(&config.remote.database)?;
            OpenedBackend {
                backend: Arc::new(RemoteBackend::new(
                    db.clone(),
                    BlobBucket::open(&config.remote)?,
                    config.library.remote_recent_limit,
                )),
                database: Some(db),
            }
        }
    };

    tracing::info!(backend = ?config.storage.backend, "Library backend ready");
    Ok(opened)
}
