//! Book record model.

use crate::config::BookFormat;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// Where the content of a book lives. Exactly one per record, chosen by the
/// active backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ContentRef {
    /// Handle into the in-memory file table of the key-value backend.
    Handle(String),
    /// Key in the local object store.
    BlobKey(String),
    /// Public URL in the remote bucket.
    RemoteUrl(String),
}

/// Represents a book in the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRecord {
    /// Unique identifier for the book.
    pub id: String,

    /// Display title.
    pub title: String,

    /// File format.
    pub format: BookFormat,

    /// Content reference.
    pub content: ContentRef,

    /// Cover image as a data URL.
    pub cover: Option<String>,

    /// Creation time (ms since epoch).
    pub created_at: i64,

    /// Last time the book was opened (ms since epoch).
    #[serde(default)]
    pub last_opened: Option<i64>,

    /// Reading progress, 0-100.
    pub progress: u8,

    /// Favorite flag, only tracked by the remote backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_favorite: Option<bool>,
}

/// A validated book on its way into a backend.
#[derive(Debug, Clone)]
pub struct NewBook {
    /// Display title.
    pub title: String,
    /// Original file name.
    pub filename: String,
    /// File format derived from the file name.
    pub format: BookFormat,
    /// Cover data URL.
    pub cover: Option<String>,
    /// File content.
    pub data: Vec<u8>,
}

impl NewBook {
    /// Id used by local backends: file name plus creation timestamp.
    pub fn local_id(&self, created_at: i64) -> String {
        format!("{}-{}", self.filename, created_at)
    }
}

/// Entry of the recent/history list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentEntry {
    /// Book id.
    pub id: String,
    /// Display title.
    pub title: String,
    /// File format.
    pub format: BookFormat,
    /// Last read time (ms since epoch).
    pub last_read: i64,
    /// Progress when last seen.
    pub progress: u8,
}

impl From<&BookRecord> for RecentEntry {
    fn from(record: &BookRecord) -> Self {
        Self {
            id: record.id.clone(),
            title: record.title.clone(),
            format: record.format,
            last_read: record.last_opened.unwrap_or(record.created_at),
            progress: record.progress,
        }
    }
}

/// Clamp any progress input into 0-100.
pub fn clamp_progress(progress: i64) -> u8 {
    progress.clamp(0, 100) as u8
}

/// Sort records newest first.
///
/// Records created in the same millisecond keep their reverse insertion
/// order, so `records` is expected oldest first.
pub fn sort_newest_first(records: &mut [BookRecord]) {
    records.reverse();
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

static LAST_MILLIS: AtomicI64 = AtomicI64::new(0);

/// Current time in milliseconds, strictly increasing within the process.
pub fn now_millis() -> i64 {
    let now = Utc::now().timestamp_millis();
    let mut last = LAST_MILLIS.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_MILLIS.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed)
        {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}
