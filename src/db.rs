mod schema;

pub use schema::Database;

use crate::config::BookFormat;
use crate::library::book::{BookRecord, ContentRef};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// User account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID.
    pub id: String,
    /// Email used to sign in.
    pub email: String,
    /// Argon2 password hash.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Display name given at sign-up.
    pub display_name: Option<String>,
    /// Whether the email address has been confirmed.
    pub confirmed: bool,
    /// Pending email confirmation token.
    #[serde(skip_serializing)]
    pub confirmation_token: Option<String>,
    /// Account creation timestamp.
    pub created_at: i64,
    /// Last login timestamp.
    pub last_login: Option<i64>,
}

/// Authentication session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Session token.
    pub token: String,
    /// User ID.
    pub user_id: String,
    /// Expiration timestamp.
    pub expires_at: i64,
}

/// Row of the `books` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredBook {
    /// Book ID.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Public URL of the content in the bucket.
    pub file_url: String,
    /// MIME type of the content.
    pub file_type: String,
    /// Owner.
    pub user_id: String,
    /// Cover data URL.
    pub cover: Option<String>,
    /// Reading progress, 0-100.
    pub progress: i64,
    /// Favorite flag.
    pub is_favorite: bool,
    /// Creation timestamp (ms).
    pub created_at: i64,
}

impl StoredBook {
    /// Convert the row into a library record. Rows with an unknown file
    /// type fall back to the format implied by the URL.
    pub fn into_record(self) -> BookRecord {
        let format = match self.file_type.as_str() {
            "application/pdf" => BookFormat::Pdf,
            "application/epub+zip" => BookFormat::Epub,
            _ => BookFormat::from_filename(&self.file_url).unwrap_or(BookFormat::Epub),
        };

        BookRecord {
            id: self.id,
            title: self.title,
            format,
            content: ContentRef::RemoteUrl(self.file_url),
            cover: self.cover,
            created_at: self.created_at,
            last_opened: None,
            progress: self.progress.clamp(0, 100) as u8,
            is_favorite: Some(self.is_favorite),
        }
    }
}

/// Timestamp helper.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}
