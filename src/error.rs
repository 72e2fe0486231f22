use crate::notify::NoticeKind;
use thiserror::Error;

/// Main error type for the application.
#[derive(Error, Debug)]
pub enum AppError {
    /// Unsupported file extension, rejected before any I/O.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// The EPUB or PDF engine could not parse the content.
    #[error("Corrupt document: {0}")]
    CorruptDocument(String),

    /// The persistence backend could not be reached or opened.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Storing book content failed.
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    /// A record query or update failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Operation attempted without a valid session.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Authentication was rejected (bad credentials, registration closed...).
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Resource not found error.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Form input rejected before any backend call.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation not offered by the active backend.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// ZIP archive error.
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// XML parsing error.
    #[error("XML parsing error: {0}")]
    Xml(#[from] roxmltree::Error),

    /// PDF processing error.
    #[error("PDF error: {0}")]
    Pdf(String),

    /// Image processing error.
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Notification kind used when this error is surfaced to the user.
    pub fn notice_kind(&self) -> NoticeKind {
        match self {
            AppError::NotAuthenticated => NoticeKind::Warning,
            _ => NoticeKind::Error,
        }
    }

    /// Errors rendered in place by the reader instead of as a notification.
    pub fn is_inline(&self) -> bool {
        matches!(self, AppError::CorruptDocument(_))
    }
}

/// Result type alias for the application.
pub type Result<T> = std::result::Result<T, AppError>;
