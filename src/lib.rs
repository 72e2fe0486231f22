//! readshelf: core of a personal reading library.
//!
//! Books (EPUB and PDF) are added through a validated intake, stored by one
//! of several interchangeable backends and read through a uniform document
//! adapter whose position changes are persisted as progress.
//!
//! # Features
//!
//! - Local key-value, object-store and authenticated remote backends
//! - EPUB reflowable and PDF fixed-layout reading
//! - Debounced reading progress with a final flush on close
//! - Cover thumbnails from the first PDF page, placeholders otherwise
//! - Reading history, favorites and named shelves
//! - Transient user notifications for every outcome

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Application wiring.
pub mod app;
/// Password hashing and account management.
pub mod auth;
/// Configuration.
pub mod config;
/// Cover thumbnails.
pub mod covers;
/// Database operations.
pub mod db;
/// Error types.
pub mod error;
/// Library model and store.
pub mod library;
/// Transient notifications.
pub mod notify;
/// Debounced progress persistence.
pub mod progress;
/// Document adapters.
pub mod reader;
/// Auth guard.
pub mod session;
/// Persistence backends.
pub mod storage;
/// Logging setup.
pub mod telemetry;

#[cfg(test)]
mod tests;

pub use app::App;
pub use config::{BookFormat, Config};
pub use error::{AppError, Result};
pub use library::{BookRecord, LibraryStore, Upload};
pub use notify::{NoticeKind, Notification, Notifier};
pub use reader::{ReaderSession, ReadingPosition};
