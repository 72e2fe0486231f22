//! Document adapters.
//!
//! Each supported format is wrapped behind [`DocumentAdapter`]: open,
//! navigate, render and report position. Positions are pulled with
//! [`DocumentAdapter::position`] and also pushed on every successful
//! navigation through a `watch` channel, which the progress tracker
//! subscribes to.

pub mod epub;
pub mod pdf;
mod session;

pub use epub::EpubDocument;
pub use pdf::PdfDocument;
pub use session::ReaderSession;

use crate::config::{BookFormat, ReaderConfig};
use crate::error::{AppError, Result};
use crate::library::intake::validate_filename;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Position inside an open document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadingPosition {
    /// Flow content: a location token and the fraction of content traversed.
    Flow {
        /// Stable location token.
        location: String,
        /// Fraction of content traversed, 0.0-1.0.
        fraction: f64,
    },
    /// Fixed-page content.
    Fixed {
        /// Current page, 1-based (0 when the document has no pages).
        page: u32,
        /// Total number of pages.
        total: u32,
    },
}

impl ReadingPosition {
    /// Normalized progress percentage.
    pub fn progress(&self) -> u8 {
        match self {
            ReadingPosition::Fixed { page, total } => {
                if *total == 0 {
                    return 0;
                }
                let percent = (*page as f64 / *total as f64 * 100.0).round();
                percent.clamp(0.0, 100.0) as u8
            }
            ReadingPosition::Flow { fraction, .. } => {
                if !fraction.is_finite() {
                    return 0;
                }
                (fraction * 100.0).round().clamp(0.0, 100.0) as u8
            }
        }
    }

    /// Stable token identifying the position.
    pub fn location_token(&self) -> String {
        match self {
            ReadingPosition::Flow { location, .. } => location.clone(),
            ReadingPosition::Fixed { page, .. } => format!("page:{}", page),
        }
    }
}

/// Navigation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    /// One unit forward.
    Next,
    /// One unit backward.
    Previous,
    /// Jump to a chapter href (EPUB) or page number (PDF).
    Href(String),
    /// Jump to a page (PDF) or location index (EPUB).
    Page(u32),
}

/// Table of contents entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    /// Display label.
    pub label: String,
    /// Target href, relative to the archive root.
    pub href: String,
    /// Nesting depth, 0 for top level.
    pub level: u32,
}

/// Format-specific presentation state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Presentation {
    /// PDF zoom factor.
    Scale(f32),
    /// EPUB font size in percent.
    FontPercent(u16),
}

/// Rendered content of the current position.
#[derive(Debug, Clone)]
pub struct RenderedView {
    /// Position that was rendered.
    pub position: ReadingPosition,
    /// Text content.
    pub text: String,
    /// Presentation applied.
    pub presentation: Presentation,
}

/// Uniform interface over a format engine.
pub trait DocumentAdapter: Send {
    /// Format of the open document.
    fn format(&self) -> BookFormat;

    /// Current position.
    fn position(&self) -> ReadingPosition;

    /// Move or jump. Clamped at document bounds, never fails.
    fn navigate(&mut self, navigation: Navigation) -> ReadingPosition;

    /// Jump to the position closest to a stored progress.
    fn seek_progress(&mut self, progress: u8) -> ReadingPosition;

    /// Table of contents.
    fn table_of_contents(&self) -> &[TocEntry];

    /// Current presentation setting.
    fn presentation(&self) -> Presentation;

    /// Zoom (PDF) or font size (EPUB) by a number of steps.
    fn adjust_presentation(&mut self, steps: i32) -> Presentation;

    /// Render the current position.
    fn render(&self) -> Result<RenderedView>;

    /// Position stream, updated on every successful navigation.
    fn subscribe(&self) -> watch::Receiver<ReadingPosition>;
}

/// Open a document, choosing the adapter from the file name.
pub fn open_document(
    filename: &str,
    data: &[u8],
    config: &ReaderConfig,
) -> Result<Box<dyn DocumentAdapter>> {
    let format = validate_filename(filename)?;
    let document = open_format(format, data, config)?;

    tracing::debug!(filename, format = %format, "Opened document");
    Ok(document)
}

/// Open a document whose format is already known.
pub fn open_format(
    format: BookFormat,
    data: &[u8],
    config: &ReaderConfig,
) -> Result<Box<dyn DocumentAdapter>> {
    let document: Box<dyn DocumentAdapter> = match format {
        BookFormat::Epub => Box::new(EpubDocument::open(data, config.chars_per_location)?),
        BookFormat::Pdf => Box::new(PdfDocument::open(data)?),
    };
    Ok(document)
}

/// Publishes positions to subscribers.
pub(crate) struct PositionFeed {
    sender: watch::Sender<ReadingPosition>,
}

impl PositionFeed {
    pub(crate) fn new(initial: ReadingPosition) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    pub(crate) fn publish(&self, position: ReadingPosition) {
        self.sender.send_replace(position);
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ReadingPosition> {
        self.sender.subscribe()
    }
}

pub(crate) fn corrupt(format: BookFormat, err: impl std::fmt::Display) -> AppError {
    AppError::CorruptDocument(format!("Cannot read {} content: {}", format, err))
}
