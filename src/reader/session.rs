use crate::error::Result;
use crate::library::book::BookRecord;
use crate::progress::{ProgressSink, ProgressTracker};
use crate::reader::{DocumentAdapter, Navigation, Presentation, ReadingPosition, RenderedView, TocEntry};
use std::sync::Arc;
use std::time::Duration;

/// An open document with its progress tracker attached.
///
/// Dropping the session releases the document and flushes any pending
/// progress write in the background; [`ReaderSession::close`] does the
/// same and waits for the write.
pub struct ReaderSession {
    record: BookRecord,
    document: Box<dyn DocumentAdapter>,
    tracker: ProgressTracker,
}

impl ReaderSession {
    /// Resume `document` at the record's stored progress and start tracking.
    pub fn start(
        record: BookRecord,
        mut document: Box<dyn DocumentAdapter>,
        sink: Arc<dyn ProgressSink>,
        debounce: Duration,
    ) -> Self {
        if record.progress > 0 {
            document.seek_progress(record.progress);
        }

        let tracker = ProgressTracker::start(
            sink,
            record.id.clone(),
            document.subscribe(),
            debounce,
            Some(record.progress),
        );

        tracing::info!(book_id = %record.id, progress = record.progress, "Reader opened");

        Self {
            record,
            document,
            tracker,
        }
    }

    /// The book being read, as it was when opened.
    pub fn record(&self) -> &BookRecord {
        &self.record
    }

    /// The underlying document.
    pub fn document(&self) -> &dyn DocumentAdapter {
        self.document.as_ref()
    }

    /// Current reading position.
    pub fn position(&self) -> ReadingPosition {
        self.document.position()
    }

    /// Move within the document. The tracker sees the new position.
    pub fn navigate(&mut self, navigation: Navigation) -> ReadingPosition {
        self.document.navigate(navigation)
    }

    /// Chapter entries, empty for fixed-layout documents.
    pub fn table_of_contents(&self) -> &[TocEntry] {
        self.document.table_of_contents()
    }

    /// Change font size or zoom by `steps`, clamped by the document.
    pub fn adjust_presentation(&mut self, steps: i32) -> Presentation {
        self.document.adjust_presentation(steps)
    }

    /// Render the content at the current position.
    pub fn render(&self) -> Result<RenderedView> {
        self.document.render()
    }

    /// Close the document and wait for the final progress write.
    ///
    /// Returns the last persisted progress.
    pub async fn close(self) -> Result<Option<u8>> {
        let Self {
            record,
            document,
            tracker,
        } = self;
        drop(document);

        let progress = tracker.close().await?;
        tracing::info!(book_id = %record.id, progress = ?progress, "Reader closed");
        Ok(progress)
    }
}
