//! Debounced reading-progress persistence.
//!
//! A tracker listens to an open document's position stream and writes the
//! normalized progress through a [`ProgressSink`]. Bursts of navigation
//! collapse into one trailing write. Whatever is pending is flushed when the
//! tracker is closed or dropped, or when the document goes away.

use crate::error::{AppError, Result};
use crate::reader::ReadingPosition;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Destination of progress writes.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Persist the progress (0-100) of a book.
    async fn persist_progress(&self, book_id: &str, progress: u8) -> Result<()>;
}

/// Handle to a running tracker task.
pub struct ProgressTracker {
    close_tx: oneshot::Sender<()>,
    handle: JoinHandle<Option<u8>>,
}

impl ProgressTracker {
    /// Spawn a tracker for `book_id`.
    ///
    /// `persisted` is the progress already stored for the book; a position
    /// that normalizes to the same value is not written again.
    pub fn start(
        sink: Arc<dyn ProgressSink>,
        book_id: String,
        positions: watch::Receiver<ReadingPosition>,
        debounce: Duration,
        persisted: Option<u8>,
    ) -> Self {
        let (close_tx, close_rx) = oneshot::channel();

        let task = TrackerTask {
            sink,
            book_id,
            last_written: persisted,
            pending: None,
        };
        let handle = tokio::spawn(task.run(positions, debounce, close_rx));

        Self { close_tx, handle }
    }

    /// Flush any pending write and stop. Returns the last persisted progress.
    pub async fn close(self) -> Result<Option<u8>> {
        // The task may already have stopped because the document was dropped.
        let _ = self.close_tx.send(());
        self.handle
            .await
            .map_err(|e| AppError::Internal(format!("Progress tracker failed: {}", e)))
    }
}

struct TrackerTask {
    sink: Arc<dyn ProgressSink>,
    book_id: String,
    last_written: Option<u8>,
    pending: Option<u8>,
}

impl TrackerTask {
    async fn run(
        mut self,
        mut positions: watch::Receiver<ReadingPosition>,
        debounce: Duration,
        mut close_rx: oneshot::Receiver<()>,
    ) -> Option<u8> {
        let mut deadline: Option<Instant> = None;

        loop {
            // Positions first, so a change racing with close is not lost.
            tokio::select! {
                biased;

                changed = positions.changed() => {
                    if changed.is_err() {
                        tracing::debug!(book_id = %self.book_id, "Position stream closed");
                        break;
                    }
                    let progress = positions.borrow_and_update().progress();
                    self.pending = Some(progress);
                    deadline = Some(Instant::now() + debounce);
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    self.flush().await;
                }
                // Fires on close() and when the tracker handle is dropped.
                _ = &mut close_rx => break,
            }
        }

        self.flush().await;
        self.last_written
    }

    async fn flush(&mut self) {
        let Some(progress) = self.pending.take() else {
            return;
        };

        if self.last_written == Some(progress) {
            tracing::debug!(book_id = %self.book_id, progress, "Progress unchanged, skipping write");
            return;
        }

        match self.sink.persist_progress(&self.book_id, progress).await {
            Ok(()) => {
                tracing::debug!(book_id = %self.book_id, progress, "Progress saved");
                self.last_written = Some(progress);
            }
            Err(e) => {
                tracing::warn!(book_id = %self.book_id, progress, error = %e, "Failed to save progress");
            }
        }
    }
}
