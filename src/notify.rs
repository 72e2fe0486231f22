//! Transient notifications (toasts).
//!
//! A [`Notifier`] is built once by the application root and cloned into
//! every component that reports outcomes. Each call appends a new entry;
//! entries expire after their duration or when dismissed.

use crate::config::NotificationConfig;
use crate::error::AppError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Kind of a notification, used for styling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    /// Operation succeeded.
    Success,
    /// Operation failed.
    Error,
    /// Neutral information.
    Info,
    /// Partial success or attention needed.
    Warning,
}

/// A single queued notification.
#[derive(Debug, Clone)]
pub struct Notification {
    /// Unique id, used for early dismissal.
    pub id: u64,
    /// Notification kind.
    pub kind: NoticeKind,
    /// Message shown to the user.
    pub message: String,
    /// Display duration.
    pub duration: Duration,
    created_at: Instant,
}

impl Notification {
    /// Instant after which the notification is gone.
    pub fn expires_at(&self) -> Instant {
        self.created_at + self.duration
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at()
    }
}

struct Inner {
    queue: Mutex<Vec<Notification>>,
    next_id: AtomicU64,
    default_duration: Duration,
    sender: broadcast::Sender<Notification>,
}

/// Notification queue. Expired entries are dropped on every push and read.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<Inner>,
}

impl Notifier {
    /// Create a notifier with the given default display duration.
    pub fn new(default_duration: Duration) -> Self {
        let (sender, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                default_duration,
                sender,
            }),
        }
    }

    /// Create a notifier from configuration.
    pub fn from_config(config: &NotificationConfig) -> Self {
        Self::new(Duration::from_secs(config.duration_secs))
    }

    /// Append a notification with the default duration.
    pub fn push(&self, kind: NoticeKind, message: impl Into<String>) -> u64 {
        self.push_with_duration(kind, message, self.inner.default_duration)
    }

    /// Append a notification with an explicit duration.
    pub fn push_with_duration(
        &self,
        kind: NoticeKind,
        message: impl Into<String>,
        duration: Duration,
    ) -> u64 {
        let notification = Notification {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
            message: message.into(),
            duration,
            created_at: Instant::now(),
        };
        let id = notification.id;

        tracing::debug!(id, kind = ?kind, message = %notification.message, "Notification");

        {
            let now = notification.created_at;
            let mut queue = self.inner.queue.lock();
            queue.retain(|n| !n.is_expired(now));
            queue.push(notification.clone());
        }
        // No subscriber is fine; the queue is the source of truth.
        let _ = self.inner.sender.send(notification);
        id
    }

    /// Success notification.
    pub fn success(&self, message: impl Into<String>) -> u64 {
        self.push(NoticeKind::Success, message)
    }

    /// Error notification.
    pub fn error(&self, message: impl Into<String>) -> u64 {
        self.push(NoticeKind::Error, message)
    }

    /// Informational notification.
    pub fn info(&self, message: impl Into<String>) -> u64 {
        self.push(NoticeKind::Info, message)
    }

    /// Warning notification.
    pub fn warning(&self, message: impl Into<String>) -> u64 {
        self.push(NoticeKind::Warning, message)
    }

    /// Report an error with the kind it maps to.
    pub fn report(&self, error: &AppError) -> u64 {
        self.push(error.notice_kind(), error.to_string())
    }

    /// Dismiss a notification before it expires.
    pub fn dismiss(&self, id: u64) -> bool {
        let mut queue = self.inner.queue.lock();
        let before = queue.len();
        queue.retain(|n| n.id != id);
        queue.len() != before
    }

    /// Live notifications in append order. Expired entries are dropped.
    pub fn active(&self) -> Vec<Notification> {
        let now = Instant::now();
        let mut queue = self.inner.queue.lock();
        queue.retain(|n| !n.is_expired(now));
        queue.clone()
    }

    /// Receive every notification as it is pushed.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.inner.sender.subscribe()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::from_config(&NotificationConfig::default())
    }
}
