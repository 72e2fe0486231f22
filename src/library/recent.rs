//! Bounded most-recent-first history.

use crate::library::book::RecentEntry;
use serde::{Deserialize, Serialize};

/// Most-recent-first list of entries, deduplicated by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecentList {
    entries: Vec<RecentEntry>,
}

impl RecentList {
    /// Build from stored entries, enforcing the cap.
    pub fn from_entries(mut entries: Vec<RecentEntry>, cap: usize) -> Self {
        entries.truncate(cap);
        Self { entries }
    }

    /// Insert at the front. An existing entry with the same id is moved
    /// instead of duplicated; the oldest entries fall off past `cap`.
    pub fn touch(&mut self, entry: RecentEntry, cap: usize) {
        self.entries.retain(|e| e.id != entry.id);
        self.entries.insert(0, entry);
        self.entries.truncate(cap);
    }

    /// Update the progress of an entry in place.
    pub fn set_progress(&mut self, id: &str, progress: u8) -> bool {
        match self.entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.progress = progress;
                true
            }
            None => false,
        }
    }

    /// Drop an entry.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    /// Forget every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entries, newest first.
    pub fn entries(&self) -> &[RecentEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consume into entries.
    pub fn into_entries(self) -> Vec<RecentEntry> {
        self.entries
    }
}
