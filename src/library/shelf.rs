//! Named shelves grouping books of a local library.

use crate::error::{AppError, Result};
use crate::library::book::now_millis;
use serde::{Deserialize, Serialize};

/// Shelves every new local library starts with, as `(id, name)`.
pub const DEFAULT_SHELVES: [(&str, &str); 3] = [
    ("1", "Currently Reading"),
    ("2", "Favorites"),
    ("3", "Read Later"),
];

/// A named group of book ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shelf {
    /// Shelf id; millisecond timestamp for user-created shelves.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Books on the shelf, in the order they were added.
    #[serde(default)]
    pub book_ids: Vec<String>,
}

/// Ordered shelf collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShelfList {
    shelves: Vec<Shelf>,
}

impl Default for ShelfList {
    fn default() -> Self {
        let shelves = DEFAULT_SHELVES
            .iter()
            .map(|(id, name)| Shelf {
                id: id.to_string(),
                name: name.to_string(),
                book_ids: Vec::new(),
            })
            .collect();
        Self { shelves }
    }
}

impl ShelfList {
    /// Append a shelf. Blank names are rejected; duplicates are allowed.
    pub fn create(&mut self, name: &str) -> Result<Shelf> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::InvalidInput("Shelf name is empty".to_string()));
        }

        let shelf = Shelf {
            id: now_millis().to_string(),
            name: name.to_string(),
            book_ids: Vec::new(),
        };
        self.shelves.push(shelf.clone());
        Ok(shelf)
    }

    /// Drop a shelf. The books themselves are untouched.
    pub fn delete(&mut self, id: &str) -> bool {
        let before = self.shelves.len();
        self.shelves.retain(|s| s.id != id);
        self.shelves.len() != before
    }

    /// Put a book on a shelf. Returns false for an unknown shelf.
    pub fn add_book(&mut self, shelf_id: &str, book_id: &str) -> bool {
        let Some(shelf) = self.shelves.iter_mut().find(|s| s.id == shelf_id) else {
            return false;
        };
        if !shelf.book_ids.iter().any(|id| id == book_id) {
            shelf.book_ids.push(book_id.to_string());
        }
        true
    }

    /// Take a removed book off every shelf.
    pub fn forget_book(&mut self, book_id: &str) -> bool {
        let mut changed = false;
        for shelf in &mut self.shelves {
            let before = shelf.book_ids.len();
            shelf.book_ids.retain(|id| id != book_id);
            changed |= shelf.book_ids.len() != before;
        }
        changed
    }

    /// Shelves in creation order.
    pub fn entries(&self) -> &[Shelf] {
        &self.shelves
    }

    /// Consume into shelves.
    pub fn into_entries(self) -> Vec<Shelf> {
        self.shelves
    }
}

/// Error for a shelf id that does not exist.
pub(crate) fn unknown_shelf(id: &str) -> AppError {
    AppError::NotFound(format!("Shelf {}", id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_default_shelves() {
        let shelves = ShelfList::default();
        let names: Vec<_> = shelves.entries().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["Currently Reading", "Favorites", "Read Later"]);
    }

    #[test]
    fn create_trims_and_rejects_blank_names() {
        let mut shelves = ShelfList::default();
        assert!(matches!(shelves.create("   "), Err(AppError::InvalidInput(_))));
        assert_eq!(shelves.entries().len(), 3);

        let shelf = shelves.create("  Poetry ").unwrap();
        assert_eq!(shelf.name, "Poetry");
        assert_eq!(shelves.entries().last(), Some(&shelf));

        let again = shelves.create("Poetry").unwrap();
        assert_ne!(again.id, shelf.id);
    }

    #[test]
    fn books_are_shelved_once_and_forgotten_everywhere() {
        let mut shelves = ShelfList::default();
        assert!(shelves.add_book("1", "book-a"));
        assert!(shelves.add_book("1", "book-a"));
        assert!(shelves.add_book("3", "book-a"));
        assert!(!shelves.add_book("missing", "book-a"));
        assert_eq!(shelves.entries()[0].book_ids, ["book-a"]);

        assert!(shelves.forget_book("book-a"));
        assert!(!shelves.forget_book("book-a"));
        assert!(shelves.entries().iter().all(|s| s.book_ids.is_empty()));
    }

    #[test]
    fn delete_reports_unknown_ids() {
        let mut shelves = ShelfList::default();
        assert!(shelves.delete("2"));
        assert!(!shelves.delete("2"));
        assert_eq!(shelves.entries().len(), 2);
    }
}
