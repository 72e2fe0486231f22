//! Library model and store.

pub mod book;
pub mod intake;
pub mod recent;
pub mod shelf;
mod store;

pub use book::{BookRecord, ContentRef, NewBook, RecentEntry};
pub use intake::Upload;
pub use recent::RecentList;
pub use shelf::{Shelf, ShelfList};
pub use store::LibraryStore;
