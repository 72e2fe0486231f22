use crate::db::*;
use crate::error::{AppError, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::Arc;

const USER_COLUMNS: &str =
    "id, email, password_hash, display_name, confirmed, confirmation_token, created_at, last_login";

const BOOK_COLUMNS: &str =
    "id, title, file_url, file_type, user_id, cover, progress, is_favorite, created_at";

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::BackendUnavailable(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::BackendUnavailable(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- Users table
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                display_name TEXT,
                confirmed INTEGER NOT NULL DEFAULT 1,
                confirmation_token TEXT,
                created_at INTEGER NOT NULL,
                last_login INTEGER
            );

            -- Sessions table
            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Books table
            CREATE TABLE IF NOT EXISTS books (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                file_url TEXT NOT NULL,
                file_type TEXT NOT NULL,
                user_id TEXT NOT NULL,
                cover TEXT,
                progress INTEGER NOT NULL DEFAULT 0,
                is_favorite INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_books_user_created ON books(user_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at);
            CREATE INDEX IF NOT EXISTS idx_users_confirmation ON users(confirmation_token);
            "#,
        )
        .map_err(|e| AppError::BackendUnavailable(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    // ========== USER OPERATIONS ==========

    fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            password_hash: row.get(2)?,
            display_name: row.get(3)?,
            confirmed: row.get(4)?,
            confirmation_token: row.get(5)?,
            created_at: row.get(6)?,
            last_login: row.get(7)?,
        })
    }

    /// Create a new user.
    pub fn create_user(&self, user: &User) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (id, email, password_hash, display_name, confirmed, confirmation_token, created_at, last_login)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                user.id,
                user.email,
                user.password_hash,
                user.display_name,
                user.confirmed,
                user.confirmation_token,
                user.created_at,
                user.last_login,
            ],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint") {
                AppError::Auth(format!("An account for '{}' already exists", user.email))
            } else {
                AppError::QueryFailed(format!("Failed to create user: {}", e))
            }
        })?;
        Ok(())
    }

    /// Get user by email.
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS),
            params![email],
            Self::user_from_row,
        )
        .optional()
        .map_err(|e| AppError::QueryFailed(format!("Failed to get user: {}", e)))
    }

    /// Get user by ID.
    pub fn get_user_by_id(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
            params![id],
            Self::user_from_row,
        )
        .optional()
        .map_err(|e| AppError::QueryFailed(format!("Failed to get user: {}", e)))
    }

    /// Mark the user holding `token` as confirmed. Returns the user, if any.
    pub fn confirm_user(&self, token: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        let user = conn
            .query_row(
                &format!(
                    "SELECT {} FROM users WHERE confirmation_token = ?1",
                    USER_COLUMNS
                ),
                params![token],
                Self::user_from_row,
            )
            .optional()
            .map_err(|e| AppError::QueryFailed(format!("Failed to get user: {}", e)))?;

        let Some(mut user) = user else {
            return Ok(None);
        };

        conn.execute(
            "UPDATE users SET confirmed = 1, confirmation_token = NULL WHERE id = ?1",
            params![user.id],
        )
        .map_err(|e| AppError::QueryFailed(format!("Failed to confirm user: {}", e)))?;

        user.confirmed = true;
        user.confirmation_token = None;
        Ok(Some(user))
    }

    /// Update user last login time.
    pub fn update_user_last_login(&self, user_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE users SET last_login = ?1 WHERE id = ?2",
            params![now_timestamp(), user_id],
        )
        .map_err(|e| AppError::QueryFailed(format!("Failed to update last login: {}", e)))?;
        Ok(())
    }

    // ========== SESSION OPERATIONS ==========

    /// Create a new session.
    pub fn create_session(&self, session: &Session) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
            params![session.token, session.user_id, session.expires_at],
        )
        .map_err(|e| AppError::QueryFailed(format!("Failed to create session: {}", e)))?;
        Ok(())
    }

    /// Get session by token.
    pub fn get_session(&self, token: &str) -> Result<Option<Session>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT token, user_id, expires_at FROM sessions WHERE token = ?1",
            params![token],
            |row| {
                Ok(Session {
                    token: row.get(0)?,
                    user_id: row.get(1)?,
                    expires_at: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(|e| AppError::QueryFailed(format!("Failed to get session: {}", e)))
    }

    /// Delete session.
    pub fn delete_session(&self, token: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])
            .map_err(|e| AppError::QueryFailed(format!("Failed to delete session: {}", e)))?;
        Ok(())
    }

    /// Clean up expired sessions.
    pub fn cleanup_expired_sessions(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "DELETE FROM sessions WHERE expires_at < ?1",
                params![now_timestamp()],
            )
            .map_err(|e| AppError::QueryFailed(format!("Failed to cleanup sessions: {}", e)))?;
        Ok(rows)
    }

    // ========== BOOK OPERATIONS ==========

    fn book_from_row(row: &Row<'_>) -> rusqlite::Result<StoredBook> {
        Ok(StoredBook {
            id: row.get(0)?,
            title: row.get(1)?,
            file_url: row.get(2)?,
            file_type: row.get(3)?,
            user_id: row.get(4)?,
            cover: row.get(5)?,
            progress: row.get(6)?,
            is_favorite: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    fn query_books(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<StoredBook>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| AppError::QueryFailed(format!("Failed to prepare query: {}", e)))?;

        let books = stmt
            .query_map(params, Self::book_from_row)
            .map_err(|e| AppError::QueryFailed(format!("Failed to list books: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::QueryFailed(format!("Failed to collect books: {}", e)))?;

        Ok(books)
    }

    /// Insert a book row.
    pub fn insert_book(&self, book: &StoredBook) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO books ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                BOOK_COLUMNS
            ),
            params![
                book.id,
                book.title,
                book.file_url,
                book.file_type,
                book.user_id,
                book.cover,
                book.progress,
                book.is_favorite,
                book.created_at,
            ],
        )
        .map_err(|e| AppError::QueryFailed(format!("Failed to insert book: {}", e)))?;
        Ok(())
    }

    /// Get one of a user's books.
    pub fn get_book(&self, id: &str, user_id: &str) -> Result<Option<StoredBook>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!(
                "SELECT {} FROM books WHERE id = ?1 AND user_id = ?2",
                BOOK_COLUMNS
            ),
            params![id, user_id],
            Self::book_from_row,
        )
        .optional()
        .map_err(|e| AppError::QueryFailed(format!("Failed to get book: {}", e)))
    }

    /// All books of a user, newest first.
    pub fn list_books(&self, user_id: &str) -> Result<Vec<StoredBook>> {
        self.query_books(
            &format!(
                "SELECT {} FROM books WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC",
                BOOK_COLUMNS
            ),
            params![user_id],
        )
    }

    /// Most recently created books of a user.
    pub fn recent_books(&self, user_id: &str, limit: usize) -> Result<Vec<StoredBook>> {
        self.query_books(
            &format!(
                "SELECT {} FROM books WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
                BOOK_COLUMNS
            ),
            params![user_id, limit as i64],
        )
    }

    /// Favorite books of a user, newest first.
    pub fn favorite_books(&self, user_id: &str) -> Result<Vec<StoredBook>> {
        self.query_books(
            &format!(
                "SELECT {} FROM books WHERE user_id = ?1 AND is_favorite = 1 ORDER BY created_at DESC, rowid DESC",
                BOOK_COLUMNS
            ),
            params![user_id],
        )
    }

    /// Update the progress of a book. Returns false when no row matched.
    pub fn update_book_progress(&self, id: &str, user_id: &str, progress: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE books SET progress = ?1 WHERE id = ?2 AND user_id = ?3",
                params![progress, id, user_id],
            )
            .map_err(|e| AppError::QueryFailed(format!("Failed to update progress: {}", e)))?;
        Ok(rows > 0)
    }

    /// Set the favorite flag of a book. Returns false when no row matched.
    pub fn set_book_favorite(&self, id: &str, user_id: &str, favorite: bool) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE books SET is_favorite = ?1 WHERE id = ?2 AND user_id = ?3",
                params![favorite, id, user_id],
            )
            .map_err(|e| AppError::QueryFailed(format!("Failed to update favorite: {}", e)))?;
        Ok(rows > 0)
    }

    /// Delete a book row.
    pub fn delete_book(&self, id: &str, user_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "DELETE FROM books WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .map_err(|e| AppError::QueryFailed(format!("Failed to delete book: {}", e)))?;
        Ok(rows > 0)
    }
}
