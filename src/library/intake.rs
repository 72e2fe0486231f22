//! File intake: picked or dropped files funnel through one validation path.

use crate::config::BookFormat;
use crate::error::{AppError, Result};
use std::path::{Path, PathBuf};

/// Validate a file name and derive its format.
pub fn validate_filename(name: &str) -> Result<BookFormat> {
    BookFormat::from_filename(name).ok_or_else(|| {
        AppError::InvalidFormat(format!(
            "'{}' is not an EPUB or PDF file",
            name.rsplit(['/', '\\']).next().unwrap_or(name)
        ))
    })
}

/// A file selected by the user, not yet stored.
#[derive(Debug, Clone)]
pub struct Upload {
    /// File name including extension.
    pub filename: String,
    /// File content.
    pub data: Vec<u8>,
}

impl Upload {
    /// Wrap in-memory content.
    pub fn new(filename: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            data,
        }
    }

    /// Read a picked file. The extension is checked before the file is read.
    pub fn from_path(path: &Path) -> Result<Self> {
        let filename = path
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| AppError::InvalidFormat(format!("Invalid file name: {}", path.display())))?
            .to_string();

        validate_filename(&filename)?;
        let data = std::fs::read(path)?;

        Ok(Self { filename, data })
    }

    /// Take the first of a set of dropped files.
    pub fn from_dropped(paths: &[PathBuf]) -> Result<Self> {
        let first = paths
            .first()
            .ok_or_else(|| AppError::InvalidFormat("No file dropped".to_string()))?;

        if paths.len() > 1 {
            tracing::debug!(dropped = paths.len(), "Ignoring extra dropped files");
        }

        Self::from_path(first)
    }

    /// Format derived from the file name.
    pub fn format(&self) -> Result<BookFormat> {
        validate_filename(&self.filename)
    }

    /// Title used when none is given: the file stem.
    pub fn default_title(&self) -> String {
        Path::new(&self.filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Unknown")
            .to_string()
    }
}
