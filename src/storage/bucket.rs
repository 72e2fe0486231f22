//! Blob bucket of the remote backend: a directory served under a public URL.

use crate::config::RemoteConfig;
use crate::error::{AppError, Result};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;

/// File storage addressed by `{user_id}/{timestamp}_{filename}` paths.
#[derive(Debug, Clone)]
pub struct BlobBucket {
    dir: PathBuf,
    bucket: String,
    public_url: String,
}

impl BlobBucket {
    /// Open the bucket directory, creating it if needed.
    pub fn open(config: &RemoteConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.bucket_dir).map_err(|e| {
            AppError::BackendUnavailable(format!(
                "Cannot open bucket at {}: {}",
                config.bucket_dir.display(),
                e
            ))
        })?;

        Ok(Self {
            dir: config.bucket_dir.clone(),
            bucket: config.bucket.clone(),
            public_url: config.public_url.trim_end_matches('/').to_string(),
        })
    }

    /// Object path for a new upload.
    pub fn object_path(user_id: &str, timestamp: i64, filename: &str) -> String {
        let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
        format!("{}/{}_{}", user_id, timestamp, name)
    }

    /// Public URL of an object path, each segment percent-encoded.
    pub fn public_url(&self, path: &str) -> String {
        let encoded: Vec<_> = path.split('/').map(urlencoding::encode).collect();
        format!("{}/{}/{}", self.public_url, self.bucket, encoded.join("/"))
    }

    /// Object path behind a public URL of this bucket.
    pub fn path_from_url(&self, url: &str) -> Option<String> {
        let prefix = format!("{}/{}/", self.public_url, self.bucket);
        let encoded = url.strip_prefix(&prefix)?;

        let segments = encoded
            .split('/')
            .map(|s| urlencoding::decode(s).ok().map(|s| s.into_owned()))
            .collect::<Option<Vec<_>>>()?;

        if segments.iter().any(|s| s.is_empty() || s == "." || s == "..") {
            return None;
        }
        Some(segments.join("/"))
    }

    fn local_path(&self, path: &str) -> PathBuf {
        self.dir.join(path)
    }

    /// Store an object.
    pub async fn upload(&self, path: &str, data: &[u8]) -> Result<()> {
        let target = self.local_path(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::UploadFailed(format!("{}: {}", path, e)))?;
        }

        fs::write(&target, data)
            .await
            .map_err(|e| AppError::UploadFailed(format!("{}: {}", path, e)))?;

        tracing::debug!(path, bytes = data.len(), "Uploaded object");
        Ok(())
    }

    /// Read an object.
    pub async fn download(&self, path: &str) -> Result<Vec<u8>> {
        match fs::read(self.local_path(path)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(AppError::NotFound(format!("Object '{}'", path)))
            }
            Err(e) => Err(AppError::BackendUnavailable(format!("{}: {}", path, e))),
        }
    }

    /// Delete an object. Deleting a missing object succeeds.
    pub async fn delete(&self, path: &str) -> Result<()> {
        match fs::remove_file(self.local_path(path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
