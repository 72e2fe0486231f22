use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable pointing at a config file.
pub const CONFIG_ENV: &str = "READSHELF_CONFIG";

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Which persistence backend backs the library.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Remote database and blob bucket.
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Reader and progress tracking.
    #[serde(default)]
    pub reader: ReaderConfig,

    /// Transient notifications.
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Library views.
    #[serde(default)]
    pub library: LibraryConfig,

    /// Cover generation.
    #[serde(default)]
    pub covers: CoverConfig,
}

/// Persistence backend variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Single JSON key-value file, content kept in memory.
    #[default]
    Local,
    /// Object store directory keyed by book id.
    Object,
    /// Authenticated database plus blob bucket.
    Remote,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Active backend.
    #[serde(default)]
    pub backend: BackendKind,

    /// Directory for the local and object-store backends.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

/// Remote backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_db_path")]
    pub database: PathBuf,

    /// Directory holding uploaded files.
    #[serde(default = "default_bucket_dir")]
    pub bucket_dir: PathBuf,

    /// Bucket name used in public URLs.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Base of public file URLs.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            database: default_db_path(),
            bucket_dir: default_bucket_dir(),
            bucket: default_bucket(),
            public_url: default_public_url(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/remote.db")
}

fn default_bucket_dir() -> PathBuf {
    PathBuf::from("data/bucket")
}

fn default_bucket() -> String {
    "books".to_string()
}

fn default_public_url() -> String {
    "http://localhost:8080/storage/public".to_string()
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Registration mode: "open", "disabled".
    #[serde(default = "default_registration")]
    pub registration: String,

    /// Session token duration in days.
    #[serde(default = "default_session_days")]
    pub session_days: u32,

    /// Whether new accounts must confirm their email before signing in.
    #[serde(default)]
    pub require_confirmation: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            registration: default_registration(),
            session_days: default_session_days(),
            require_confirmation: false,
        }
    }
}

fn default_registration() -> String {
    "open".to_string()
}

fn default_session_days() -> u32 {
    30
}

impl AuthConfig {
    /// Check if registration is enabled.
    pub fn registration_enabled(&self) -> bool {
        self.registration == "open"
    }
}

/// Reader configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Quiet period before a burst of navigations is persisted.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Characters per EPUB location.
    #[serde(default = "default_chars_per_location")]
    pub chars_per_location: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            chars_per_location: default_chars_per_location(),
        }
    }
}

impl ReaderConfig {
    /// Debounce window as a duration.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn default_debounce_ms() -> u64 {
    1000
}

fn default_chars_per_location() -> usize {
    1024
}

/// Notification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// How long a notification stays visible.
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_duration_secs(),
        }
    }
}

fn default_duration_secs() -> u64 {
    5
}

/// Library view configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Capacity of the persisted recent list (local backends).
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,

    /// Number of newest records shown as recent (remote backend).
    #[serde(default = "default_remote_recent_limit")]
    pub remote_recent_limit: usize,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            recent_limit: default_recent_limit(),
            remote_recent_limit: default_remote_recent_limit(),
        }
    }
}

fn default_recent_limit() -> usize {
    10
}

fn default_remote_recent_limit() -> usize {
    4
}

/// Cover configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverConfig {
    /// Thumbnail width in pixels.
    #[serde(default = "default_thumbnail_width")]
    pub thumbnail_width: u32,
}

impl Default for CoverConfig {
    fn default() -> Self {
        Self {
            thumbnail_width: default_thumbnail_width(),
        }
    }
}

fn default_thumbnail_width() -> u32 {
    300
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> crate::error::Result<Self> {
        toml::from_str(content).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Load the first config file found, or defaults.
    pub fn load_or_default() -> crate::error::Result<Self> {
        match Self::find_config_file() {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading configuration");
                Self::load(&path)
            }
            None => Ok(Self::default()),
        }
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            std::env::var_os(CONFIG_ENV)
                .map(PathBuf::from)
                .unwrap_or_default(),
            PathBuf::from("readshelf.toml"),
            PathBuf::from("config.toml"),
            dirs::config_dir()
                .map(|p| p.join("readshelf").join("config.toml"))
                .unwrap_or_default(),
        ];

        candidates
            .into_iter()
            .find(|p| !p.as_os_str().is_empty() && p.exists())
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# readshelf configuration

[storage]
# Backend: "local", "object" or "remote"
backend = "local"
data_dir = "data"

[remote]
# database = "/var/lib/readshelf/remote.db"
# bucket_dir = "/var/lib/readshelf/bucket"
bucket = "books"
public_url = "http://localhost:8080/storage/public"

[auth]
# Registration mode: "open" or "disabled"
registration = "open"
# Session duration in days
session_days = 30
# Require email confirmation before the first sign-in
require_confirmation = false

[reader]
# Quiet period before progress is saved
debounce_ms = 1000
chars_per_location = 1024

[notifications]
duration_secs = 5

[library]
recent_limit = 10
remote_recent_limit = 4

[covers]
thumbnail_width = 300
"#
        .to_string()
    }
}

/// Supported book formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookFormat {
    /// EPUB format (Electronic Publication).
    Epub,
    /// PDF format (Portable Document Format).
    Pdf,
}

impl BookFormat {
    /// Get the MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            BookFormat::Epub => "application/epub+zip",
            BookFormat::Pdf => "application/pdf",
        }
    }

    /// Short tag stored alongside records.
    pub fn as_str(&self) -> &'static str {
        match self {
            BookFormat::Epub => "epub",
            BookFormat::Pdf => "pdf",
        }
    }

    /// Try to detect format from file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "epub" => Some(BookFormat::Epub),
            "pdf" => Some(BookFormat::Pdf),
            _ => None,
        }
    }

    /// Detect format from a file name or path.
    pub fn from_filename(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        Self::from_extension(ext)
    }
}

impl std::fmt::Display for BookFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
