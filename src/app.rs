//! Application wiring: configuration, backend, auth guard and library store.

use crate::auth::AuthService;
use crate::config::Config;
use crate::error::Result;
use crate::library::LibraryStore;
use crate::notify::Notifier;
use crate::session::{AuthGuard, AuthState};
use crate::storage::{OpenedBackend, open_backend};
use std::sync::Arc;

/// A fully wired reading library.
pub struct App {
    config: Config,
    notifier: Notifier,
    guard: Option<Arc<AuthGuard>>,
    library: Arc<LibraryStore>,
}

impl App {
    /// Wire the components selected by `config`.
    pub fn from_config(config: Config) -> Result<Self> {
        let notifier = Notifier::from_config(&config.notifications);
        let OpenedBackend { backend, database } = open_backend(&config)?;

        let guard = database.map(|db| {
            let auth = AuthService::new(db, &config.auth);
            Arc::new(AuthGuard::new(auth, notifier.clone()))
        });

        let library = Arc::new(LibraryStore::new(
            backend,
            guard.clone(),
            notifier.clone(),
            &config,
        ));

        Ok(Self {
            config,
            notifier,
            guard,
            library,
        })
    }

    /// Load the configuration from the default locations and wire it.
    pub fn load() -> Result<Self> {
        Self::from_config(Config::load_or_default()?)
    }

    /// Resolve the initial auth state from a stored session token. Local
    /// backends have no accounts and are always anonymous.
    pub fn resume(&self, token: Option<&str>) -> AuthState {
        match &self.guard {
            Some(guard) => guard.check(token),
            None => AuthState::Anonymous,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared notification queue.
    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Auth guard, present for the remote backend.
    pub fn guard(&self) -> Option<&Arc<AuthGuard>> {
        self.guard.as_ref()
    }

    /// Library store.
    pub fn library(&self) -> &Arc<LibraryStore> {
        &self.library
    }
}
