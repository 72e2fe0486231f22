//! Session/auth guard for the remote backend.
//!
//! The guard starts in [`AuthState::Checking`] and resolves to
//! `Authenticated` or `Anonymous`. Every transition is published on a
//! `watch` channel so a shell can swap the library for a sign-in surface.

use crate::auth::{AuthService, SignUp};
use crate::db::User;
use crate::error::{AppError, Result};
use crate::notify::Notifier;
use crate::storage::Identity;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;

/// Public view of a signed-in account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountInfo {
    /// User id.
    pub id: String,
    /// Email address.
    pub email: String,
    /// Display name, if given.
    pub display_name: Option<String>,
}

impl From<&User> for AccountInfo {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            display_name: user.display_name.clone(),
        }
    }
}

/// Authentication state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// A stored session is being validated.
    Checking,
    /// A user is signed in.
    Authenticated(AccountInfo),
    /// Nobody is signed in.
    Anonymous,
}

/// Result of a sign-up through the guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// The account is active and signed in.
    SignedIn(AccountInfo),
    /// The account must be confirmed first; the guard stays anonymous.
    ConfirmationPending {
        /// Token to deliver to the user for [`AuthGuard::confirm_email`].
        confirmation_token: String,
    },
}

/// Tracks who is signed in and reports auth outcomes.
pub struct AuthGuard {
    auth: AuthService,
    notifier: Notifier,
    state: watch::Sender<AuthState>,
    token: Mutex<Option<String>>,
}

impl AuthGuard {
    /// Create a guard in the `Checking` state.
    pub fn new(auth: AuthService, notifier: Notifier) -> Self {
        let (state, _) = watch::channel(AuthState::Checking);
        Self {
            auth,
            notifier,
            state,
            token: Mutex::new(None),
        }
    }

    /// Current state.
    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    /// State changes.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    /// Session token of the signed-in user, for the shell to store.
    pub fn token(&self) -> Option<String> {
        self.token.lock().clone()
    }

    /// Identity for library calls. Fails unless signed in.
    pub fn identity(&self) -> Result<Identity> {
        match &*self.state.borrow() {
            AuthState::Authenticated(account) => Ok(Identity::User(account.id.clone())),
            _ => Err(AppError::NotAuthenticated),
        }
    }

    fn authenticate(&self, user: &User, token: String) -> AccountInfo {
        let account = AccountInfo::from(user);
        *self.token.lock() = Some(token);
        self.state
            .send_replace(AuthState::Authenticated(account.clone()));
        tracing::info!(user_id = %account.id, "Signed in");
        account
    }

    fn become_anonymous(&self) {
        *self.token.lock() = None;
        self.state.send_replace(AuthState::Anonymous);
    }

    /// Resolve the initial state from a stored session token.
    pub fn check(&self, token: Option<&str>) -> AuthState {
        match self.auth.purge_expired_sessions() {
            Ok(0) => {}
            Ok(purged) => tracing::debug!(purged, "Removed expired sessions"),
            Err(e) => tracing::warn!(error = %e, "Failed to remove expired sessions"),
        }

        let Some(token) = token else {
            self.become_anonymous();
            return self.state();
        };

        match self.auth.validate_token(token) {
            Ok(Some(user)) => {
                self.authenticate(&user, token.to_string());
            }
            Ok(None) => {
                tracing::debug!("Stored session is no longer valid");
                self.become_anonymous();
            }
            Err(e) => {
                tracing::error!(error = %e, "Session check failed");
                self.notifier.report(&e);
                self.become_anonymous();
            }
        }
        self.state()
    }

    /// Sign in with email and password.
    pub fn sign_in(&self, email: &str, password: &str) -> Result<AccountInfo> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(self.reject("Please enter your email and password"));
        }

        match self.auth.sign_in(email, password) {
            Ok((user, token)) => {
                let account = self.authenticate(&user, token);
                self.notifier.success("Signed in successfully");
                Ok(account)
            }
            Err(e) => {
                self.notifier.report(&e);
                Err(e)
            }
        }
    }

    /// Create an account. With confirmation required the guard stays
    /// anonymous and an informational notification is emitted.
    pub fn sign_up(&self, name: &str, email: &str, password: &str) -> Result<Registration> {
        if name.trim().is_empty() || email.trim().is_empty() || password.is_empty() {
            return Err(self.reject("Please fill in your name, email and password"));
        }

        match self.auth.sign_up(name, email, password) {
            Ok(SignUp::SignedIn { user, token }) => {
                let account = self.authenticate(&user, token);
                self.notifier.success("Account created");
                Ok(Registration::SignedIn(account))
            }
            Ok(SignUp::ConfirmationPending {
                user,
                confirmation_token,
            }) => {
                self.become_anonymous();
                self.notifier
                    .info(format!("Check {} to confirm your account", user.email));
                Ok(Registration::ConfirmationPending { confirmation_token })
            }
            Err(e) => {
                self.notifier.report(&e);
                Err(e)
            }
        }
    }

    /// Confirm an account and sign it in.
    pub fn confirm_email(&self, confirmation_token: &str) -> Result<AccountInfo> {
        match self.auth.confirm_email(confirmation_token) {
            Ok((user, token)) => {
                let account = self.authenticate(&user, token);
                self.notifier.success("Email confirmed");
                Ok(account)
            }
            Err(e) => {
                self.notifier.report(&e);
                Err(e)
            }
        }
    }

    /// Sign out. The server session is deleted on a best-effort basis; the
    /// guard is anonymous afterwards either way.
    pub fn sign_out(&self) {
        if let Some(token) = self.token()
            && let Err(e) = self.auth.sign_out(&token)
        {
            tracing::warn!(error = %e, "Failed to delete session");
        }

        self.become_anonymous();
        tracing::info!("Signed out");
        self.notifier.success("Signed out");
    }

    fn reject(&self, message: &str) -> AppError {
        self.notifier.error(message);
        AppError::Auth(message.to_string())
    }
}
