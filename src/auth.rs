//! Account management for the remote backend: password hashing, sign-up
//! with optional email confirmation, and session tokens.

use crate::config::AuthConfig;
use crate::db::{Database, Session, User, now_timestamp};
use crate::error::{AppError, Result};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;

/// Minimum password length accepted at sign-up.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Hash a password using Argon2.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
}

/// Verify a password against a hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("Invalid password hash: {}", e)))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Generate a secure random token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Outcome of a sign-up.
#[derive(Debug, Clone)]
pub enum SignUp {
    /// The account is active and signed in.
    SignedIn {
        /// New account.
        user: User,
        /// Session token.
        token: String,
    },
    /// The account must be confirmed before signing in.
    ConfirmationPending {
        /// New account.
        user: User,
        /// Token to pass to [`AuthService::confirm_email`].
        confirmation_token: String,
    },
}

/// Accounts and sessions stored in the remote database.
#[derive(Clone)]
pub struct AuthService {
    db: Database,
    session_duration_days: u32,
    registration_enabled: bool,
    require_confirmation: bool,
}

impl AuthService {
    /// Create the service with the configured registration policy.
    pub fn new(db: Database, config: &AuthConfig) -> Self {
        Self {
            db,
            session_duration_days: config.session_days,
            registration_enabled: config.registration_enabled(),
            require_confirmation: config.require_confirmation,
        }
    }

    /// Register a new account.
    pub fn sign_up(&self, name: &str, email: &str, password: &str) -> Result<SignUp> {
        if !self.registration_enabled {
            return Err(AppError::Auth("Registration is disabled".to_string()));
        }

        let email = normalize_email(email);
        if !email.contains('@') || email.len() > 254 {
            return Err(AppError::Auth(format!("'{}' is not a valid email", email)));
        }

        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::Auth(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let confirmation_token = self.require_confirmation.then(generate_token);
        let name = name.trim();

        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            email,
            password_hash: hash_password(password)?,
            display_name: (!name.is_empty()).then(|| name.to_string()),
            confirmed: confirmation_token.is_none(),
            confirmation_token: confirmation_token.clone(),
            created_at: now_timestamp(),
            last_login: None,
        };

        self.db.create_user(&user)?;
        tracing::info!(user_id = %user.id, "Account created");

        match confirmation_token {
            Some(confirmation_token) => Ok(SignUp::ConfirmationPending {
                user,
                confirmation_token,
            }),
            None => {
                let token = self.start_session(&user)?;
                Ok(SignUp::SignedIn { user, token })
            }
        }
    }

    /// Sign in with email and password, creating a session.
    pub fn sign_in(&self, email: &str, password: &str) -> Result<(User, String)> {
        let user = self
            .db
            .get_user_by_email(&normalize_email(email))?
            .ok_or_else(|| AppError::Auth("Invalid email or password".to_string()))?;

        if !verify_password(password, &user.password_hash)? {
            return Err(AppError::Auth("Invalid email or password".to_string()));
        }

        if !user.confirmed {
            return Err(AppError::Auth("Email address not confirmed".to_string()));
        }

        let token = self.start_session(&user)?;
        Ok((user, token))
    }

    /// Activate an account from its confirmation token and sign it in.
    pub fn confirm_email(&self, confirmation_token: &str) -> Result<(User, String)> {
        let user = self
            .db
            .confirm_user(confirmation_token)?
            .ok_or_else(|| AppError::Auth("Invalid confirmation token".to_string()))?;

        tracing::info!(user_id = %user.id, "Email confirmed");
        let token = self.start_session(&user)?;
        Ok((user, token))
    }

    fn start_session(&self, user: &User) -> Result<String> {
        self.db.update_user_last_login(&user.id)?;

        let token = generate_token();
        let expires_at = now_timestamp() + (self.session_duration_days as i64 * 24 * 60 * 60);

        self.db.create_session(&Session {
            token: token.clone(),
            user_id: user.id.clone(),
            expires_at,
        })?;

        Ok(token)
    }

    /// Validate a session token and return the user.
    pub fn validate_token(&self, token: &str) -> Result<Option<User>> {
        let session = match self.db.get_session(token)? {
            Some(s) => s,
            None => return Ok(None),
        };

        if session.expires_at < now_timestamp() {
            self.db.delete_session(token)?;
            return Ok(None);
        }

        self.db.get_user_by_id(&session.user_id)
    }

    /// Drop every expired session row. Returns how many were removed.
    pub fn purge_expired_sessions(&self) -> Result<usize> {
        self.db.cleanup_expired_sessions()
    }

    /// Sign out (delete session).
    pub fn sign_out(&self, token: &str) -> Result<()> {
        self.db.delete_session(token)
    }
}
