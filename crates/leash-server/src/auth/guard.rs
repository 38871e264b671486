//! Token and role checks
//!
//! Every operation past login goes through [`AccessGuard`]. Checks fail
//! closed: an empty, unknown or expired token is always `AccessDenied`.

use std::sync::Arc;

use leash_core::password::{HashFormatError, StoredHash};
use leash_core::token::token_prefix;
use leash_core::{LeashError, ROOT_USER};

use super::UserRegistry;
use crate::session::{SessionHandle, SessionStore};

/// Validates credentials and tokens against the user registry and session store
pub struct AccessGuard {
    users: Arc<UserRegistry>,
    sessions: Arc<SessionStore>,
}

impl AccessGuard {
    pub fn new(users: Arc<UserRegistry>, sessions: Arc<SessionStore>) -> Self {
        Self { users, sessions }
    }

    /// Check a username/password pair and open a session
    ///
    /// Returns the token of the new session.
    pub fn authenticate(
        &self,
        username: &str,
        password: &str,
        client_info: &str,
    ) -> Result<String, LeashError> {
        let result = self.verify_credentials(username, password);
        if let Err(e) = &result {
            tracing::warn!("Login failed for '{}': {}", username, e.kind());
        }
        result?;

        let session = self.sessions.create(username, client_info);
        // The user may have been removed while the password was checked
        if !self.users.contains(username) {
            self.sessions.delete(&session.token);
            tracing::warn!("Login for removed user '{}' discarded", username);
            return Err(LeashError::UnknownUser(username.to_string()));
        }
        tracing::info!(
            "User {} logged in ({}…)",
            username,
            token_prefix(&session.token)
        );
        Ok(session.token.clone())
    }

    fn verify_credentials(&self, username: &str, password: &str) -> Result<(), LeashError> {
        let user = self
            .users
            .get(username)
            .ok_or_else(|| LeashError::UnknownUser(username.to_string()))?;

        let stored = StoredHash::parse(&user.password).map_err(|e| match e {
            HashFormatError::Empty => LeashError::NoPassword(username.to_string()),
            other => LeashError::MalformedHash {
                username: username.to_string(),
                reason: other.to_string(),
            },
        })?;

        if stored.verify(password) {
            Ok(())
        } else {
            Err(LeashError::InvalidCredentials(username.to_string()))
        }
    }

    /// Resolve a token to its live session
    pub fn require_valid_token(&self, token: &str) -> Result<Arc<SessionHandle>, LeashError> {
        if token.is_empty() {
            return Err(LeashError::AccessDenied("No Token".into()));
        }
        let session = self
            .sessions
            .find(token)
            .ok_or_else(|| LeashError::AccessDenied("Invalid Token".into()))?;
        if !self.users.contains(&session.username) {
            self.sessions.delete(token);
            return Err(LeashError::AccessDenied("Invalid Token".into()));
        }
        Ok(session)
    }

    /// Resolve a token and require that it belongs to root
    pub fn require_root(&self, token: &str) -> Result<Arc<SessionHandle>, LeashError> {
        let session = self.require_valid_token(token)?;
        if session.username != ROOT_USER {
            tracing::warn!(
                "Root operation refused for {} ({}…)",
                session.username,
                token_prefix(token)
            );
            return Err(LeashError::AccessDenied("Only root can do this".into()));
        }
        Ok(session)
    }

    /// Whether the token names a live session
    pub fn is_valid(&self, token: &str) -> bool {
        self.require_valid_token(token).is_ok()
    }
}
