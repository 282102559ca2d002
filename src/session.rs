//! Session lifecycle - auth grants, the in-memory session, key custody.
//!
//! The session (bearer token + vault key) lives only in process memory
//! between a successful verification and logout. At most the
//! `{user_id, email}` pair may be cached to skip re-entering an email;
//! token and key never leave this module in persistable form.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretBox, SecretString};
use serde::{Deserialize, Serialize};

use crate::crypto::{derive_session_key, SessionKey};
use crate::error::{FaceVaultError, Result};

/// Success payload from the verification backend.
///
/// `key_seed` is the server-issued per-user secret the session key is
/// derived from. Deriving from public identifiers (user id, email) would
/// make the key guessable; the seed keeps it secret-backed.
pub struct AuthGrant {
    pub user_id: String,
    pub email: String,
    token: SecretString,
    key_seed: SecretBox<[u8; 32]>,
}

impl AuthGrant {
    pub fn new(
        user_id: impl Into<String>,
        email: impl Into<String>,
        token: String,
        key_seed: [u8; 32],
    ) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
            token: SecretString::from(token),
            key_seed: SecretBox::new(Box::new(key_seed)),
        }
    }

    pub fn token(&self) -> &SecretString {
        &self.token
    }
}

impl Clone for AuthGrant {
    fn clone(&self) -> Self {
        Self {
            user_id: self.user_id.clone(),
            email: self.email.clone(),
            token: SecretString::from(self.token.expose_secret().to_owned()),
            key_seed: SecretBox::new(Box::new(*self.key_seed.expose_secret())),
        }
    }
}

impl std::fmt::Debug for AuthGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGrant")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("token", &"[REDACTED]")
            .field("key_seed", &"[REDACTED]")
            .finish()
    }
}

/// The cacheable remainder of a session. This is the whole of what the
/// local profile cache is allowed to hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedProfile {
    pub user_id: String,
    pub email: String,
}

/// An established authentication session.
pub struct AuthSession {
    pub user_id: String,
    pub email: String,
    token: SecretString,
    key: SessionKey,
    pub established_at: DateTime<Utc>,
}

impl AuthSession {
    pub fn token(&self) -> &SecretString {
        &self.token
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }
}

/// Holds the session for the lifetime of a login; dropping or clearing it
/// zeroizes the key material and token.
#[derive(Default)]
pub struct SessionKeyManager {
    session: RwLock<Option<AuthSession>>,
}

impl SessionKeyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a session from a verification grant.
    ///
    /// Called exactly once per login, on the `Verifying -> Authenticated`
    /// transition.
    pub fn establish(&self, grant: AuthGrant) -> Result<()> {
        let key = derive_session_key(&grant.key_seed, &grant.user_id)?;

        let session = AuthSession {
            user_id: grant.user_id,
            email: grant.email,
            token: grant.token,
            key,
            established_at: Utc::now(),
        };

        tracing::info!(user_id = %session.user_id, "session established");
        *self.session.write() = Some(session);
        Ok(())
    }

    /// Drop the session. Key and token are zeroized as they fall out of
    /// scope. Safe to call when no session is active.
    pub fn clear(&self) {
        if self.session.write().take().is_some() {
            tracing::info!("session cleared");
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.read().is_some()
    }

    /// Clone of the active session key.
    pub fn session_key(&self) -> Result<SessionKey> {
        self.with_session(|s| s.key().clone())
    }

    /// The cacheable `{user_id, email}` pair of the active session.
    pub fn profile(&self) -> Result<CachedProfile> {
        self.with_session(|s| CachedProfile {
            user_id: s.user_id.clone(),
            email: s.email.clone(),
        })
    }

    /// Run `f` against the active session, or fail `NotAuthenticated`.
    pub fn with_session<R>(&self, f: impl FnOnce(&AuthSession) -> R) -> Result<R> {
        match self.session.read().as_ref() {
            Some(session) => Ok(f(session)),
            None => Err(FaceVaultError::NotAuthenticated),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_grant(user_id: &str) -> AuthGrant {
    AuthGrant::new(user_id, "a@b.com", "bearer-token".into(), [0x42; 32])
}
