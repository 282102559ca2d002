//! Session key material and derivation.
//!
//! The vault key is derived per session from a server-issued secret seed,
//! never from public identifiers.

use hkdf::Hkdf;
use secrecy::{ExposeSecret, SecretBox};
use sha2::Sha256;

use crate::error::{FaceVaultError, Result};

/// Key length for AES-256
pub const KEY_LEN: usize = 32;

/// HKDF info contexts for key derivation
pub mod contexts {
    /// Context for the per-session vault key
    pub const SESSION: &str = "facevault:session:v1";
}

/// Symmetric session key with automatic zeroization on drop.
pub struct SessionKey {
    inner: SecretBox<[u8; KEY_LEN]>,
}

impl SessionKey {
    /// Create a session key from raw bytes
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            inner: SecretBox::new(Box::new(bytes)),
        }
    }

    /// Expose the key bytes (use with caution)
    pub fn expose(&self) -> &[u8; KEY_LEN] {
        self.inner.expose_secret()
    }

    /// Generate a random key
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::new(bytes)
    }
}

impl Clone for SessionKey {
    fn clone(&self) -> Self {
        Self::new(*self.inner.expose_secret())
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey([REDACTED])")
    }
}

/// Derive the session vault key from the server-issued seed.
///
/// The user id is mixed into the HKDF info so two users sharing a seed by
/// accident still end up with distinct keys.
pub fn derive_session_key(seed: &SecretBox<[u8; 32]>, user_id: &str) -> Result<SessionKey> {
    let hk = Hkdf::<Sha256>::new(None, seed.expose_secret());
    let info = format!("{}:{}", contexts::SESSION, user_id);

    let mut okm = [0u8; KEY_LEN];
    hk.expand(info.as_bytes(), &mut okm)
        .map_err(|e| FaceVaultError::KeyDerivationFailed(e.to_string()))?;

    Ok(SessionKey::new(okm))
}
