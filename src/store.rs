//! External collaborator seams - remote credential store, verification
//! backend, local profile cache.
//!
//! The core owns no transport or persistence mechanics; deployments hand
//! in implementations of these traits. Only already-encrypted password
//! material ever crosses the [`CredentialStore`] boundary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::session::{AuthGrant, CachedProfile};

/// Wire/persistence view of a credential. The password field is always a
/// ciphertext string produced by the credential cipher; the decrypted
/// view ([`crate::vault::CredentialEntry`]) never leaves the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub id: String,
    pub user_id: String,
    pub website: String,
    pub title: String,
    pub username: String,
    pub encrypted_password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Remote credential store. Request/response, no ordering guarantees
/// beyond what the implementation provides.
///
/// Transport failures should surface as `RemoteUnavailable` so callers
/// can decide whether to retry.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn list(&self, user_id: &str) -> Result<Vec<CredentialRecord>>;

    async fn create(&self, record: CredentialRecord) -> Result<CredentialRecord>;

    async fn update(&self, record: CredentialRecord) -> Result<CredentialRecord>;

    /// Deleting an unknown id is not an error.
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Server-side face verification. Takes the captured frame image and the
/// claimed email; a successful reply carries the [`AuthGrant`].
///
/// An explicit rejection should surface as `VerificationRejected`;
/// transport failures as `RemoteUnavailable`.
#[async_trait]
pub trait VerificationBackend: Send + Sync {
    async fn verify(&self, email: &str, image: &[u8]) -> Result<AuthGrant>;
}

/// Opaque local cache for the `{user_id, email}` pair, so a returning
/// user can skip re-entering an identifier. Implementations must never be
/// handed a token or key, and this interface gives them no way to get one.
pub trait ProfileCache: Send + Sync {
    fn load(&self) -> Option<CachedProfile>;

    fn save(&self, profile: &CachedProfile);

    fn clear(&self);
}
