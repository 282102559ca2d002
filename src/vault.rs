//! Credential vault - CRUD over encrypted entries.
//!
//! Passwords are encrypted under the session key before they reach the
//! remote store and decrypted on the way back; the store only ever sees
//! ciphertext. A local mirror of the stored records is kept so reads
//! never observe a half-applied update.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::crypto::{self, SessionKey};
use crate::error::Result;
use crate::session::SessionKeyManager;
use crate::store::{CredentialRecord, CredentialStore};

/// Decrypted view of a credential, held transiently for display.
///
/// Deliberately not serializable - the plaintext password must never be
/// handed to a persistence or transport layer.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialEntry {
    pub id: String,
    pub website: String,
    pub title: String,
    pub username: String,
    pub password: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for [`CredentialVault::add`].
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub website: String,
    pub title: String,
    pub username: String,
    pub password: String,
    pub notes: Option<String>,
}

/// Diagnostic for an entry whose ciphertext did not decrypt under the
/// session key. Reported per entry; a corrupt or foreign record never
/// masquerades as an empty password and never aborts the listing.
#[derive(Debug, Clone)]
pub struct CorruptEntry {
    pub id: String,
    pub title: String,
    pub reason: String,
}

/// Result of a vault listing: the readable entries plus per-entry
/// corruption diagnostics.
#[derive(Debug, Default)]
pub struct VaultListing {
    pub entries: Vec<CredentialEntry>,
    pub corrupt: Vec<CorruptEntry>,
}

/// The vault. Every operation requires an active session and fails
/// `NotAuthenticated` otherwise.
pub struct CredentialVault {
    store: Arc<dyn CredentialStore>,
    session: Arc<SessionKeyManager>,
    records: RwLock<Vec<CredentialRecord>>,
}

impl CredentialVault {
    pub fn new(store: Arc<dyn CredentialStore>, session: Arc<SessionKeyManager>) -> Self {
        Self {
            store,
            session,
            records: RwLock::new(Vec::new()),
        }
    }

    /// Fetch the user's records from the store and return the decrypted
    /// view.
    pub async fn list(&self) -> Result<VaultListing> {
        let profile = self.session.profile()?;
        let key = self.session.session_key()?;

        let records = self.store.list(&profile.user_id).await?;
        let listing = decrypt_listing(&records, &key);
        *self.records.write() = records;

        Ok(listing)
    }

    /// Decrypted view of the mirrored records, without a remote call.
    pub fn snapshot(&self) -> Result<VaultListing> {
        let key = self.session.session_key()?;
        Ok(decrypt_listing(&self.records.read(), &key))
    }

    /// Encrypt and store a new credential. The returned entry carries the
    /// plaintext password transiently for display; it is not re-stored.
    pub async fn add(&self, new: NewCredential) -> Result<CredentialEntry> {
        let profile = self.session.profile()?;
        let key = self.session.session_key()?;

        let now = Utc::now();
        let record = CredentialRecord {
            id: Uuid::new_v4().to_string(),
            user_id: profile.user_id,
            website: new.website,
            title: new.title,
            username: new.username,
            encrypted_password: crypto::encrypt(&new.password, &key)?,
            notes: new.notes,
            created_at: now,
            updated_at: now,
        };

        let stored = self.store.create(record).await?;
        tracing::info!(id = %stored.id, "credential added");
        self.apply(stored.clone());

        Ok(entry_with_password(stored, new.password))
    }

    /// Re-encrypt and store an updated credential.
    pub async fn update(&self, entry: CredentialEntry) -> Result<CredentialEntry> {
        let profile = self.session.profile()?;
        let key = self.session.session_key()?;

        let record = CredentialRecord {
            id: entry.id,
            user_id: profile.user_id,
            website: entry.website,
            title: entry.title,
            username: entry.username,
            encrypted_password: crypto::encrypt(&entry.password, &key)?,
            notes: entry.notes,
            created_at: entry.created_at,
            updated_at: Utc::now(),
        };

        let stored = self.store.update(record).await?;
        tracing::info!(id = %stored.id, "credential updated");
        self.apply(stored.clone());

        Ok(entry_with_password(stored, entry.password))
    }

    /// Remove a credential. Idempotent: removing an unknown id succeeds.
    pub async fn remove(&self, id: &str) -> Result<()> {
        self.session.profile()?;

        self.store.delete(id).await?;
        self.records.write().retain(|record| record.id != id);
        tracing::info!(id = %id, "credential removed");

        Ok(())
    }

    /// Insert or replace one record in the mirror under a single write
    /// lock, so concurrent readers see either the old or the new list.
    fn apply(&self, record: CredentialRecord) {
        let mut records = self.records.write();
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }
}

fn entry_with_password(record: CredentialRecord, password: String) -> CredentialEntry {
    CredentialEntry {
        id: record.id,
        website: record.website,
        title: record.title,
        username: record.username,
        password,
        notes: record.notes,
        created_at: record.created_at,
        updated_at: record.updated_at,
    }
}

fn decrypt_listing(records: &[CredentialRecord], key: &SessionKey) -> VaultListing {
    let mut listing = VaultListing::default();

    for record in records {
        match crypto::decrypt(&record.encrypted_password, key) {
            Ok(password) => listing.entries.push(CredentialEntry {
                id: record.id.clone(),
                website: record.website.clone(),
                title: record.title.clone(),
                username: record.username.clone(),
                password,
                notes: record.notes.clone(),
                created_at: record.created_at,
                updated_at: record.updated_at,
            }),
            Err(e) => {
                tracing::warn!(id = %record.id, error = %e, "credential failed to decrypt");
                listing.corrupt.push(CorruptEntry {
                    id: record.id.clone(),
                    title: record.title.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    listing
}
