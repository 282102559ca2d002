//! Cryptographic core - session keys and the credential cipher.

pub mod aead;
pub mod keys;

pub use aead::{decrypt, encrypt};
pub use keys::{derive_session_key, SessionKey, KEY_LEN};
