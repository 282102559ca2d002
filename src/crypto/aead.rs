//! AEAD credential cipher - AES-256-GCM over strings.
//!
//! Ciphertext format: base64(nonce || ciphertext+tag). This is the only
//! wire format the crate owns; everything that leaves the process goes
//! through here first.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use zeroize::Zeroize;

use super::keys::SessionKey;
use crate::error::{FaceVaultError, Result};

/// Nonce length for AES-GCM
pub const NONCE_LEN: usize = 12;

/// Authentication tag length for AES-GCM
pub const TAG_LEN: usize = 16;

/// Encrypt a plaintext string under the session key.
///
/// A fresh random nonce is drawn per call; encrypting the same plaintext
/// twice yields different ciphertexts.
pub fn encrypt(plaintext: &str, key: &SessionKey) -> Result<String> {
    let cipher = Aes256Gcm::new_from_slice(key.expose())
        .map_err(|e| FaceVaultError::EncryptionFailed(e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    getrandom::getrandom(&mut nonce_bytes)
        .map_err(|e| FaceVaultError::EncryptionFailed(format!("RNG failed: {}", e)))?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| FaceVaultError::EncryptionFailed(e.to_string()))?;

    let mut framed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    framed.extend_from_slice(&nonce_bytes);
    framed.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(framed))
}

/// Decrypt a ciphertext string produced by [`encrypt`].
///
/// Fails with `DecryptionFailed` on malformed input, a wrong key, or a
/// tampered ciphertext. Callers must treat that as "cannot read" - a
/// failed decryption is never an empty string.
pub fn decrypt(ciphertext: &str, key: &SessionKey) -> Result<String> {
    let framed = BASE64
        .decode(ciphertext)
        .map_err(|e| FaceVaultError::DecryptionFailed(format!("invalid base64: {}", e)))?;

    if framed.len() < NONCE_LEN + TAG_LEN {
        return Err(FaceVaultError::DecryptionFailed("ciphertext too short".into()));
    }

    let cipher = Aes256Gcm::new_from_slice(key.expose())
        .map_err(|e| FaceVaultError::DecryptionFailed(e.to_string()))?;

    let nonce = Nonce::from_slice(&framed[..NONCE_LEN]);

    let plaintext = cipher
        .decrypt(nonce, &framed[NONCE_LEN..])
        .map_err(|_| FaceVaultError::DecryptionFailed("authentication failed".into()))?;

    String::from_utf8(plaintext).map_err(|e| {
        let mut bytes = e.into_bytes();
        bytes.zeroize();
        FaceVaultError::DecryptionFailed("plaintext is not valid UTF-8".into())
    })
}
