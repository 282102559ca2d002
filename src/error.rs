//! Error types for facevault

use thiserror::Error;

use crate::auth::AuthPhase;

/// Result type for all vault operations
pub type Result<T> = std::result::Result<T, FaceVaultError>;

#[derive(Debug, Error)]
pub enum FaceVaultError {
    #[error("no identities enrolled")]
    NoEnrollment,

    #[error("enrollment for '{0}' produced no descriptors")]
    EmptyEnrollment(String),

    #[error("descriptor dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("no face detected in frame")]
    NoFaceDetected,

    #[error("verification rejected: {0}")]
    VerificationRejected(String),

    #[error("frame capture failed: {0}")]
    CaptureFailed(String),

    #[error("remote collaborator unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("detector model load failed: {0}")]
    ModelLoadFailed(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("not authenticated - no active session")]
    NotAuthenticated,

    #[error("invalid auth transition: {from} -> {to}")]
    InvalidTransition { from: AuthPhase, to: AuthPhase },

    #[error("gave up after {0} capture attempts")]
    AttemptsExhausted(u32),

    #[error("authentication cancelled")]
    Cancelled,
}

impl FaceVaultError {
    /// Transient errors are absorbed by the capture loop; it keeps ticking.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NoFaceDetected | Self::CaptureFailed(_) | Self::RemoteUnavailable(_)
        )
    }

    pub fn is_security_critical(&self) -> bool {
        matches!(
            self,
            Self::DecryptionFailed(_)
                | Self::VerificationRejected(_)
                | Self::NotAuthenticated
        )
    }
}
