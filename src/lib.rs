//! # FaceVault
//!
//! Biometric-gated credential vault engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       FACEVAULT                          │
//! │  ┌─────────────┐  ┌──────────────┐  ┌────────────────┐  │
//! │  │   MATCHER   │  │ CAPTURE LOOP │  │ AUTH STATE     │  │
//! │  │  euclidean  │  │ tick / skip  │  │ MACHINE        │  │
//! │  └──────┬──────┘  └──────┬───────┘  └───────┬────────┘  │
//! │         │                │                  │           │
//! │  ┌──────┴────────────────┴──────────────────┴────────┐  │
//! │  │            SESSION KEY MANAGER (HKDF)             │  │
//! │  └──────────────────────┬────────────────────────────┘  │
//! │                         │                               │
//! │  ┌──────────────────────┴────────────────────────────┐  │
//! │  │      CREDENTIAL VAULT · AES-256-GCM cipher        │  │
//! │  └───────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Model
//!
//! - Credential passwords encrypted with AES-256-GCM before leaving the
//!   process; the remote store only ever sees ciphertext
//! - Session key derived via HKDF from a server-issued secret seed,
//!   never from public identifiers
//! - Key and token live in memory only, zeroized on logout
//! - Decryption failures are typed diagnostics, never empty strings
//! - One verification attempt in flight at a time, cancellable mid-flight

pub mod auth;
pub mod capture;
pub mod crypto;
pub mod error;
pub mod matcher;
pub mod session;
pub mod store;
pub mod vault;

pub use auth::{
    AuthPhase, DetectorRuntime, EnrolledProfile, FaceAuthenticator, LocalVerifier, RemoteVerifier,
};
pub use capture::{
    CancelHandle, CaptureLoop, CaptureLoopConfig, CaptureSource, Frame, LoopOutcome, Verdict,
    Verifier,
};
pub use error::{FaceVaultError, Result};
pub use matcher::{
    EnrolledIdentity, FaceDescriptor, FaceMatcher, MatchResult, DEFAULT_MATCH_THRESHOLD,
    DESCRIPTOR_DIM,
};
pub use session::{AuthGrant, AuthSession, CachedProfile, SessionKeyManager};
pub use store::{CredentialRecord, CredentialStore, ProfileCache, VerificationBackend};
pub use vault::{CorruptEntry, CredentialEntry, CredentialVault, NewCredential, VaultListing};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
