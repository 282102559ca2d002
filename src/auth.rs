//! Authentication state machine and verification strategies.
//!
//! `FaceAuthenticator` owns the lifecycle from detector initialization
//! through the capture loop to an established session. Verification is
//! pluggable: `LocalVerifier` matches descriptors in-process,
//! `RemoteVerifier` defers to a server-side backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::capture::{
    AttemptObserver, CancelHandle, CaptureLoop, CaptureLoopConfig, CaptureSource, Frame, Verdict,
    Verifier,
};
use crate::error::{FaceVaultError, Result};
use crate::matcher::{EnrolledIdentity, FaceMatcher, DEFAULT_MATCH_THRESHOLD};
use crate::session::{AuthGrant, SessionKeyManager};
use crate::store::{ProfileCache, VerificationBackend};

/// Authentication lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    Idle,
    Initializing,
    Ready,
    Capturing,
    Verifying,
    Authenticated,
    Failed,
}

impl AuthPhase {
    /// Legal transitions. `Capturing`/`Verifying` back to `Ready` is the
    /// cancellation path; everything else follows the lifecycle:
    /// Idle -> Initializing -> Ready -> Capturing <-> Verifying ->
    /// Authenticated | Failed, Failed -> Ready on explicit reset,
    /// Authenticated -> Idle on logout.
    fn can_advance(self, to: AuthPhase) -> bool {
        use AuthPhase::*;
        matches!(
            (self, to),
            (Idle, Initializing)
                | (Initializing, Ready)
                | (Initializing, Failed)
                | (Ready, Capturing)
                | (Capturing, Verifying)
                | (Capturing, Failed)
                | (Capturing, Ready)
                | (Verifying, Capturing)
                | (Verifying, Authenticated)
                | (Verifying, Failed)
                | (Verifying, Ready)
                | (Failed, Ready)
                | (Authenticated, Idle)
        )
    }
}

impl std::fmt::Display for AuthPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Capturing => "capturing",
            Self::Verifying => "verifying",
            Self::Authenticated => "authenticated",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// External detector/model runtime. Owned and passed explicitly - model
/// state is never process-global.
#[async_trait]
pub trait DetectorRuntime: Send + Sync {
    /// Load or confirm the detection models. A failure here is fatal for
    /// the session and is not retried automatically.
    async fn ensure_ready(&self) -> Result<()>;
}

/// An enrolled identity together with the grant released when it matches.
pub struct EnrolledProfile {
    pub identity: EnrolledIdentity,
    pub grant: AuthGrant,
}

/// In-process verification over enrolled descriptors.
pub struct LocalVerifier {
    matcher: FaceMatcher,
    grants: HashMap<String, AuthGrant>,
}

impl LocalVerifier {
    pub fn new(profiles: Vec<EnrolledProfile>, threshold: f32) -> Result<Self> {
        let mut identities = Vec::with_capacity(profiles.len());
        let mut grants = HashMap::with_capacity(profiles.len());

        for profile in profiles {
            grants.insert(profile.identity.label().to_string(), profile.grant);
            identities.push(profile.identity);
        }

        Ok(Self {
            matcher: FaceMatcher::new(identities, threshold)?,
            grants,
        })
    }

    pub fn with_default_threshold(profiles: Vec<EnrolledProfile>) -> Result<Self> {
        Self::new(profiles, DEFAULT_MATCH_THRESHOLD)
    }
}

#[async_trait]
impl Verifier for LocalVerifier {
    async fn verify(&self, frame: &Frame) -> Result<Verdict> {
        let Some(descriptor) = &frame.descriptor else {
            return Ok(Verdict::NoFace);
        };

        let result = self.matcher.best_match(descriptor)?;
        match result.label {
            Some(label) => match self.grants.get(&label) {
                Some(grant) => Ok(Verdict::Confirmed(grant.clone())),
                None => Err(FaceVaultError::VerificationRejected(format!(
                    "no grant enrolled for '{}'",
                    label
                ))),
            },
            None => Ok(Verdict::NoMatch {
                distance: result.distance,
            }),
        }
    }
}

/// Server-side verification. Ships the captured image to the backend;
/// frames without a detected face are filtered locally and never sent.
pub struct RemoteVerifier {
    backend: Arc<dyn VerificationBackend>,
    email: String,
}

impl RemoteVerifier {
    pub fn new(backend: Arc<dyn VerificationBackend>, email: impl Into<String>) -> Self {
        Self {
            backend,
            email: email.into(),
        }
    }
}

#[async_trait]
impl Verifier for RemoteVerifier {
    async fn verify(&self, frame: &Frame) -> Result<Verdict> {
        if frame.descriptor.is_none() {
            return Ok(Verdict::NoFace);
        }

        match self.backend.verify(&self.email, &frame.image).await {
            Ok(grant) => Ok(Verdict::Confirmed(grant)),
            Err(FaceVaultError::VerificationRejected(reason)) => Ok(Verdict::Rejected(reason)),
            Err(e) => Err(e),
        }
    }
}

/// Flips the phase between capturing and verifying as attempts progress.
struct PhaseObserver {
    phase: Arc<RwLock<AuthPhase>>,
}

impl AttemptObserver for PhaseObserver {
    fn frame_captured(&self) {
        let mut phase = self.phase.write();
        if *phase == AuthPhase::Capturing {
            *phase = AuthPhase::Verifying;
        }
    }

    fn attempt_settled(&self) {
        let mut phase = self.phase.write();
        if *phase == AuthPhase::Verifying {
            *phase = AuthPhase::Capturing;
        }
    }
}

/// Drives one authentication session end to end.
pub struct FaceAuthenticator {
    detector: Arc<dyn DetectorRuntime>,
    source: Arc<dyn CaptureSource>,
    verifier: Arc<dyn Verifier>,
    session: Arc<SessionKeyManager>,
    profile_cache: Option<Arc<dyn ProfileCache>>,
    loop_config: CaptureLoopConfig,
    phase: Arc<RwLock<AuthPhase>>,
    cancel: RwLock<Option<CancelHandle>>,
}

impl FaceAuthenticator {
    pub fn new(
        detector: Arc<dyn DetectorRuntime>,
        source: Arc<dyn CaptureSource>,
        verifier: Arc<dyn Verifier>,
        session: Arc<SessionKeyManager>,
    ) -> Self {
        Self {
            detector,
            source,
            verifier,
            session,
            profile_cache: None,
            loop_config: CaptureLoopConfig::default(),
            phase: Arc::new(RwLock::new(AuthPhase::Idle)),
            cancel: RwLock::new(None),
        }
    }

    pub fn with_profile_cache(mut self, cache: Arc<dyn ProfileCache>) -> Self {
        self.profile_cache = Some(cache);
        self
    }

    pub fn with_loop_config(mut self, config: CaptureLoopConfig) -> Self {
        self.loop_config = config;
        self
    }

    pub fn phase(&self) -> AuthPhase {
        *self.phase.read()
    }

    fn transition(&self, to: AuthPhase) -> Result<()> {
        let mut phase = self.phase.write();
        if !phase.can_advance(to) {
            return Err(FaceVaultError::InvalidTransition { from: *phase, to });
        }
        tracing::debug!(from = %*phase, to = %to, "auth transition");
        *phase = to;
        Ok(())
    }

    /// Acquire detector readiness: `Idle -> Initializing -> Ready`.
    pub async fn start(&self) -> Result<()> {
        self.transition(AuthPhase::Initializing)?;

        match self.detector.ensure_ready().await {
            Ok(()) => self.transition(AuthPhase::Ready),
            Err(e) => {
                tracing::error!(error = %e, "detector initialization failed");
                self.transition(AuthPhase::Failed)?;
                Err(e)
            }
        }
    }

    /// Run the capture loop until verified, failed, or cancelled. On
    /// success the session key manager is populated and the cacheable
    /// profile saved.
    pub async fn authenticate(&self) -> Result<()> {
        self.transition(AuthPhase::Capturing)?;

        let observer = Arc::new(PhaseObserver {
            phase: Arc::clone(&self.phase),
        });
        let cap_loop = CaptureLoop::new(
            Arc::clone(&self.source),
            Arc::clone(&self.verifier),
            self.loop_config.clone(),
        )
        .with_observer(observer);

        *self.cancel.write() = Some(cap_loop.cancel_handle());
        let result = cap_loop.run().await;
        *self.cancel.write() = None;

        match result {
            Ok(crate::capture::LoopOutcome::Authenticated(grant)) => {
                if let Err(e) = self.session.establish(grant) {
                    self.transition(AuthPhase::Failed)?;
                    return Err(e);
                }
                if let Err(e) = self.transition(AuthPhase::Authenticated) {
                    self.session.clear();
                    return Err(e);
                }
                if let Some(cache) = &self.profile_cache {
                    if let Ok(profile) = self.session.profile() {
                        cache.save(&profile);
                    }
                }
                Ok(())
            }
            Ok(crate::capture::LoopOutcome::Cancelled) => {
                self.transition(AuthPhase::Ready)?;
                Err(FaceVaultError::Cancelled)
            }
            Ok(crate::capture::LoopOutcome::AttemptsExhausted(n)) => {
                self.transition(AuthPhase::Failed)?;
                Err(FaceVaultError::AttemptsExhausted(n))
            }
            Err(e) => {
                self.transition(AuthPhase::Failed)?;
                Err(e)
            }
        }
    }

    /// Cancel an in-progress `authenticate`. Safe to call at any time.
    pub fn cancel(&self) {
        if let Some(handle) = self.cancel.read().as_ref() {
            handle.cancel();
        }
    }

    /// Explicit user-driven recovery: `Failed -> Ready`. Clears any
    /// partial session state.
    pub fn reset(&self) -> Result<()> {
        self.transition(AuthPhase::Ready)?;
        self.session.clear();
        Ok(())
    }

    /// `Authenticated -> Idle`. Drops key and token; the cached
    /// `{user_id, email}` profile is kept so the user can skip re-entering
    /// an email next time.
    pub fn logout(&self) -> Result<()> {
        self.transition(AuthPhase::Idle)?;
        self.session.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::FaceDescriptor;
    use crate::session::{test_grant, CachedProfile};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct StubDetector {
        fail: bool,
    }

    #[async_trait]
    impl DetectorRuntime for StubDetector {
        async fn ensure_ready(&self) -> Result<()> {
            if self.fail {
                Err(FaceVaultError::ModelLoadFailed("missing weights".into()))
            } else {
                Ok(())
            }
        }
    }

    struct StubSource {
        descriptor_fill: f32,
        grabs: AtomicU32,
    }

    impl StubSource {
        fn new(descriptor_fill: f32) -> Self {
            Self {
                descriptor_fill,
                grabs: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl CaptureSource for StubSource {
        async fn grab(&self) -> Result<Frame> {
            self.grabs.fetch_add(1, Ordering::SeqCst);
            Ok(Frame {
                image: vec![0xFF, 0xD8],
                descriptor: Some(FaceDescriptor::new(vec![self.descriptor_fill; 128])),
            })
        }

        fn stop(&self) {}
    }

    #[derive(Default)]
    struct MemoryProfileCache {
        profile: RwLock<Option<CachedProfile>>,
    }

    impl ProfileCache for MemoryProfileCache {
        fn load(&self) -> Option<CachedProfile> {
            self.profile.read().clone()
        }

        fn save(&self, profile: &CachedProfile) {
            *self.profile.write() = Some(profile.clone());
        }

        fn clear(&self) {
            *self.profile.write() = None;
        }
    }

    fn alice_profile() -> EnrolledProfile {
        EnrolledProfile {
            identity: EnrolledIdentity::new(
                "alice",
                vec![FaceDescriptor::new(vec![0.0; 128])],
            )
            .unwrap(),
            grant: test_grant("user-1"),
        }
    }

    fn fast_loop() -> CaptureLoopConfig {
        CaptureLoopConfig {
            interval: Duration::from_millis(10),
            max_attempts: None,
        }
    }

    fn authenticator(
        detector_fails: bool,
        verifier: Arc<dyn Verifier>,
        cache: Arc<dyn ProfileCache>,
    ) -> FaceAuthenticator {
        FaceAuthenticator::new(
            Arc::new(StubDetector {
                fail: detector_fails,
            }),
            Arc::new(StubSource::new(0.0)),
            verifier,
            Arc::new(SessionKeyManager::new()),
        )
        .with_profile_cache(cache)
        .with_loop_config(fast_loop())
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_local_flow() {
        let verifier =
            Arc::new(LocalVerifier::with_default_threshold(vec![alice_profile()]).unwrap());
        let cache = Arc::new(MemoryProfileCache::default());
        let auth = authenticator(false, verifier, cache.clone());

        assert_eq!(auth.phase(), AuthPhase::Idle);
        auth.start().await.unwrap();
        assert_eq!(auth.phase(), AuthPhase::Ready);

        auth.authenticate().await.unwrap();
        assert_eq!(auth.phase(), AuthPhase::Authenticated);
        assert!(auth.session.is_authenticated());

        let cached = cache.load().unwrap();
        assert_eq!(cached.user_id, "user-1");
        assert_eq!(cached.email, "a@b.com");

        auth.logout().unwrap();
        assert_eq!(auth.phase(), AuthPhase::Idle);
        assert!(!auth.session.is_authenticated());
        // the cacheable profile survives logout
        assert!(cache.load().is_some());
    }

    #[tokio::test]
    async fn test_model_load_failure_is_fatal() {
        let verifier =
            Arc::new(LocalVerifier::with_default_threshold(vec![alice_profile()]).unwrap());
        let auth = authenticator(true, verifier, Arc::new(MemoryProfileCache::default()));

        let result = auth.start().await;
        assert!(matches!(result, Err(FaceVaultError::ModelLoadFailed(_))));
        assert_eq!(auth.phase(), AuthPhase::Failed);
    }

    #[tokio::test]
    async fn test_authenticate_requires_ready() {
        let verifier =
            Arc::new(LocalVerifier::with_default_threshold(vec![alice_profile()]).unwrap());
        let auth = authenticator(false, verifier, Arc::new(MemoryProfileCache::default()));

        let result = auth.authenticate().await;
        assert!(matches!(
            result,
            Err(FaceVaultError::InvalidTransition {
                from: AuthPhase::Idle,
                to: AuthPhase::Capturing
            })
        ));
    }

    struct RejectingVerifier;

    #[async_trait]
    impl Verifier for RejectingVerifier {
        async fn verify(&self, _frame: &Frame) -> Result<Verdict> {
            Ok(Verdict::Rejected("face does not match account".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_after_failure() {
        let auth = authenticator(
            false,
            Arc::new(RejectingVerifier),
            Arc::new(MemoryProfileCache::default()),
        );

        auth.start().await.unwrap();
        let result = auth.authenticate().await;
        assert!(matches!(
            result,
            Err(FaceVaultError::VerificationRejected(_))
        ));
        assert_eq!(auth.phase(), AuthPhase::Failed);
        assert!(!auth.session.is_authenticated());

        auth.reset().unwrap();
        assert_eq!(auth.phase(), AuthPhase::Ready);
    }

    struct SlowVerifier;

    #[async_trait]
    impl Verifier for SlowVerifier {
        async fn verify(&self, _frame: &Frame) -> Result<Verdict> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(Verdict::Confirmed(test_grant("user-1")))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_returns_to_ready() {
        let auth = Arc::new(authenticator(
            false,
            Arc::new(SlowVerifier),
            Arc::new(MemoryProfileCache::default()),
        ));
        auth.start().await.unwrap();

        let runner = {
            let auth = Arc::clone(&auth);
            tokio::spawn(async move { auth.authenticate().await })
        };

        tokio::time::sleep(Duration::from_millis(15)).await;
        auth.cancel();

        let result = runner.await.unwrap();
        assert!(matches!(result, Err(FaceVaultError::Cancelled)));
        assert_eq!(auth.phase(), AuthPhase::Ready);
        assert!(!auth.session.is_authenticated());
    }

    #[tokio::test]
    async fn test_logout_requires_authenticated() {
        let verifier =
            Arc::new(LocalVerifier::with_default_threshold(vec![alice_profile()]).unwrap());
        let auth = authenticator(false, verifier, Arc::new(MemoryProfileCache::default()));

        assert!(matches!(
            auth.logout(),
            Err(FaceVaultError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_local_verifier_verdicts() {
        let verifier = LocalVerifier::with_default_threshold(vec![alice_profile()]).unwrap();

        // no descriptor -> no face, silently
        let faceless = Frame {
            image: vec![],
            descriptor: None,
        };
        assert!(matches!(
            verifier.verify(&faceless).await.unwrap(),
            Verdict::NoFace
        ));

        // a distant face -> no match, not an error
        let stranger = Frame {
            image: vec![],
            descriptor: Some(FaceDescriptor::new(vec![0.5; 128])),
        };
        assert!(matches!(
            verifier.verify(&stranger).await.unwrap(),
            Verdict::NoMatch { .. }
        ));
    }

    struct StubBackend {
        calls: AtomicU32,
        reject: bool,
    }

    #[async_trait]
    impl VerificationBackend for StubBackend {
        async fn verify(&self, _email: &str, _image: &[u8]) -> Result<AuthGrant> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.reject {
                Err(FaceVaultError::VerificationRejected("not recognized".into()))
            } else {
                Ok(test_grant("user-1"))
            }
        }
    }

    #[tokio::test]
    async fn test_remote_verifier_filters_faceless_frames() {
        let backend = Arc::new(StubBackend {
            calls: AtomicU32::new(0),
            reject: false,
        });
        let verifier = RemoteVerifier::new(backend.clone(), "a@b.com");

        let faceless = Frame {
            image: vec![],
            descriptor: None,
        };
        assert!(matches!(
            verifier.verify(&faceless).await.unwrap(),
            Verdict::NoFace
        ));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_remote_verifier_maps_rejection() {
        let backend = Arc::new(StubBackend {
            calls: AtomicU32::new(0),
            reject: true,
        });
        let verifier = RemoteVerifier::new(backend, "a@b.com");

        let frame = Frame {
            image: vec![0xFF, 0xD8],
            descriptor: Some(FaceDescriptor::new(vec![0.0; 128])),
        };
        assert!(matches!(
            verifier.verify(&frame).await.unwrap(),
            Verdict::Rejected(_)
        ));
    }

    #[test]
    fn test_phase_observer_alternation() {
        let phase = Arc::new(RwLock::new(AuthPhase::Capturing));
        let observer = PhaseObserver {
            phase: Arc::clone(&phase),
        };

        observer.frame_captured();
        assert_eq!(*phase.read(), AuthPhase::Verifying);

        observer.attempt_settled();
        assert_eq!(*phase.read(), AuthPhase::Capturing);

        // settled without a capture is a no-op
        observer.attempt_settled();
        assert_eq!(*phase.read(), AuthPhase::Capturing);
    }
}
