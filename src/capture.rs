//! Capture attempt loop.
//!
//! Drives periodic verification attempts against a capture source without
//! ever letting two attempts overlap. Each attempt runs as its own task;
//! the loop ticks independently and skips a tick while an attempt is in
//! flight. Cancelling the loop stops future ticks and discards the result
//! of an attempt that is still resolving.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{FaceVaultError, Result};
use crate::matcher::FaceDescriptor;
use crate::session::AuthGrant;

/// One captured frame: the raw image plus the descriptor the external
/// detector extracted from it. No descriptor means no face was found.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: Vec<u8>,
    pub descriptor: Option<FaceDescriptor>,
}

/// External capture device. The core never manages device acquisition;
/// it only pulls frames and signals teardown through `stop`.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    async fn grab(&self) -> Result<Frame>;

    /// Release the underlying stream. Invoked by the loop exactly once,
    /// on successful verification.
    fn stop(&self);
}

/// Per-attempt verification verdict.
#[derive(Debug)]
pub enum Verdict {
    /// Identity confirmed; carries the session grant.
    Confirmed(AuthGrant),
    /// Frame contained no usable face. The loop keeps ticking.
    NoFace,
    /// A face was seen but no enrolled identity is within threshold.
    /// The loop keeps ticking.
    NoMatch { distance: f32 },
    /// The verifier explicitly rejected the candidate. Terminal.
    Rejected(String),
}

/// Verification strategy invoked once per attempt - a local matcher or a
/// remote backend (see [`crate::auth`]).
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, frame: &Frame) -> Result<Verdict>;
}

/// Hook for observing attempt progress, used by the auth state machine to
/// alternate between its capturing and verifying phases.
pub trait AttemptObserver: Send + Sync {
    /// A frame was grabbed and handed to verification.
    fn frame_captured(&self);

    /// The attempt settled without a decision; the next tick will retry.
    fn attempt_settled(&self);
}

/// Clonable handle that cancels a running loop.
///
/// `cancel` is safe to call at any time, including mid-attempt: the
/// in-flight attempt is aborted and its eventual result discarded.
#[derive(Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelHandle {
    fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn cancel(&self) {
        // flag first, then wake: a waiter that missed the wakeup will
        // still observe the flag on its next check
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn notified(&self) {
        self.notify.notified().await;
    }
}

#[derive(Debug, Clone)]
pub struct CaptureLoopConfig {
    /// Delay between attempt ticks.
    pub interval: Duration,
    /// Stop after this many attempts; `None` keeps trying until
    /// verification decides or the loop is cancelled.
    pub max_attempts: Option<u32>,
}

impl Default for CaptureLoopConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1500),
            max_attempts: None,
        }
    }
}

/// How a loop run ended, short of a terminal error.
#[derive(Debug)]
pub enum LoopOutcome {
    /// Verification succeeded; the capture source has been stopped.
    Authenticated(AuthGrant),
    /// The bounded number of attempts ran out.
    AttemptsExhausted(u32),
    /// The loop was cancelled; any in-flight result was discarded.
    Cancelled,
}

/// The attempt loop itself. One instance drives one authentication
/// session; `attempt_in_flight` is its mutual-exclusion guard, not a
/// general-purpose lock.
pub struct CaptureLoop {
    source: Arc<dyn CaptureSource>,
    verifier: Arc<dyn Verifier>,
    config: CaptureLoopConfig,
    cancel: CancelHandle,
    attempt_in_flight: Arc<AtomicBool>,
    attempts: AtomicU32,
    observer: Option<Arc<dyn AttemptObserver>>,
}

impl CaptureLoop {
    pub fn new(
        source: Arc<dyn CaptureSource>,
        verifier: Arc<dyn Verifier>,
        config: CaptureLoopConfig,
    ) -> Self {
        Self {
            source,
            verifier,
            config,
            cancel: CancelHandle::new(),
            attempt_in_flight: Arc::new(AtomicBool::new(false)),
            attempts: AtomicU32::new(0),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn AttemptObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn attempt_in_flight(&self) -> bool {
        self.attempt_in_flight.load(Ordering::SeqCst)
    }

    /// Run until verification decides, the allowed attempts run out, or
    /// the loop is cancelled. Transient failures (no face, device hiccup,
    /// unreachable backend) are absorbed here and never escape.
    pub async fn run(&self) -> Result<LoopOutcome> {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut in_flight: Option<JoinHandle<Result<Verdict>>> = None;

        loop {
            if self.cancel.is_cancelled() {
                if let Some(handle) = in_flight.take() {
                    handle.abort();
                }
                return Ok(LoopOutcome::Cancelled);
            }

            tokio::select! {
                _ = self.cancel.notified() => {
                    if let Some(handle) = in_flight.take() {
                        handle.abort();
                    }
                    tracing::debug!("capture loop cancelled");
                    return Ok(LoopOutcome::Cancelled);
                }

                result = async { in_flight.as_mut().expect("guarded by is_some").await }, if in_flight.is_some() => {
                    in_flight = None;
                    self.attempt_in_flight.store(false, Ordering::SeqCst);

                    match result {
                        Err(join_error) => {
                            tracing::warn!(error = %join_error, "capture attempt task failed");
                            self.settled();
                        }
                        Ok(Ok(Verdict::Confirmed(grant))) => {
                            if self.cancel.is_cancelled() {
                                // late result, the consumer is gone
                                return Ok(LoopOutcome::Cancelled);
                            }
                            tracing::info!(user_id = %grant.user_id, "verification succeeded");
                            self.source.stop();
                            return Ok(LoopOutcome::Authenticated(grant));
                        }
                        Ok(Ok(Verdict::NoFace)) => {
                            tracing::debug!("no face in frame");
                            self.settled();
                        }
                        Ok(Ok(Verdict::NoMatch { distance })) => {
                            tracing::debug!(distance, "no identity within threshold");
                            self.settled();
                        }
                        Ok(Ok(Verdict::Rejected(reason))) => {
                            if self.cancel.is_cancelled() {
                                return Ok(LoopOutcome::Cancelled);
                            }
                            return Err(FaceVaultError::VerificationRejected(reason));
                        }
                        Ok(Err(e)) if e.is_transient() => {
                            tracing::warn!(error = %e, "transient attempt failure");
                            self.settled();
                        }
                        Ok(Err(e)) => return Err(e),
                    }

                    if let Some(max) = self.config.max_attempts {
                        let made = self.attempts();
                        if made >= max {
                            return Ok(LoopOutcome::AttemptsExhausted(made));
                        }
                    }
                }

                _ = ticker.tick() => {
                    if self.attempt_in_flight.swap(true, Ordering::SeqCst) {
                        tracing::trace!("attempt in flight, skipping tick");
                        continue;
                    }

                    let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::debug!(attempt, "starting capture attempt");

                    let source = Arc::clone(&self.source);
                    let verifier = Arc::clone(&self.verifier);
                    let observer = self.observer.clone();
                    in_flight = Some(tokio::spawn(async move {
                        let frame = source.grab().await?;
                        if let Some(observer) = &observer {
                            observer.frame_captured();
                        }
                        verifier.verify(&frame).await
                    }));
                }
            }
        }
    }

    fn settled(&self) {
        if let Some(observer) = &self.observer {
            observer.attempt_settled();
        }
    }
}
