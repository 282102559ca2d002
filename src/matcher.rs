//! Face descriptor matching.
//!
//! Compares a live descriptor against enrolled reference descriptors using
//! Euclidean distance. The threshold is authoritative: a candidate whose
//! nearest identity is still beyond the threshold is unknown, no matter
//! how the identities rank among themselves.

use serde::{Deserialize, Serialize};

use crate::error::{FaceVaultError, Result};

/// Descriptor dimensionality produced by the default detector
pub const DESCRIPTOR_DIM: usize = 128;

/// Default maximum distance for a positive match
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Fixed-length feature vector produced by the external detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDescriptor(Vec<f32>);

impl FaceDescriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

/// Euclidean distance between two descriptors of equal dimensionality.
fn euclidean_distance(a: &FaceDescriptor, b: &FaceDescriptor) -> f32 {
    a.as_slice()
        .iter()
        .zip(b.as_slice())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// One or more reference descriptors registered under a label.
///
/// Constructed through [`EnrolledIdentity::new`] only, which upholds the
/// non-empty, same-dimension invariants the matcher relies on.
#[derive(Debug, Clone)]
pub struct EnrolledIdentity {
    label: String,
    descriptors: Vec<FaceDescriptor>,
}

impl EnrolledIdentity {
    /// Create an enrolled identity.
    ///
    /// Fails with `EmptyEnrollment` when no reference descriptor was
    /// produced, and with `DimensionMismatch` when the references do not
    /// share a dimensionality.
    pub fn new(label: impl Into<String>, descriptors: Vec<FaceDescriptor>) -> Result<Self> {
        let label = label.into();

        let Some(first) = descriptors.first() else {
            return Err(FaceVaultError::EmptyEnrollment(label));
        };

        let dim = first.dim();
        for descriptor in &descriptors {
            if descriptor.dim() != dim {
                return Err(FaceVaultError::DimensionMismatch {
                    expected: dim,
                    actual: descriptor.dim(),
                });
            }
        }

        Ok(Self { label, descriptors })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn dim(&self) -> usize {
        self.descriptors[0].dim()
    }

    /// Best-of-references distance to a candidate.
    fn nearest_distance(&self, candidate: &FaceDescriptor) -> f32 {
        self.descriptors
            .iter()
            .map(|reference| euclidean_distance(reference, candidate))
            .fold(f32::INFINITY, f32::min)
    }
}

/// Outcome of a match. `label == None` means no enrolled identity was
/// within the threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub label: Option<String>,
    pub distance: f32,
}

impl MatchResult {
    pub fn is_unknown(&self) -> bool {
        self.label.is_none()
    }
}

/// Matcher over a set of enrolled identities.
pub struct FaceMatcher {
    identities: Vec<EnrolledIdentity>,
    threshold: f32,
}

impl FaceMatcher {
    /// Create a matcher.
    ///
    /// Fails with `DimensionMismatch` if the identities disagree on
    /// descriptor dimensionality. An empty identity list is accepted here
    /// and reported per-call by [`FaceMatcher::best_match`].
    pub fn new(identities: Vec<EnrolledIdentity>, threshold: f32) -> Result<Self> {
        if let Some(first) = identities.first() {
            let dim = first.dim();
            for identity in &identities {
                if identity.dim() != dim {
                    return Err(FaceVaultError::DimensionMismatch {
                        expected: dim,
                        actual: identity.dim(),
                    });
                }
            }
        }

        Ok(Self {
            identities,
            threshold,
        })
    }

    pub fn with_default_threshold(identities: Vec<EnrolledIdentity>) -> Result<Self> {
        Self::new(identities, DEFAULT_MATCH_THRESHOLD)
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Find the best matching enrolled identity for a candidate.
    ///
    /// Each identity is represented by the minimum distance over its own
    /// reference set. Exact ties between identities resolve to the first
    /// enrolled one; silent nondeterminism here would be a security bug.
    pub fn best_match(&self, candidate: &FaceDescriptor) -> Result<MatchResult> {
        let Some(first) = self.identities.first() else {
            return Err(FaceVaultError::NoEnrollment);
        };

        let expected = first.dim();
        if candidate.dim() != expected {
            return Err(FaceVaultError::DimensionMismatch {
                expected,
                actual: candidate.dim(),
            });
        }

        let mut best_label = first.label();
        let mut best_distance = f32::INFINITY;

        for identity in &self.identities {
            let distance = identity.nearest_distance(candidate);
            // strict less-than keeps the first enrolled identity on ties
            if distance < best_distance {
                best_distance = distance;
                best_label = identity.label();
            }
        }

        let result = if best_distance > self.threshold {
            MatchResult {
                label: None,
                distance: best_distance,
            }
        } else {
            MatchResult {
                label: Some(best_label.to_string()),
                distance: best_distance,
            }
        };

        tracing::debug!(
            label = result.label.as_deref().unwrap_or("unknown"),
            distance = result.distance,
            threshold = self.threshold,
            "best match"
        );

        Ok(result)
    }
}
