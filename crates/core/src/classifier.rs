//! Overheat classification engine.
//!
//! Pure logic: each classification is a deterministic function of the
//! configured mode and the input temperature. The only I/O is the one-shot
//! model artifact read performed at construction; a failed read degrades to
//! threshold mode instead of propagating, so a missing or corrupt artifact
//! can never take the sampling loop down.

use std::path::Path;

use serde::Deserialize;

/// Result of classifying a single temperature sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationResult {
    Normal,
    Overheat,
}

impl ClassificationResult {
    pub fn is_overheat(self) -> bool {
        self == ClassificationResult::Overheat
    }
}

/// Errors raised while loading a pretrained model artifact.
///
/// Surfaced exactly once, inside [`Classifier::from_model_artifact`]; callers
/// only ever observe the fallback, never the error itself.
#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("Failed to read model artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse model artifact: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid model artifact: {0}")]
    Invalid(String),
}

/// A pretrained single-feature linear decision model.
///
/// Artifact format: `{"weights": [w], "bias": b}`. Inference on a sample
/// predicts the positive (overheat) class iff `w * temp_c + bias >= 0`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelArtifact {
    weights: Vec<f64>,
    bias: f64,
}

impl ModelArtifact {
    /// Load and validate an artifact from disk.
    pub fn load(path: &Path) -> Result<Self, ModelLoadError> {
        let raw = std::fs::read_to_string(path)?;
        let artifact: Self = serde_json::from_str(&raw)?;
        artifact.validate()?;
        Ok(artifact)
    }

    /// The decision function takes the single feature `[temp_c]`, so the
    /// artifact must carry exactly one finite weight.
    fn validate(&self) -> Result<(), ModelLoadError> {
        if self.weights.len() != 1 {
            return Err(ModelLoadError::Invalid(format!(
                "expected exactly 1 weight, found {}",
                self.weights.len()
            )));
        }
        if !self.weights[0].is_finite() || !self.bias.is_finite() {
            return Err(ModelLoadError::Invalid(
                "weight and bias must be finite".to_string(),
            ));
        }
        Ok(())
    }

    fn predict_overheat(&self, temp_c: f64) -> bool {
        self.weights[0] * temp_c + self.bias >= 0.0
    }
}

#[derive(Debug, Clone)]
enum Mode {
    Threshold(f64),
    Model(ModelArtifact),
}

/// Binary overheat classifier, fixed at construction to one of two modes:
///
/// - **Threshold**: `Overheat` iff `temp_c >= threshold` (boundary
///   inclusive).
/// - **Model**: `Overheat` iff a pretrained [`ModelArtifact`] predicts the
///   positive class for `[temp_c]`.
#[derive(Debug, Clone)]
pub struct Classifier {
    mode: Mode,
}

impl Classifier {
    /// Threshold-mode classifier.
    pub fn threshold(threshold: f64) -> Self {
        Self {
            mode: Mode::Threshold(threshold),
        }
    }

    /// Model-mode classifier backed by the artifact at `path`.
    ///
    /// If the artifact cannot be loaded the degradation is logged and the
    /// classifier falls back to threshold mode with `fallback_threshold`.
    /// Construction itself never fails.
    pub fn from_model_artifact(path: &Path, fallback_threshold: f64) -> Self {
        match ModelArtifact::load(path) {
            Ok(model) => {
                tracing::info!(path = %path.display(), "Loaded overheat model artifact");
                Self {
                    mode: Mode::Model(model),
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    fallback_threshold,
                    "Model artifact unusable, falling back to threshold mode"
                );
                Self::threshold(fallback_threshold)
            }
        }
    }

    /// Classify a single temperature sample.
    pub fn classify(&self, temp_c: f64) -> ClassificationResult {
        let overheat = match &self.mode {
            Mode::Threshold(threshold) => temp_c >= *threshold,
            Mode::Model(model) => model.predict_overheat(temp_c),
        };
        if overheat {
            ClassificationResult::Overheat
        } else {
            ClassificationResult::Normal
        }
    }

    /// Classify a batch of samples, preserving input order.
    pub fn classify_batch(&self, temps: &[f64]) -> Vec<ClassificationResult> {
        temps.iter().map(|&t| self.classify(t)).collect()
    }

    /// Whether a model artifact is actually backing this classifier.
    pub fn is_model_backed(&self) -> bool {
        matches!(self.mode, Mode::Model(_))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
