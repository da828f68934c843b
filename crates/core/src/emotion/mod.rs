#[cfg(feature = "onnx")]
mod onnx;
mod prosody;
mod remote;

use crate::config::{BackendConfig, BackendKind, ConfigError, ModelId};
use crate::normalize::NormalizedSample;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[cfg(feature = "onnx")]
pub use onnx::OnnxBackend;
pub use prosody::{ProsodyBackend, ProsodyFeatures};
pub use remote::RemoteBackend;

const LOG_TARGET: &str = "emotion";

/// Label reported when a window could not be scored.
pub const NEUTRAL_LABEL: &str = "neutral";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LabelScore {
    pub label: String,
    pub score: f32,
}

impl LabelScore {
    pub fn new<S: Into<String>>(label: S, score: f32) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

/// Scores for one window, in the order the backend returned them.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ClassificationResult {
    scores: Vec<LabelScore>,
}

impl ClassificationResult {
    pub fn new(scores: Vec<LabelScore>) -> Self {
        Self { scores }
    }

    pub fn scores(&self) -> &[LabelScore] {
        &self.scores
    }

    /// Highest score; the earliest entry wins a tie. NaN scores are ignored.
    pub fn best(&self) -> Option<&LabelScore> {
        self.scores
            .iter()
            .filter(|s| !s.score.is_nan())
            .fold(None, |best: Option<&LabelScore>, s| match best {
                Some(b) if b.score >= s.score => Some(b),
                _ => Some(s),
            })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FallbackReason {
    EmptyInput,
    NoScores,
    Normalize(String),
    Inference(String),
}

/// What one window contributed to the timeline.
#[derive(Clone, Debug, PartialEq)]
pub enum ClassificationOutcome {
    Scored {
        best: LabelScore,
        result: ClassificationResult,
    },
    FallbackNeutral { reason: FallbackReason },
}

impl ClassificationOutcome {
    pub fn fallback(reason: FallbackReason) -> Self {
        ClassificationOutcome::FallbackNeutral { reason }
    }

    pub fn label(&self) -> &str {
        match self {
            ClassificationOutcome::Scored { best, .. } => &best.label,
            ClassificationOutcome::FallbackNeutral { .. } => NEUTRAL_LABEL,
        }
    }

    pub fn confidence(&self) -> f32 {
        match self {
            ClassificationOutcome::Scored { best, .. } => best.score,
            ClassificationOutcome::FallbackNeutral { .. } => 0.0,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ClassificationOutcome::FallbackNeutral { .. })
    }
}

impl From<ClassificationResult> for ClassificationOutcome {
    fn from(result: ClassificationResult) -> Self {
        match result.best().cloned() {
            Some(best) => ClassificationOutcome::Scored { best, result },
            None => ClassificationOutcome::fallback(FallbackReason::NoScores),
        }
    }
}

/// Owned classifier input so backends can move it onto a blocking thread.
#[derive(Clone, Debug, PartialEq)]
pub struct InferenceRequest {
    pub model: ModelId,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

#[derive(thiserror::Error, Debug)]
pub enum InferenceError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("inference api returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("invalid inference response: {0}")]
    InvalidResponse(String),

    #[error("audio encoding failed: {0}")]
    Encode(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl InferenceError {
    pub fn is_retryable(&self) -> bool {
        match self {
            InferenceError::Http(e) => e.is_timeout() || e.is_connect(),
            InferenceError::Api { status, .. } => crate::util::is_http_retryable(*status),
            _ => false,
        }
    }
}

/// A source of per-label scores: a remote endpoint, a local model, or a heuristic.
pub trait EmotionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn infer(
        &self,
        request: InferenceRequest,
    ) -> BoxFuture<'_, Result<Vec<LabelScore>, InferenceError>>;
}

/// Shared, fail-soft front for a backend. Build once and clone freely.
#[derive(Clone)]
pub struct EmotionClassifier {
    backend: Arc<dyn EmotionBackend>,
}

impl EmotionClassifier {
    pub fn new(backend: Arc<dyn EmotionBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Never fails: empty input and backend errors become a neutral fallback.
    pub async fn classify(&self, model: ModelId, sample: NormalizedSample) -> ClassificationOutcome {
        let (sample_rate, samples) = match sample {
            NormalizedSample::Samples { sample_rate, data } if !data.is_empty() => {
                (sample_rate, data)
            }
            _ => return ClassificationOutcome::fallback(FallbackReason::EmptyInput),
        };

        let request = InferenceRequest {
            model,
            sample_rate,
            samples,
        };
        match self.backend.infer(request).await {
            Ok(scores) => ClassificationResult::new(scores).into(),
            Err(e) => {
                tracing::warn!(
                    target: LOG_TARGET,
                    backend = self.backend.name(),
                    error = %e,
                    "inference failed, using neutral result"
                );
                ClassificationOutcome::fallback(FallbackReason::Inference(e.to_string()))
            }
        }
    }
}

/// Builds the backend selected by configuration.
pub fn build_backend(cfg: &BackendConfig) -> Result<Arc<dyn EmotionBackend>, ConfigError> {
    match cfg.kind {
        BackendKind::Remote => {
            let mut backend = RemoteBackend::new(cfg.inference_url.clone());
            if let Some(token) = cfg.api_token.clone() {
                backend = backend.with_api_token(token);
            }
            Ok(Arc::new(backend))
        }
        BackendKind::Prosody => Ok(Arc::new(ProsodyBackend::new())),
        #[cfg(feature = "onnx")]
        BackendKind::Onnx => {
            let path = cfg.onnx_model.clone().ok_or(ConfigError::MissingOnnxModel)?;
            Ok(Arc::new(OnnxBackend::new(path)))
        }
        #[cfg(not(feature = "onnx"))]
        BackendKind::Onnx => Err(ConfigError::UnknownBackend(
            "onnx (built without the `onnx` feature)".to_owned(),
        )),
    }
}
