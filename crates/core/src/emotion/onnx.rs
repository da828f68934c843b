use crate::config::ModelId;
use crate::emotion::{EmotionBackend, InferenceError, InferenceRequest, LabelScore};
use crate::util::LazyModel;
use futures::future::BoxFuture;
use futures::FutureExt;
use ort::session::Session;
use ort::value::Tensor;
use std::path::PathBuf;
use std::sync::Arc;

const LOG_TARGET: &str = "emotion::onnx";

/// In-process wav2vec2 sequence classifier exported to ONNX.
///
/// The session is created on the first window, not at construction, and then
/// shared by every clone. `Session::run` needs `&mut`, so inference calls on
/// the same backend are serialised.
#[derive(Clone)]
pub struct OnnxBackend {
    model_path: PathBuf,
    intra_threads: usize,
    session: Arc<LazyModel<Session>>,
}

impl OnnxBackend {
    pub fn new(model_path: PathBuf) -> Self {
        Self {
            model_path,
            intra_threads: 1,
            session: Arc::new(LazyModel::new()),
        }
    }

    pub fn with_intra_threads(mut self, threads: usize) -> Self {
        self.intra_threads = threads.max(1);
        self
    }

    pub fn is_loaded(&self) -> bool {
        self.session.is_initialized()
    }

    fn load(path: &PathBuf, threads: usize) -> Result<Session, InferenceError> {
        if !path.exists() {
            return Err(InferenceError::Unavailable(format!(
                "onnx model not found: {}",
                path.display()
            )));
        }
        tracing::info!(target: LOG_TARGET, path = %path.display(), "loading onnx model");
        Session::builder()
            .and_then(|b| b.with_intra_threads(threads))
            .and_then(|b| b.commit_from_file(path))
            .map_err(|e| InferenceError::Model(format!("failed to load {}: {e}", path.display())))
    }

    fn run(
        session: &mut Session,
        model: ModelId,
        samples: Vec<f32>,
    ) -> Result<Vec<LabelScore>, InferenceError> {
        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| InferenceError::Model("model declares no inputs".to_owned()))?;

        let len = samples.len();
        let input = Tensor::from_array(([1usize, len], samples))
            .map_err(|e| InferenceError::Model(format!("input tensor: {e}")))?;
        let outputs = session
            .run(ort::inputs![input_name.as_str() => input])
            .map_err(|e| InferenceError::Model(format!("inference: {e}")))?;

        let (_, logits_value) = outputs
            .iter()
            .next()
            .ok_or_else(|| InferenceError::Model("model produced no output".to_owned()))?;
        let (_shape, logits) = logits_value
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::Model(format!("logits extraction: {e}")))?;

        let labels = model.labels();
        if logits.len() != labels.len() {
            return Err(InferenceError::Model(format!(
                "expected {} logits, got {}",
                labels.len(),
                logits.len()
            )));
        }
        Ok(labels
            .iter()
            .zip(softmax(logits))
            .map(|(label, score)| LabelScore::new(*label, score))
            .collect())
    }
}

pub(crate) fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum == 0.0 || !sum.is_finite() {
        return vec![0.0; logits.len()];
    }
    exps.into_iter().map(|e| e / sum).collect()
}

impl EmotionBackend for OnnxBackend {
    fn name(&self) -> &'static str {
        "onnx"
    }

    fn infer(
        &self,
        request: InferenceRequest,
    ) -> BoxFuture<'_, Result<Vec<LabelScore>, InferenceError>> {
        let this = self.clone();
        async move {
            tokio::task::spawn_blocking(move || {
                let InferenceRequest { model, samples, .. } = request;
                this.session
                    .with(
                        || Self::load(&this.model_path, this.intra_threads),
                        |session| Self::run(session, model, samples),
                    )
                    .and_then(|scores| scores)
            })
            .await
            .map_err(|e| InferenceError::Unavailable(format!("inference task failed: {e}")))?
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softmax_is_a_distribution() {
        let p = softmax(&[1.0, 2.0, 3.0, 4.0]);
        let total: f32 = p.iter().sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert!(p.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn softmax_is_stable_for_large_logits() {
        let p = softmax(&[1000.0, 1000.0]);
        assert!((p[0] - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn missing_model_fails_and_stays_unloaded() {
        let backend = OnnxBackend::new(PathBuf::from("/nonexistent/model.onnx"));
        let err = backend
            .infer(InferenceRequest {
                model: ModelId::Superb,
                sample_rate: 16_000,
                samples: vec![0.0; 16],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::Unavailable(_)));
        assert!(!backend.is_loaded());
    }
}
