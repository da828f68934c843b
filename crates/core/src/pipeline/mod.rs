use crate::{
    chunk::{ChunkError, Chunker},
    config::{AnalysisConfig, ChunkLength, ConfigError, ModelId, WindowStride},
    decode::{AudioLoader, AudioSource, LoadError, Waveform},
    emotion::{ClassificationOutcome, EmotionClassifier, FallbackReason},
    labels::EmotionMap,
    normalize::SampleNormalizer,
    timeline::{TimelineEntry, TimelineReducer},
};
use serde::Serialize;
use std::path::Path;

const LOG_TARGET: &str = "pipeline";

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
}

/// The options of one analysis echoed back with its timeline.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct AnalysisReport {
    pub filename: String,
    pub chunk_ms: ChunkLength,
    pub emotion_map: EmotionMap,
    pub model: ModelId,
    pub window_stride: WindowStride,
    pub timeline: Vec<TimelineEntry>,
}

/// Load, chunk, normalize, classify, reduce.
///
/// Windows are processed one at a time in offset order. The classifier is the
/// only shared piece; everything else belongs to a single call.
#[derive(Clone)]
pub struct Pipeline {
    loader: AudioLoader,
    chunker: Chunker,
    normalizer: SampleNormalizer,
    classifier: EmotionClassifier,
}

impl Pipeline {
    pub fn new(classifier: EmotionClassifier) -> Self {
        Self {
            loader: AudioLoader::default(),
            chunker: Chunker::default(),
            normalizer: SampleNormalizer::default(),
            classifier,
        }
    }

    pub fn with_loader(mut self, loader: AudioLoader) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_chunker(mut self, chunker: Chunker) -> Self {
        self.chunker = chunker;
        self
    }

    /// Validates raw options, then runs [`Pipeline::analyze`].
    pub async fn analyze_with(
        &self,
        source: AudioSource,
        chunk_ms: i64,
        emotion_map: &str,
        model: &str,
    ) -> Result<AnalysisReport, PipelineError> {
        let cfg = AnalysisConfig::new(chunk_ms, emotion_map, model)?;
        self.analyze(source, &cfg).await
    }

    pub async fn analyze(
        &self,
        source: AudioSource,
        cfg: &AnalysisConfig,
    ) -> Result<AnalysisReport, PipelineError> {
        let filename = source.name.clone();
        let waveform = self.loader.load(source).await?;
        self.run(filename, &waveform, cfg).await
    }

    /// Like [`Pipeline::analyze`], but rejects oversized files before reading them.
    pub async fn analyze_file(
        &self,
        path: &Path,
        cfg: &AnalysisConfig,
    ) -> Result<AnalysisReport, PipelineError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let waveform = self.loader.load_file(path).await?;
        self.run(filename, &waveform, cfg).await
    }

    async fn run(
        &self,
        filename: String,
        waveform: &Waveform,
        cfg: &AnalysisConfig,
    ) -> Result<AnalysisReport, PipelineError> {
        let windows = self.chunker.chunk(waveform, cfg.chunk_ms.as_ms())?;
        tracing::info!(
            target: LOG_TARGET,
            file = %filename,
            duration_ms = waveform.duration_ms(),
            chunk_ms = cfg.chunk_ms.as_ms(),
            stride = cfg.window_stride.get(),
            backend = self.classifier.backend_name(),
            "analysis started"
        );

        let mut reducer = TimelineReducer::new(cfg.emotion_map);
        let mut timeline = Vec::new();
        let mut classified = 0usize;
        let mut fallbacks = 0usize;

        for window in windows.step_by(cfg.window_stride.get()) {
            let outcome = match self.normalizer.normalize(&window) {
                Ok(sample) => self.classifier.classify(cfg.model, sample).await,
                Err(e) => {
                    tracing::warn!(
                        target: LOG_TARGET,
                        offset_ms = window.start_ms,
                        error = %e,
                        "normalization failed, using neutral result"
                    );
                    ClassificationOutcome::fallback(FallbackReason::Normalize(e.to_string()))
                }
            };
            tracing::debug!(
                target: LOG_TARGET,
                offset_ms = window.start_ms,
                label = outcome.label(),
                confidence = outcome.confidence(),
                fallback = outcome.is_fallback(),
                "window classified"
            );

            classified += 1;
            if outcome.is_fallback() {
                fallbacks += 1;
            }
            timeline.extend(reducer.push(window.start_ms, &outcome));
        }

        tracing::info!(
            target: LOG_TARGET,
            file = %filename,
            windows = classified,
            fallbacks,
            entries = timeline.len(),
            "analysis finished"
        );

        Ok(AnalysisReport {
            filename,
            chunk_ms: cfg.chunk_ms,
            emotion_map: cfg.emotion_map,
            model: cfg.model,
            window_stride: cfg.window_stride,
            timeline,
        })
    }
}
