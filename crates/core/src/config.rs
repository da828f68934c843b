use crate::labels::{EmotionMap, UnknownMapError};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    num::{NonZeroU32, NonZeroU64},
    path::PathBuf,
    str::FromStr,
};

pub const DEFAULT_CHUNK_MS: u32 = 2000;
pub const DEFAULT_EMOTION_MAP: &str = "short_to_full";
pub const DEFAULT_MODEL: &str = "superb";
pub const DEFAULT_WINDOW_STRIDE: u32 = 1;
pub const DEFAULT_INFERENCE_URL: &str = "https://api-inference.huggingface.co/models";
pub const DEFAULT_UPLOAD_DIR: &str = "uploads";
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;
pub const DEFAULT_MIN_AUDIO_MS: u64 = 500;
pub const DEFAULT_MIN_WINDOW_MS: u64 = 300;
pub const TARGET_SAMPLE_RATE: u32 = 16_000;
pub const ENV_BACKEND: &str = "VOICE_EMOTION_BACKEND";
pub const ENV_INFERENCE_URL: &str = "VOICE_EMOTION_INFERENCE_URL";
pub const ENV_API_TOKEN: &str = "HF_API_TOKEN";
pub const ENV_ONNX_MODEL: &str = "VOICE_EMOTION_ONNX_MODEL";
pub const ENV_UPLOAD_DIR: &str = "VOICE_EMOTION_UPLOAD_DIR";

/// Window length in milliseconds. Always non-zero.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkLength(NonZeroU64);

impl ChunkLength {
    pub fn new(ms: i64) -> Result<Self, ConfigError> {
        u64::try_from(ms)
            .ok()
            .and_then(NonZeroU64::new)
            .map(Self)
            .ok_or(ConfigError::InvalidChunkLength(ms))
    }

    pub fn as_ms(&self) -> u64 {
        self.0.get()
    }
}

impl Default for ChunkLength {
    fn default() -> Self {
        Self(NonZeroU64::MIN.saturating_add(u64::from(DEFAULT_CHUNK_MS) - 1))
    }
}

/// Classify every n-th valid window. `1` keeps all of them.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WindowStride(NonZeroU32);

impl WindowStride {
    pub fn new(stride: u32) -> Result<Self, ConfigError> {
        NonZeroU32::new(stride)
            .map(Self)
            .ok_or(ConfigError::ZeroWindowStride)
    }

    pub fn get(&self) -> usize {
        usize::try_from(self.0.get()).unwrap_or(usize::MAX)
    }
}

impl Default for WindowStride {
    fn default() -> Self {
        Self(NonZeroU32::MIN)
    }
}

/// The closed set of models an analysis may request.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ModelId {
    #[default]
    Superb,
}

impl ModelId {
    pub const ALL: &'static [ModelId] = &[ModelId::Superb];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelId::Superb => "superb",
        }
    }

    /// Hub repository the identifier resolves to.
    pub fn repository(&self) -> &'static str {
        match self {
            ModelId::Superb => "superb/wav2vec2-base-superb-er",
        }
    }

    /// Output labels in logit order.
    pub fn labels(&self) -> &'static [&'static str] {
        match self {
            ModelId::Superb => &["neu", "hap", "ang", "sad"],
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelId::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownModel(s.to_owned()))
    }
}

/// Which classification capability serves the model.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Remote,
    Onnx,
    Prosody,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Remote => "remote",
            BackendKind::Onnx => "onnx",
            BackendKind::Prosody => "prosody",
        }
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote" => Ok(BackendKind::Remote),
            "onnx" => Ok(BackendKind::Onnx),
            "prosody" => Ok(BackendKind::Prosody),
            other => Err(ConfigError::UnknownBackend(other.to_owned())),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new<S: Into<String>>(value: S) -> Result<Self, ConfigError> {
        let v = value.into();
        if v.trim().is_empty() {
            return Err(ConfigError::EmptyApiKey);
        }
        Ok(Self(v))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(**redacted**)")
    }
}

/// Bounds enforced by the audio loader.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoaderLimits {
    pub max_bytes: u64,
    pub min_duration_ms: u64,
}

impl Default for LoaderLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            min_duration_ms: DEFAULT_MIN_AUDIO_MS,
        }
    }
}

/// Per-analysis options. Everything here is echoed back in the report.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalysisConfig {
    pub chunk_ms: ChunkLength,
    pub emotion_map: EmotionMap,
    pub model: ModelId,
    pub window_stride: WindowStride,
}

impl AnalysisConfig {
    /// Validates every option before any audio is touched.
    pub fn new(chunk_ms: i64, emotion_map: &str, model: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            chunk_ms: ChunkLength::new(chunk_ms)?,
            emotion_map: emotion_map.parse()?,
            model: model.parse()?,
            window_stride: WindowStride::default(),
        })
    }

    pub fn with_window_stride(mut self, stride: WindowStride) -> Self {
        self.window_stride = stride;
        self
    }
}

/// Process-wide settings for building the classifier backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub inference_url: url::Url,
    pub api_token: Option<ApiKey>,
    pub onnx_model: Option<PathBuf>,
}

impl BackendConfig {
    pub fn remote(inference_url: &str) -> Result<Self, ConfigError> {
        let inference_url = url::Url::parse(inference_url)
            .map_err(|e| ConfigError::InvalidInferenceUrl(e.to_string()))?;
        Ok(Self {
            kind: BackendKind::Remote,
            inference_url,
            api_token: None,
            onnx_model: None,
        })
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("chunk_ms must be a positive integer, got {0}")]
    InvalidChunkLength(i64),
    #[error("window stride must be > 0")]
    ZeroWindowStride,
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("unknown backend: {0}")]
    UnknownBackend(String),
    #[error(transparent)]
    UnknownMap(#[from] UnknownMapError),
    #[error("api key must not be empty")]
    EmptyApiKey,
    #[error("invalid inference url: {0}")]
    InvalidInferenceUrl(String),
    #[error("onnx backend requires a model path")]
    MissingOnnxModel,
}

pub trait Env {
    fn var(&self, key: &str) -> Option<String>;
}

#[derive(Clone, Debug, Default)]
pub struct StdEnv;

impl Env for StdEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Clone, Debug, Default)]
pub struct MapEnv {
    vars: std::collections::BTreeMap<String, String>,
}

impl MapEnv {
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_owned(), value.to_owned());
        self
    }
}

impl Env for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

pub fn resolve_api_key(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
) -> Result<Option<ApiKey>, ConfigError> {
    match cli_value {
        Some(v) => Ok(Some(ApiKey::new(v)?)),
        None => match env.var(env_key) {
            Some(v) => Ok(Some(ApiKey::new(v)?)),
            None => Ok(None),
        },
    }
}

pub fn resolve_string_with_default(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
    default: &str,
) -> String {
    match cli_value {
        Some(v) => v,
        None => env.var(env_key).unwrap_or_else(|| default.to_owned()),
    }
}

pub fn resolve_optional_string(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
) -> Option<String> {
    match cli_value {
        Some(v) => Some(v),
        None => env.var(env_key),
    }
}

/// Builds the backend settings from flags, falling back to the environment.
pub fn resolve_backend_config(
    backend: Option<String>,
    inference_url: Option<String>,
    api_token: Option<String>,
    onnx_model: Option<String>,
    env: &impl Env,
) -> Result<BackendConfig, ConfigError> {
    let kind: BackendKind =
        resolve_string_with_default(backend, ENV_BACKEND, env, BackendKind::Remote.as_str())
            .parse()?;
    let url = resolve_string_with_default(inference_url, ENV_INFERENCE_URL, env, DEFAULT_INFERENCE_URL);
    let mut cfg = BackendConfig::remote(&url)?;
    cfg.kind = kind;
    cfg.api_token = resolve_api_key(api_token, ENV_API_TOKEN, env)?;
    cfg.onnx_model = resolve_optional_string(onnx_model, ENV_ONNX_MODEL, env).map(PathBuf::from);

    if cfg.kind == BackendKind::Onnx && cfg.onnx_model.is_none() {
        return Err(ConfigError::MissingOnnxModel);
    }
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_length_rejects_zero_and_negative() {
        assert_eq!(ChunkLength::new(0), Err(ConfigError::InvalidChunkLength(0)));
        assert_eq!(
            ChunkLength::new(-250),
            Err(ConfigError::InvalidChunkLength(-250))
        );
        assert_eq!(ChunkLength::new(2000).expect("valid").as_ms(), 2000);
    }

    #[test]
    fn chunk_length_accepts_values_beyond_u32() {
        let ms = i64::from(u32::MAX) + 1;
        assert_eq!(ChunkLength::new(ms).expect("valid").as_ms(), 4_294_967_296);
        assert_eq!(
            ChunkLength::new(i64::MAX).expect("valid").as_ms(),
            i64::MAX as u64
        );
    }

    #[test]
    fn chunk_length_default_matches_constant() {
        assert_eq!(ChunkLength::default().as_ms(), u64::from(DEFAULT_CHUNK_MS));
    }

    #[test]
    fn model_id_is_a_closed_set() {
        assert_eq!("superb".parse::<ModelId>(), Ok(ModelId::Superb));
        assert_eq!(
            "whisper".parse::<ModelId>(),
            Err(ConfigError::UnknownModel("whisper".to_owned()))
        );
        assert_eq!(
            ModelId::Superb.repository(),
            "superb/wav2vec2-base-superb-er"
        );
    }

    #[test]
    fn analysis_config_reports_unknown_map() {
        let err = AnalysisConfig::new(2000, "bogus", "superb").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownMap(_)));
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn analysis_config_validates_chunk_before_map() {
        let err = AnalysisConfig::new(0, "bogus", "superb").unwrap_err();
        assert_eq!(err, ConfigError::InvalidChunkLength(0));
    }

    #[test]
    fn api_key_cli_takes_precedence_over_env() {
        let env = MapEnv::default().with_var(ENV_API_TOKEN, "env-key");
        let key = resolve_api_key(Some("cli-key".to_owned()), ENV_API_TOKEN, &env)
            .expect("valid key")
            .expect("present");
        assert_eq!(key.expose(), "cli-key");
    }

    #[test]
    fn api_key_debug_is_redacted() {
        let key = ApiKey::new("hf_secret").expect("valid");
        assert!(!format!("{key:?}").contains("hf_secret"));
    }

    #[test]
    fn backend_config_env_used_when_cli_missing() {
        let env = MapEnv::default()
            .with_var(ENV_BACKEND, "prosody")
            .with_var(ENV_INFERENCE_URL, "http://localhost:8080/models");
        let cfg = resolve_backend_config(None, None, None, None, &env).expect("valid");
        assert_eq!(cfg.kind, BackendKind::Prosody);
        assert_eq!(cfg.inference_url.as_str(), "http://localhost:8080/models");
        assert!(cfg.api_token.is_none());
    }

    #[test]
    fn backend_config_onnx_requires_model_path() {
        let env = MapEnv::default();
        let err = resolve_backend_config(Some("onnx".to_owned()), None, None, None, &env)
            .unwrap_err();
        assert_eq!(err, ConfigError::MissingOnnxModel);

        let cfg = resolve_backend_config(
            Some("onnx".to_owned()),
            None,
            None,
            Some("model.onnx".to_owned()),
            &env,
        )
        .expect("valid");
        assert_eq!(cfg.onnx_model, Some(PathBuf::from("model.onnx")));
    }

    #[test]
    fn resolve_string_with_default_default_used_when_both_missing() {
        let env = MapEnv::default();
        let v = resolve_string_with_default(None, ENV_UPLOAD_DIR, &env, DEFAULT_UPLOAD_DIR);
        assert_eq!(v, "uploads");
    }
}
