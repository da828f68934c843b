#[cfg(feature = "ffmpeg")]
mod ffmpeg;
mod native;

use crate::config::LoaderLimits;
use bytes::Bytes;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegDecoder;
pub use native::SymphoniaDecoder;

const LOG_TARGET: &str = "decode";

/// Uploaded audio, not yet decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioSource {
    pub name: String,
    pub bytes: Bytes,
}

impl AudioSource {
    pub fn new<S: Into<String>>(name: S, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub async fn from_path(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(name, bytes))
    }

    /// File extension, used as a container hint.
    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.name).extension().and_then(|e| e.to_str())
    }
}

/// Decoded PCM held as interleaved integers at the source's sample width.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Waveform {
    samples: Vec<i32>,
    sample_rate: u32,
    channels: u16,
    sample_width: u16,
}

impl Waveform {
    /// `sample_width` is in bytes. A trailing partial frame is discarded.
    pub fn new(
        mut samples: Vec<i32>,
        sample_rate: u32,
        channels: u16,
        sample_width: u16,
    ) -> Result<Self> {
        if sample_rate == 0 {
            return Err(LoadError::InvalidFormat("sample rate must be > 0".to_owned()));
        }
        if channels == 0 {
            return Err(LoadError::InvalidFormat("channel count must be > 0".to_owned()));
        }
        if sample_width > 4 {
            return Err(LoadError::InvalidFormat(format!(
                "sample width must be at most 4 bytes, got {sample_width}"
            )));
        }
        let whole = samples.len() - samples.len() % usize::from(channels);
        samples.truncate(whole);
        Ok(Self {
            samples,
            sample_rate,
            channels,
            sample_width,
        })
    }

    pub fn samples(&self) -> &[i32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_width(&self) -> u16 {
        self.sample_width
    }

    pub fn frame_count(&self) -> u64 {
        (self.samples.len() / usize::from(self.channels)) as u64
    }

    pub fn duration_ms(&self) -> u64 {
        frames_to_ms(self.frame_count(), self.sample_rate)
    }
}

pub(crate) fn frames_to_ms(frames: u64, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    let ms = u128::from(frames) * 1000 / u128::from(sample_rate);
    ms.min(u128::from(u64::MAX)) as u64
}

pub(crate) fn ms_to_frames(ms: u64, sample_rate: u32) -> u64 {
    let frames = u128::from(ms) * u128::from(sample_rate) / 1000;
    frames.min(u128::from(u64::MAX)) as u64
}

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("could not decode audio: {0}")]
    Decode(String),

    #[error("audio is {size} bytes, limit is {max}")]
    TooLarge { size: u64, max: u64 },

    #[error("audio is {duration_ms} ms long, minimum is {min_ms} ms")]
    TooShort { duration_ms: u64, min_ms: u64 },

    #[error("invalid pcm format: {0}")]
    InvalidFormat(String),

    #[error("decoder unavailable: {0}")]
    Unavailable(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LoadError>;

/// Turns container bytes into a waveform. Format detection is the decoder's job.
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, source: AudioSource) -> BoxFuture<'_, Result<Waveform>>;
}

/// Enforces size and duration bounds around a decoder.
#[derive(Clone)]
pub struct AudioLoader {
    decoder: Arc<dyn AudioDecoder>,
    limits: LoaderLimits,
}

impl AudioLoader {
    pub fn new(decoder: Arc<dyn AudioDecoder>, limits: LoaderLimits) -> Self {
        Self { decoder, limits }
    }

    pub fn limits(&self) -> LoaderLimits {
        self.limits
    }

    pub async fn load(&self, source: AudioSource) -> Result<Waveform> {
        self.check_size(source.bytes.len() as u64)?;

        let name = source.name.clone();
        let waveform = self.decoder.decode(source).await?;
        let duration_ms = waveform.duration_ms();
        tracing::debug!(
            target: LOG_TARGET,
            file = %name,
            duration_ms,
            sample_rate = waveform.sample_rate(),
            channels = waveform.channels(),
            sample_width = waveform.sample_width(),
            "audio decoded"
        );

        if duration_ms < self.limits.min_duration_ms {
            return Err(LoadError::TooShort {
                duration_ms,
                min_ms: self.limits.min_duration_ms,
            });
        }
        Ok(waveform)
    }

    /// Checks the file size before reading it into memory.
    pub async fn load_file(&self, path: &Path) -> Result<Waveform> {
        let meta = tokio::fs::metadata(path).await?;
        self.check_size(meta.len())?;
        let source = AudioSource::from_path(path).await?;
        self.load(source).await
    }

    fn check_size(&self, size: u64) -> Result<()> {
        if size > self.limits.max_bytes {
            return Err(LoadError::TooLarge {
                size,
                max: self.limits.max_bytes,
            });
        }
        Ok(())
    }
}

impl Default for AudioLoader {
    fn default() -> Self {
        Self::new(Arc::new(SymphoniaDecoder), LoaderLimits::default())
    }
}
