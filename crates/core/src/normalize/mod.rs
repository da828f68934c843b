use crate::chunk::Window;
use crate::config::TARGET_SAMPLE_RATE;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

/// Classifier input: mono `f32` in `[-1.0, 1.0]` at a fixed rate.
#[derive(Clone, Debug, PartialEq)]
pub enum NormalizedSample {
    /// The window held no samples.
    Empty,
    Samples { sample_rate: u32, data: Vec<f32> },
}

impl NormalizedSample {
    pub fn is_empty(&self) -> bool {
        match self {
            NormalizedSample::Empty => true,
            NormalizedSample::Samples { data, .. } => data.is_empty(),
        }
    }

    pub fn data(&self) -> &[f32] {
        match self {
            NormalizedSample::Empty => &[],
            NormalizedSample::Samples { data, .. } => data,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum NormalizeError {
    #[error("resampling {from} Hz -> {to} Hz failed: {reason}")]
    Resample { from: u32, to: u32, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleNormalizer {
    target_rate: u32,
}

impl Default for SampleNormalizer {
    fn default() -> Self {
        Self {
            target_rate: TARGET_SAMPLE_RATE,
        }
    }
}

impl SampleNormalizer {
    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    /// Downmix, resample, then scale by the source sample width.
    pub fn normalize(&self, window: &Window<'_>) -> Result<NormalizedSample, NormalizeError> {
        if window.is_empty() {
            return Ok(NormalizedSample::Empty);
        }

        let mono = downmix(window.samples, window.channels);
        let resampled = if window.sample_rate != self.target_rate {
            resample(mono, window.sample_rate, self.target_rate)?
        } else {
            mono
        };

        Ok(NormalizedSample::Samples {
            sample_rate: self.target_rate,
            data: scale(resampled, window.sample_width),
        })
    }
}

fn downmix(samples: &[i32], channels: u16) -> Vec<f32> {
    let channels = usize::from(channels.max(1));
    if channels == 1 {
        return samples.iter().map(|&s| s as f32).collect();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i64 = frame.iter().map(|&s| i64::from(s)).sum();
            (sum as f64 / channels as f64) as f32
        })
        .collect()
}

/// One-shot resample of a whole window.
///
/// The sinc filter delays its output by `output_delay()` frames, so the tail
/// is flushed with zero input and the delay is cut from the front. The result
/// is exactly `ceil(len * to / from)` frames long.
fn resample(samples: Vec<f32>, from: u32, to: u32) -> Result<Vec<f32>, NormalizeError> {
    let err = |reason: String| NormalizeError::Resample { from, to, reason };
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let expected = resampled_len(samples.len(), from, to);
    let mut resampler = SincFixedIn::<f32>::new(
        f64::from(to) / f64::from(from),
        2.0,
        params,
        samples.len(),
        1,
    )
    .map_err(|e| err(e.to_string()))?;
    let delay = resampler.output_delay();

    let waves_in = vec![samples];
    let mut out = resampler
        .process(&waves_in, None)
        .map_err(|e| err(e.to_string()))?
        .pop()
        .unwrap_or_default();

    for _ in 0..MAX_FLUSHES {
        if out.len() >= delay + expected {
            break;
        }
        let flush: Option<&[Vec<f32>]> = None;
        let tail = resampler
            .process_partial(flush, None)
            .map_err(|e| err(e.to_string()))?
            .pop()
            .unwrap_or_default();
        if tail.is_empty() {
            break;
        }
        out.extend(tail);
    }

    if out.len() < delay + expected {
        return Err(err(format!(
            "produced {} frames, need {}",
            out.len().saturating_sub(delay),
            expected
        )));
    }
    out.drain(..delay);
    out.truncate(expected);
    Ok(out)
}

const MAX_FLUSHES: usize = 4;

fn resampled_len(len: usize, from: u32, to: u32) -> usize {
    let len = len as u64;
    let (from, to) = (u64::from(from), u64::from(to));
    usize::try_from((len * to).div_ceil(from)).unwrap_or(usize::MAX)
}

/// Largest magnitude representable at `sample_width` bytes; zero when degenerate.
fn max_magnitude(sample_width: u16) -> f32 {
    match u32::from(sample_width) * 8 {
        0 => 0.0,
        bits => (1u64 << (bits - 1)) as f32,
    }
}

fn scale(samples: Vec<f32>, sample_width: u16) -> Vec<f32> {
    let magnitude = max_magnitude(sample_width);
    if magnitude == 0.0 {
        return vec![0.0; samples.len()];
    }
    samples
        .into_iter()
        .map(|s| (s / magnitude).clamp(-1.0, 1.0))
        .collect()
}
