use crate::emotion::{EmotionBackend, InferenceError, InferenceRequest, LabelScore};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

const QUIET_RMS: f32 = 0.1;
const LOUD_RMS: f32 = 0.6;
const HIGH_PITCH_HZ: f32 = 200.0;
const LOW_PITCH_HZ: f32 = 100.0;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProsodyFeatures {
    pub energy_rms: f32,
    pub pitch_hz: Option<f32>,
}

impl ProsodyFeatures {
    pub fn extract(samples: &[f32], sample_rate: u32) -> Self {
        if samples.is_empty() {
            return Self {
                energy_rms: 0.0,
                pitch_hz: None,
            };
        }
        let energy = samples.iter().map(|s| f64::from(*s).powi(2)).sum::<f64>() / samples.len() as f64;
        Self {
            energy_rms: energy.sqrt() as f32,
            pitch_hz: zero_crossing_pitch(samples, sample_rate),
        }
    }
}

/// Rough fundamental estimate: two zero crossings per period.
fn zero_crossing_pitch(samples: &[f32], sample_rate: u32) -> Option<f32> {
    let crossings = samples
        .windows(2)
        .filter(|w| (w[0] < 0.0) != (w[1] < 0.0))
        .count();
    if crossings == 0 {
        return None;
    }
    let seconds = samples.len() as f32 / sample_rate as f32;
    Some(crossings as f32 / (2.0 * seconds))
}

/// Offline heuristic over energy and pitch. Needs no model; speaks the
/// same short label vocabulary as the superb checkpoint.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProsodyBackend;

impl ProsodyBackend {
    pub fn new() -> Self {
        Self
    }

    pub fn score(features: ProsodyFeatures) -> Vec<LabelScore> {
        let (label, confidence) = if features.energy_rms < QUIET_RMS {
            ("neu", 0.6)
        } else if features.energy_rms > LOUD_RMS {
            ("ang", (0.5 + features.energy_rms / 2.0).min(0.95))
        } else {
            match features.pitch_hz {
                Some(pitch) if pitch > HIGH_PITCH_HZ => ("hap", 0.55 + features.energy_rms / 2.0),
                Some(pitch) if pitch < LOW_PITCH_HZ => ("sad", 0.55 + features.energy_rms / 2.0),
                _ => ("neu", 0.5),
            }
        };

        let others = ["neu", "hap", "ang", "sad"]
            .into_iter()
            .filter(|l| *l != label);
        let rest = (1.0 - confidence) / 3.0;
        std::iter::once(LabelScore::new(label, confidence))
            .chain(others.map(|l| LabelScore::new(l, rest)))
            .collect()
    }
}

impl EmotionBackend for ProsodyBackend {
    fn name(&self) -> &'static str {
        "prosody"
    }

    fn infer(
        &self,
        request: InferenceRequest,
    ) -> BoxFuture<'_, Result<Vec<LabelScore>, InferenceError>> {
        async move {
            let features = ProsodyFeatures::extract(&request.samples, request.sample_rate);
            Ok(Self::score(features))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelId;

    fn square(amplitude: f32, half_period: usize, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| if (i / half_period) % 2 == 0 { amplitude } else { -amplitude })
            .collect()
    }

    fn top_label(samples: Vec<f32>) -> String {
        let request = InferenceRequest {
            model: ModelId::Superb,
            sample_rate: 16_000,
            samples,
        };
        let scores = futures::executor::block_on(ProsodyBackend.infer(request)).unwrap();
        scores[0].label.clone()
    }

    #[test]
    fn features_of_square_wave() {
        let f = ProsodyFeatures::extract(&square(0.3, 20, 16_000), 16_000);
        assert!((f.energy_rms - 0.3).abs() < 1e-4);
        let pitch = f.pitch_hz.unwrap();
        assert!((pitch - 400.0).abs() < 1.0, "pitch = {pitch}");
    }

    #[test]
    fn silence_has_no_pitch() {
        let f = ProsodyFeatures::extract(&vec![0.0; 100], 16_000);
        assert_eq!(f.energy_rms, 0.0);
        assert_eq!(f.pitch_hz, None);
    }

    #[test]
    fn prosody_label_mapping() {
        assert_eq!(top_label(square(0.05, 20, 16_000)), "neu");
        assert_eq!(top_label(square(0.3, 20, 16_000)), "hap");
        assert_eq!(top_label(square(0.3, 100, 16_000)), "sad");
        assert_eq!(top_label(square(0.8, 50, 16_000)), "ang");
        assert_eq!(top_label(square(0.3, 53, 16_000)), "neu");
    }

    #[test]
    fn scores_cover_every_label_and_sum_to_one() {
        let scores = ProsodyBackend::score(ProsodyFeatures {
            energy_rms: 0.3,
            pitch_hz: Some(250.0),
        });
        assert_eq!(scores.len(), 4);
        let total: f32 = scores.iter().map(|s| s.score).sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(&s.score)));
    }
}
