//! Change-only compression of per-window classifications.

use crate::emotion::ClassificationOutcome;
use crate::labels::EmotionMap;
use serde::{Deserialize, Serialize};

/// One label transition. Serialises as `{time, seconds, emotion, confidence}`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TimelineEntry {
    #[serde(skip)]
    pub offset_ms: u64,
    pub time: String,
    pub seconds: u64,
    pub emotion: String,
    pub confidence: f64,
}

impl TimelineEntry {
    pub fn new(offset_ms: u64, emotion: impl Into<String>, confidence: f32) -> Self {
        let seconds = offset_ms / 1000;
        Self {
            offset_ms,
            time: format_time(seconds),
            seconds,
            emotion: emotion.into(),
            confidence: round2(confidence),
        }
    }
}

/// Zero-padded `MM:SS`. Minutes keep growing past 99 rather than wrapping.
pub fn format_time(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

fn round2(value: f32) -> f64 {
    let v = f64::from(value);
    if v.is_finite() {
        (v * 100.0).round() / 100.0
    } else {
        0.0
    }
}

/// Emits an entry only when the mapped label differs from the last one emitted.
#[derive(Clone, Debug, Default)]
pub struct TimelineReducer {
    map: EmotionMap,
    previous: Option<String>,
}

impl TimelineReducer {
    pub fn new(map: EmotionMap) -> Self {
        Self {
            map,
            previous: None,
        }
    }

    pub fn push(&mut self, offset_ms: u64, outcome: &ClassificationOutcome) -> Option<TimelineEntry> {
        let label = self.map.map(outcome.label());
        if self.previous.as_deref() == Some(label) {
            return None;
        }
        self.previous = Some(label.to_owned());
        Some(TimelineEntry::new(offset_ms, label, outcome.confidence()))
    }

    pub fn reduce<'a, I>(mut self, results: I) -> Vec<TimelineEntry>
    where
        I: IntoIterator<Item = (u64, &'a ClassificationOutcome)>,
    {
        results
            .into_iter()
            .filter_map(|(offset_ms, outcome)| self.push(offset_ms, outcome))
            .collect()
    }
}
