//! Slicing a waveform into fixed-length, non-overlapping windows.

use crate::config::DEFAULT_MIN_WINDOW_MS;
use crate::decode::{frames_to_ms, ms_to_frames, Waveform};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    #[error("chunk length must be > 0 ms, got {0}")]
    InvalidChunkLength(u64),

    #[error("no window reaches the minimum of {min_window_ms} ms")]
    NoValidChunks { min_window_ms: u64 },
}

/// A borrowed slice of a waveform, starting at `start_ms`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window<'a> {
    pub start_ms: u64,
    pub duration_ms: u64,
    pub samples: &'a [i32],
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_width: u16,
}

impl Window<'_> {
    pub fn frame_count(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Chunker {
    min_window_ms: u64,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            min_window_ms: DEFAULT_MIN_WINDOW_MS,
        }
    }
}

impl Chunker {
    pub fn new(min_window_ms: u64) -> Self {
        Self { min_window_ms }
    }

    pub fn min_window_ms(&self) -> u64 {
        self.min_window_ms
    }

    /// Partitions `[0, duration)` into `chunk_ms` intervals, dropping any
    /// interval shorter than the minimum window.
    pub fn chunk<'a>(&self, waveform: &'a Waveform, chunk_ms: u64) -> Result<Windows<'a>, ChunkError> {
        if chunk_ms == 0 {
            return Err(ChunkError::InvalidChunkLength(chunk_ms));
        }
        let windows = Windows {
            waveform,
            chunk_ms,
            min_window_ms: self.min_window_ms,
            next_start_ms: 0,
        };
        if windows.clone().next().is_none() {
            return Err(ChunkError::NoValidChunks {
                min_window_ms: self.min_window_ms,
            });
        }
        Ok(windows)
    }
}

/// Lazy window sequence. Cloning restarts from the current position, so a
/// fresh clone of the value returned by [`Chunker::chunk`] replays every window.
#[derive(Clone, Debug)]
pub struct Windows<'a> {
    waveform: &'a Waveform,
    chunk_ms: u64,
    min_window_ms: u64,
    next_start_ms: u64,
}

impl<'a> Iterator for Windows<'a> {
    type Item = Window<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let rate = self.waveform.sample_rate();
        let channels = usize::from(self.waveform.channels());
        let total_frames = self.waveform.frame_count();
        let total_ms = self.waveform.duration_ms();

        while self.next_start_ms < total_ms {
            let start_ms = self.next_start_ms;
            self.next_start_ms = start_ms.saturating_add(self.chunk_ms);

            let start_frame = ms_to_frames(start_ms, rate).min(total_frames);
            let end_frame = ms_to_frames(self.next_start_ms, rate).min(total_frames);
            let duration_ms = frames_to_ms(end_frame - start_frame, rate);
            if duration_ms < self.min_window_ms {
                tracing::trace!(start_ms, duration_ms, "dropping short window");
                continue;
            }

            let from = start_frame as usize * channels;
            let to = end_frame as usize * channels;
            return Some(Window {
                start_ms,
                duration_ms,
                samples: &self.waveform.samples()[from..to],
                sample_rate: rate,
                channels: self.waveform.channels(),
                sample_width: self.waveform.sample_width(),
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waveform(duration_ms: u64, sample_rate: u32, channels: u16) -> Waveform {
        let frames = ms_to_frames(duration_ms, sample_rate) as usize;
        let samples = (0..frames * usize::from(channels))
            .map(|i| i as i32)
            .collect();
        Waveform::new(samples, sample_rate, channels, 2).unwrap()
    }

    fn offsets_and_durations(windows: Windows<'_>) -> (Vec<u64>, Vec<u64>) {
        windows.map(|w| (w.start_ms, w.duration_ms)).unzip()
    }

    #[test]
    fn five_seconds_in_two_second_chunks() {
        let w = waveform(5000, 16_000, 1);
        let windows = Chunker::default().chunk(&w, 2000).unwrap();
        let (offsets, durations) = offsets_and_durations(windows);
        assert_eq!(offsets, vec![0, 2000, 4000]);
        assert_eq!(durations, vec![2000, 2000, 1000]);
    }

    #[test]
    fn zero_chunk_length_is_invalid() {
        let w = waveform(1000, 8_000, 1);
        let err = Chunker::default().chunk(&w, 0).unwrap_err();
        assert_eq!(err, ChunkError::InvalidChunkLength(0));
    }

    #[test]
    fn all_windows_below_minimum_is_an_error() {
        let w = waveform(1000, 8_000, 1);
        let err = Chunker::default().chunk(&w, 250).unwrap_err();
        assert_eq!(err, ChunkError::NoValidChunks { min_window_ms: 300 });
    }

    #[test]
    fn short_trailing_window_is_dropped() {
        let w = waveform(4200, 16_000, 1);
        let (offsets, durations) = offsets_and_durations(Chunker::default().chunk(&w, 2000).unwrap());
        assert_eq!(offsets, vec![0, 2000]);
        assert_eq!(durations, vec![2000, 2000]);
    }

    #[test]
    fn trailing_window_at_minimum_is_kept() {
        let w = waveform(4300, 16_000, 1);
        let (offsets, durations) = offsets_and_durations(Chunker::default().chunk(&w, 2000).unwrap());
        assert_eq!(offsets, vec![0, 2000, 4000]);
        assert_eq!(durations, vec![2000, 2000, 300]);
    }

    #[test]
    fn windows_partition_the_waveform() {
        for &(duration, chunk) in &[(5000u64, 2000u64), (7300, 1000), (12_345, 4000), (999, 333)] {
            let w = waveform(duration, 8_000, 2);
            let chunker = Chunker::new(0);
            let windows: Vec<_> = chunker.chunk(&w, chunk).unwrap().collect();

            let mut expected_start = 0;
            let mut covered = 0;
            for win in &windows {
                assert_eq!(win.start_ms, expected_start);
                assert!(win.start_ms < duration);
                assert!(win.duration_ms <= chunk);
                expected_start += chunk;
                covered += win.samples.len();
            }
            assert_eq!(covered, w.samples().len());
        }
    }

    #[test]
    fn offsets_strictly_increase_and_never_overlap() {
        let w = waveform(9_750, 22_050, 1);
        let windows: Vec<_> = Chunker::default().chunk(&w, 1500).unwrap().collect();
        for pair in windows.windows(2) {
            assert!(pair[0].start_ms < pair[1].start_ms);
            assert!(pair[0].start_ms + pair[0].duration_ms <= pair[1].start_ms);
            let a_end = pair[0].samples.as_ptr_range().end;
            let b_start = pair[1].samples.as_ptr_range().start;
            assert_eq!(a_end, b_start);
        }
    }

    #[test]
    fn rechunking_is_deterministic() {
        let w = waveform(6_100, 16_000, 2);
        let chunker = Chunker::default();
        let first = chunker.chunk(&w, 2000).unwrap();
        let a: Vec<_> = first.clone().collect();
        let b: Vec<_> = first.collect();
        let c: Vec<_> = chunker.chunk(&w, 2000).unwrap().collect();
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn stereo_windows_keep_whole_frames() {
        let w = waveform(1000, 8_000, 2);
        let windows: Vec<_> = Chunker::default().chunk(&w, 500).unwrap().collect();
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].frame_count(), 4_000);
        assert_eq!(windows[1].samples[0], 8_000);
    }

    #[test]
    fn chunk_longer_than_audio_yields_one_window() {
        let w = waveform(1_200, 16_000, 1);
        let windows: Vec<_> = Chunker::default().chunk(&w, 60_000).unwrap().collect();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].duration_ms, 1_200);
    }
}
