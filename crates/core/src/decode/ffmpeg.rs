use crate::decode::{AudioDecoder, AudioSource, LoadError, Result, Waveform};
use ffmpeg_sidecar::{download, paths::ffmpeg_path};
use futures::future::BoxFuture;
use futures::FutureExt;

/// Decoder that shells out to ffmpeg, for containers symphonia cannot open.
///
/// ffmpeg converts to 16-bit interleaved PCM at the configured rate and
/// channel count, so the resulting waveform always has a sample width of 2.
#[derive(Clone, Debug)]
pub struct FfmpegDecoder {
    sample_rate: u32,
    channels: u16,
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self {
            sample_rate: crate::config::TARGET_SAMPLE_RATE,
            channels: 1,
        }
    }
}

impl FfmpegDecoder {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    fn ensure_ffmpeg_available(&self) -> Result<()> {
        download::auto_download().map_err(|e| LoadError::Unavailable(e.to_string()))
    }

    fn parse_s16le(raw: &[u8]) -> Result<Vec<i32>> {
        if !raw.len().is_multiple_of(2usize) {
            return Err(LoadError::InvalidFormat(format!(
                "s16le byte length must be a multiple of 2, got {}",
                raw.len()
            )));
        }
        Ok(raw
            .chunks_exact(2)
            .map(|c| i32::from(i16::from_le_bytes([c[0], c[1]])))
            .collect())
    }

    async fn run_ffmpeg(&self, source: AudioSource) -> Result<Vec<u8>> {
        let channels = self.channels.to_string();
        let rate = self.sample_rate.to_string();
        let mut child = tokio::process::Command::new(ffmpeg_path())
            .args([
                "-hide_banner",
                "-nostdin",
                "-loglevel",
                "error",
                "-i",
                "pipe:0",
                "-vn",
                "-sn",
                "-dn",
                "-ac",
                channels.as_str(),
                "-ar",
                rate.as_str(),
                "-f",
                "s16le",
                "-acodec",
                "pcm_s16le",
                "pipe:1",
            ])
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| LoadError::Unavailable(e.to_string()))?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            LoadError::Unavailable("ffmpeg stdin unavailable (pipe not created)".to_owned())
        })?;
        let bytes = source.bytes;
        let stdin_task = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            stdin.write_all(&bytes).await?;
            stdin.shutdown().await?;
            Ok::<(), std::io::Error>(())
        });

        let output = child.wait_with_output().await?;

        // ffmpeg may stop reading early on a bad header; its exit status is authoritative.
        if let Err(e) = stdin_task
            .await
            .map_err(|e| LoadError::Decode(e.to_string()))?
        {
            tracing::debug!(file = %source.name, error = %e, "ffmpeg closed stdin early");
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            return Err(LoadError::Decode(format!(
                "ffmpeg exit_code={:?} stderr={stderr}",
                output.status.code()
            )));
        }
        Ok(output.stdout)
    }
}

impl AudioDecoder for FfmpegDecoder {
    fn decode(&self, source: AudioSource) -> BoxFuture<'_, Result<Waveform>> {
        let this = self.clone();
        async move {
            this.ensure_ffmpeg_available()?;
            let raw = this.run_ffmpeg(source).await?;
            let samples = Self::parse_s16le(&raw)?;
            Waveform::new(samples, this.sample_rate, this.channels, 2)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_s16le_rejects_odd_length() {
        let err = FfmpegDecoder::parse_s16le(&[0, 1, 2]).unwrap_err();
        assert!(err.to_string().contains("multiple of 2"));
    }

    #[test]
    fn parse_s16le_sign_extends() {
        let mut raw = Vec::new();
        for v in [0i16, -1, i16::MAX, i16::MIN] {
            raw.extend_from_slice(&v.to_le_bytes());
        }
        let out = FfmpegDecoder::parse_s16le(&raw).unwrap();
        assert_eq!(out, vec![0, -1, 32767, -32768]);
    }

    #[tokio::test]
    #[ignore]
    async fn ffmpeg_decode_smoke_ignored() {
        // Requires ffmpeg presence or download.
        let source = AudioSource::new(
            "tone.wav",
            crate::decode::tests::wav_bytes(44_100, 2, 1000),
        );
        let w = FfmpegDecoder::default().decode(source).await.unwrap();
        assert_eq!(w.sample_rate(), 16_000);
        assert_eq!(w.channels(), 1);
    }
}
