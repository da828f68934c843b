use crate::decode::{AudioDecoder, AudioSource, LoadError, Result, Waveform};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::io::Cursor;
use symphonia::core::{
    audio::{SampleBuffer, SignalSpec},
    codecs::DecoderOptions,
    errors::Error,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};

/// Width assumed for compressed codecs that do not report bits per sample.
const DEFAULT_SAMPLE_WIDTH: u16 = 2;

/// In-process decoder backed by symphonia's probe and codec registry.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaDecoder;

impl SymphoniaDecoder {
    fn decode_blocking(source: &AudioSource) -> Result<Waveform> {
        let mss = MediaSourceStream::new(
            Box::new(Cursor::new(source.bytes.clone())),
            Default::default(),
        );
        let mut hint = Hint::new();
        if let Some(ext) = source.extension() {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| LoadError::Decode(format!("probe failed for {}: {e}", source.name)))?;
        let mut format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| LoadError::Decode(format!("no audio track in {}", source.name)))?;
        let track_id = track.id;
        let sample_width = track
            .codec_params
            .bits_per_sample
            .map(|bits| bits.clamp(8, 32).div_ceil(8) as u16)
            .unwrap_or(DEFAULT_SAMPLE_WIDTH);
        let shift = 32 - u32::from(sample_width) * 8;

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| LoadError::Decode(format!("no codec for {}: {e}", source.name)))?;

        let mut spec: Option<SignalSpec> = None;
        let mut samples: Vec<i32> = Vec::new();
        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(Error::IoError(_)) => break,
                Err(e) => {
                    return Err(LoadError::Decode(format!(
                        "packet read failed for {}: {e}",
                        source.name
                    )));
                }
            };
            if packet.track_id() != track_id {
                continue;
            }
            let audio_buf = match decoder.decode(&packet) {
                Ok(buf) => buf,
                Err(Error::DecodeError(e)) => {
                    tracing::debug!(file = %source.name, error = %e, "skipping corrupt packet");
                    continue;
                }
                Err(e) => {
                    return Err(LoadError::Decode(format!(
                        "decode failed for {}: {e}",
                        source.name
                    )));
                }
            };
            let buf_spec = *audio_buf.spec();
            if spec.is_none() {
                spec = Some(buf_spec);
            }
            let mut sample_buf = SampleBuffer::<i32>::new(audio_buf.capacity() as u64, buf_spec);
            sample_buf.copy_interleaved_ref(audio_buf);
            samples.extend(sample_buf.samples().iter().map(|s| s >> shift));
        }

        let spec = spec
            .ok_or_else(|| LoadError::Decode(format!("decoded 0 samples from {}", source.name)))?;
        let channels = u16::try_from(spec.channels.count())
            .map_err(|_| LoadError::InvalidFormat("too many channels".to_owned()))?;
        Waveform::new(samples, spec.rate, channels, sample_width)
    }
}

impl AudioDecoder for SymphoniaDecoder {
    fn decode(&self, source: AudioSource) -> BoxFuture<'_, Result<Waveform>> {
        async move {
            tokio::task::spawn_blocking(move || Self::decode_blocking(&source))
                .await
                .map_err(|e| LoadError::Decode(format!("decode task failed: {e}")))?
        }
        .boxed()
    }
}
