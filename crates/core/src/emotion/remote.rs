use crate::config::ApiKey;
use crate::emotion::{EmotionBackend, InferenceError, InferenceRequest, LabelScore};
use crate::util::{retry_with_backoff, RetryConfig};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

const LOG_TARGET: &str = "emotion::remote";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Hosted audio-classification endpoint speaking the Hugging Face
/// inference API: WAV bytes in, `[{label, score}]` out.
#[derive(Clone)]
pub struct RemoteBackend {
    client: Client,
    base_url: Url,
    api_token: Option<ApiKey>,
    retry: RetryConfig,
}

#[derive(Deserialize)]
struct RemoteScore {
    label: String,
    score: f32,
}

impl RemoteBackend {
    pub fn new(base_url: Url) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: LOG_TARGET, error = %e, "falling back to default http client");
                Client::new()
            });
        Self {
            client,
            base_url,
            api_token: None,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_api_token(mut self, token: ApiKey) -> Self {
        self.api_token = Some(token);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn model_url(&self, repository: &str) -> String {
        format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), repository)
    }

    async fn post_once(&self, url: &str, wav: &[u8]) -> Result<Vec<LabelScore>, InferenceError> {
        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "audio/wav")
            .body(wav.to_vec());
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token.expose());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_owned());
            return Err(InferenceError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().await?;
        let scores: Vec<RemoteScore> = serde_json::from_slice(&body)
            .map_err(|e| InferenceError::InvalidResponse(format!("failed to parse JSON: {e}")))?;
        Ok(scores
            .into_iter()
            .map(|s| LabelScore::new(s.label, s.score))
            .collect())
    }
}

/// 16-bit mono WAV, which every hosted audio pipeline accepts.
pub(crate) fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, InferenceError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let encode_err = |e: hound::Error| InferenceError::Encode(e.to_string());
    let mut cursor = std::io::Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(encode_err)?;
        for s in samples {
            let v = (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16;
            writer.write_sample(v).map_err(encode_err)?;
        }
        writer.finalize().map_err(encode_err)?;
    }
    Ok(cursor.into_inner())
}

impl EmotionBackend for RemoteBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn infer(
        &self,
        request: InferenceRequest,
    ) -> BoxFuture<'_, Result<Vec<LabelScore>, InferenceError>> {
        async move {
            let wav = encode_wav(&request.samples, request.sample_rate)?;
            let url = self.model_url(request.model.repository());
            tracing::debug!(target: LOG_TARGET, %url, bytes = wav.len(), "posting window");

            retry_with_backoff(
                &self.retry,
                || self.post_once(&url, &wav),
                InferenceError::is_retryable,
            )
            .await
        }
        .boxed()
    }
}
