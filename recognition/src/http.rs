//! HTTP implementation of [`Recognizer`].

use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, RequestBuilder, StatusCode, Url, multipart};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::RecognitionError;
use crate::recognizer::Recognizer;
use crate::types::{
    BackendVerification, Health, HealthResponse, TrainResponse, TrainingOutcome, VerifyResponse,
};

/// Default per-request timeout for train and verify.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for the health probe.
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default delay before the first retry; doubled on each further retry.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Upper bound of a single retry delay.
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Delay before retry `attempt` (1-based): `base * 2^(attempt-1)`, capped at
/// [`MAX_RETRY_BACKOFF`].
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = attempt
        .checked_sub(1)
        .and_then(|n| 1u32.checked_shl(n))
        .unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(MAX_RETRY_BACKOFF)
}

const USER_AGENT: &str = concat!("autograph-recognition/", env!("CARGO_PKG_VERSION"));

/// A single failed attempt, before it is reported to the caller.
struct Failure {
    retryable: bool,
    reason: String,
}

impl Failure {
    fn from_reqwest(e: reqwest::Error) -> Self {
        Self {
            retryable: e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            reason: e.to_string(),
        }
    }
}

/// Recognizer talking to the backend's HTTP surface:
///
/// - `POST /train/{identity_id}`
/// - `POST /verify` (multipart `file`, optional `session_id`)
/// - `GET /health`
pub struct HttpRecognizer {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    max_retries: u32,
    retry_backoff: Duration,
    health_timeout: Duration,
}

/// Builder for [`HttpRecognizer`].
pub struct HttpRecognizerBuilder {
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    health_timeout: Duration,
    max_retries: u32,
    retry_backoff: Duration,
}

impl HttpRecognizerBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    /// Send `Authorization: Bearer {key}` with every request.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.api_key = if key.is_empty() { None } else { Some(key) };
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn build(self) -> Result<HttpRecognizer, RecognitionError> {
        let base_url = Url::parse(&self.base_url)
            .map_err(|e| RecognitionError::Config(format!("base url {:?}: {e}", self.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(RecognitionError::Config(format!(
                "base url {:?} cannot carry a path",
                self.base_url
            )));
        }

        let client = Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| RecognitionError::Config(e.to_string()))?;

        Ok(HttpRecognizer {
            client,
            base_url,
            api_key: self.api_key,
            max_retries: self.max_retries,
            retry_backoff: self.retry_backoff,
            health_timeout: self.health_timeout,
        })
    }
}

impl HttpRecognizer {
    /// Creates a recognizer with default timeouts and retries.
    pub fn new(base_url: impl Into<String>) -> Result<Self, RecognitionError> {
        HttpRecognizerBuilder::new(base_url).build()
    }

    pub fn builder(base_url: impl Into<String>) -> HttpRecognizerBuilder {
        HttpRecognizerBuilder::new(base_url)
    }

    /// Returns the configured base URL.
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, RecognitionError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RecognitionError::Config("base url cannot carry a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Runs `build` + send with exponential backoff on retryable failures.
    ///
    /// `build` is invoked once per attempt because multipart bodies cannot be
    /// replayed.
    async fn execute<F>(&self, op: &'static str, build: F) -> Result<Bytes, RecognitionError>
    where
        F: Fn() -> Result<RequestBuilder, Failure>,
    {
        let mut last_reason = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = backoff_delay(self.retry_backoff, attempt);
                warn!(op, attempt, ?backoff, "recognition: retrying");
                tokio::time::sleep(backoff).await;
            }

            let request =
                build().map_err(|f| RecognitionError::unavailable(op, f.reason))?;
            match self.send_once(request).await {
                Ok(body) => return Ok(body),
                Err(f) if f.retryable => last_reason = Some(f.reason),
                Err(f) => return Err(RecognitionError::unavailable(op, f.reason)),
            }
        }

        Err(RecognitionError::unavailable(
            op,
            last_reason.unwrap_or_else(|| "max retries exceeded".to_string()),
        ))
    }

    async fn send_once(&self, request: RequestBuilder) -> Result<Bytes, Failure> {
        let response = request.send().await.map_err(Failure::from_reqwest)?;
        let status = response.status();
        let body = response.bytes().await.map_err(Failure::from_reqwest)?;

        if !status.is_success() {
            return Err(Failure {
                retryable: status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error(),
                reason: format!("HTTP {status}: {}", String::from_utf8_lossy(&body)),
            });
        }
        Ok(body)
    }

    fn decode<T: DeserializeOwned>(op: &'static str, body: &[u8]) -> Result<T, RecognitionError> {
        serde_json::from_slice(body)
            .map_err(|e| RecognitionError::unavailable(op, format!("malformed response: {e}")))
    }
}

#[async_trait::async_trait]
impl Recognizer for HttpRecognizer {
    async fn train(&self, identity_id: &str) -> Result<TrainingOutcome, RecognitionError> {
        let url = self.endpoint(&["train", identity_id])?;
        debug!(identity_id, %url, "recognition: train");

        let body = self
            .execute("train", || Ok(self.authorized(self.client.post(url.clone()))))
            .await?;
        let resp: TrainResponse = Self::decode("train", &body)?;
        resp.into_outcome()
            .map_err(|r| RecognitionError::unavailable("train", format!("malformed response: {r}")))
    }

    async fn verify(
        &self,
        probe: &[u8],
        media_type: &str,
        context_id: Option<&str>,
    ) -> Result<BackendVerification, RecognitionError> {
        let url = self.endpoint(&["verify"])?;
        let file_name = format!("probe.{}", extension_for(media_type));
        debug!(bytes = probe.len(), media_type, ?context_id, "recognition: verify");

        let body = self
            .execute("verify", || {
                let part = multipart::Part::bytes(probe.to_vec())
                    .file_name(file_name.clone())
                    .mime_str(media_type)
                    .map_err(|e| Failure {
                        retryable: false,
                        reason: format!("media type {media_type:?}: {e}"),
                    })?;
                let mut form = multipart::Form::new().part("file", part);
                if let Some(id) = context_id {
                    form = form.text("session_id", id.to_string());
                }
                Ok(self
                    .authorized(self.client.post(url.clone()))
                    .multipart(form))
            })
            .await?;
        let resp: VerifyResponse = Self::decode("verify", &body)?;
        resp.into_verification()
            .map_err(|r| RecognitionError::unavailable("verify", format!("malformed response: {r}")))
    }

    async fn health(&self) -> Health {
        let Ok(url) = self.endpoint(&["health"]) else {
            return Health { healthy: false };
        };
        let result = self
            .authorized(self.client.get(url))
            .timeout(self.health_timeout)
            .send()
            .await;

        let healthy = match result {
            Ok(resp) if resp.status() == StatusCode::OK => resp
                .json::<HealthResponse>()
                .await
                .map(|h| h.status == "healthy")
                .unwrap_or(false),
            Ok(resp) => {
                debug!(status = %resp.status(), "recognition: health probe failed");
                false
            }
            Err(e) => {
                debug!(error = %e, "recognition: health probe failed");
                false
            }
        };
        Health { healthy }
    }
}

fn extension_for(media_type: &str) -> &'static str {
    let essence = media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        _ => "bin",
    }
}
