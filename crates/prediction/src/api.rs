//! HTTP client for the prediction service.
//!
//! Wraps `POST {base}/predictions` and `GET {base}/predictions/{id}` using
//! [`reqwest`], with a bearer token and a per-request timeout.

use std::time::Duration;

use async_trait::async_trait;
use avatarflow_core::generation::{DEFAULT_SUBMIT_TIMEOUT, MAX_INLINE_PAYLOAD_BYTES};

use crate::error::PredictionError;
use crate::guard::check_input;
use crate::messages::{rejection_message, CreatePrediction, PredictionInputBody, PredictionResponse};
use crate::service::{PredictionHandle, PredictionInput, PredictionService, PredictionStatus};

/// HTTP client for one prediction service account and model version.
pub struct PredictionApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
    model_version: String,
    request_timeout: Duration,
    max_inline_bytes: usize,
}

impl PredictionApi {
    /// * `base_url` - API root, e.g. `https://api.replicate.com/v1`.
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        model_version: impl Into<String>,
    ) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, token, model_version)
    }

    /// Reuse an existing [`reqwest::Client`] for connection pooling.
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
        model_version: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            model_version: model_version.into(),
            request_timeout: DEFAULT_SUBMIT_TIMEOUT,
            max_inline_bytes: MAX_INLINE_PAYLOAD_BYTES,
        }
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn max_inline_bytes(mut self, limit: usize) -> Self {
        self.max_inline_bytes = limit;
        self
    }

    // ---- private helpers ----

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, PredictionError> {
        request
            .bearer_auth(&self.token)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| self.map_transport(e))
    }

    fn map_transport(&self, e: reqwest::Error) -> PredictionError {
        if e.is_timeout() {
            PredictionError::Timeout(self.request_timeout)
        } else {
            PredictionError::Request(e)
        }
    }

    /// Split a response into its status and body text.
    async fn read(&self, response: reqwest::Response) -> Result<(u16, String), PredictionError> {
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| self.map_transport(e))?;
        Ok((status, body))
    }
}

#[async_trait]
impl PredictionService for PredictionApi {
    async fn submit(&self, input: &PredictionInput) -> Result<PredictionHandle, PredictionError> {
        check_input(input, self.max_inline_bytes)?;

        let body = CreatePrediction {
            version: &self.model_version,
            input: PredictionInputBody {
                image: &input.image,
                prompt: &input.prompt,
            },
        };
        let response = self
            .send(
                self.client
                    .post(format!("{}/predictions", self.base_url))
                    .json(&body),
            )
            .await?;

        let (status, text) = self.read(response).await?;
        if !(200..300).contains(&status) {
            return Err(PredictionError::Submission {
                status,
                message: rejection_message(&text),
            });
        }

        let parsed: PredictionResponse = serde_json::from_str(&text).unwrap_or_default();
        match parsed.id.filter(|id| !id.is_empty()) {
            Some(id) => {
                tracing::debug!(handle = %id, inline = input.is_inline(), "Prediction submitted");
                Ok(PredictionHandle(id))
            }
            None => Err(PredictionError::MissingHandle),
        }
    }

    async fn poll(&self, handle: &PredictionHandle) -> Result<PredictionStatus, PredictionError> {
        let response = self
            .send(
                self.client
                    .get(format!("{}/predictions/{}", self.base_url, handle)),
            )
            .await?;

        let (status, text) = self.read(response).await?;
        if !(200..300).contains(&status) {
            return Err(PredictionError::Poll(format!(
                "status {status}: {}",
                rejection_message(&text)
            )));
        }

        let parsed: PredictionResponse = serde_json::from_str(&text)
            .map_err(|e| PredictionError::Poll(format!("unreadable status body: {e}")))?;
        Ok(parsed.into_status())
    }
}
