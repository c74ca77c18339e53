use std::fmt;

use async_trait::async_trait;
use avatarflow_core::data_uri;

use crate::error::PredictionError;

/// Upstream identifier of an in-flight prediction; the poll key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PredictionHandle(pub String);

impl PredictionHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PredictionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One submission: the image (an inline `data:` URI or a locator) and the
/// prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictionInput {
    pub image: String,
    pub prompt: String,
}

impl PredictionInput {
    /// Inline payload, encoded as a base64 `data:` URI.
    pub fn inline(content_type: &str, bytes: &[u8], prompt: impl Into<String>) -> Self {
        Self {
            image: data_uri::encode(content_type, bytes),
            prompt: prompt.into(),
        }
    }

    /// Reference to an already stored image.
    pub fn locator(locator: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            image: locator.into(),
            prompt: prompt.into(),
        }
    }

    pub fn is_inline(&self) -> bool {
        data_uri::is_data_uri(&self.image)
    }
}

/// Result of one status check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredictionStatus {
    /// Any non-terminal upstream status (`starting`, `processing`, ...).
    Running { status: String },
    /// `output` is the first generated image URL, if upstream returned one.
    Succeeded { output: Option<String> },
    Failed { error: String },
}

impl PredictionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PredictionStatus::Running { .. })
    }
}

/// The external prediction service.
#[async_trait]
pub trait PredictionService: Send + Sync {
    /// Start a prediction and return its handle.
    async fn submit(&self, input: &PredictionInput) -> Result<PredictionHandle, PredictionError>;

    /// Single status check. Does not wait.
    async fn poll(&self, handle: &PredictionHandle) -> Result<PredictionStatus, PredictionError>;
}
