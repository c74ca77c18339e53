use std::time::Duration;

/// Errors from the prediction client.
#[derive(Debug, thiserror::Error)]
pub enum PredictionError {
    /// The service rejected a submission with a non-2xx status.
    #[error("Prediction submission rejected ({status}): {message}")]
    Submission { status: u16, message: String },

    /// The service accepted a submission but returned no prediction id.
    #[error("Prediction service returned no handle")]
    MissingHandle,

    /// Inline payload over the local ceiling. Never sent upstream.
    #[error("Inline payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Input rejected locally before submission.
    #[error("Invalid prediction input: {0}")]
    InvalidInput(String),

    /// A status check returned something other than a readable status.
    #[error("Prediction status check failed: {0}")]
    Poll(String),

    /// The HTTP request itself failed (network, DNS, TLS, decoding).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Prediction request timed out after {0:?}")]
    Timeout(Duration),
}

impl PredictionError {
    /// Whether the error was produced locally without a network call.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            PredictionError::PayloadTooLarge { .. } | PredictionError::InvalidInput(_)
        )
    }
}
