//! Generation pipeline constants, error codes, and submission strategy.
//!
//! Defaults here are overridable through the pipeline configuration; call
//! sites never hardcode their own copies.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Collections and defaults
// ---------------------------------------------------------------------------

/// Document-store collection holding one record per job.
pub const COLLECTION_AVATAR_GENERATIONS: &str = "avatarGenerations";

/// Prompt sent upstream with every submission.
pub const DEFAULT_PROMPT: &str = "Generate an anime style avatar, highly detailed portrait";

/// Model version submitted to the prediction service.
pub const DEFAULT_MODEL_VERSION: &str =
    "798c9c78ca767f5a9bbc9b020b9c8b1c5c064fa20096688620c4eb3e6b8f2c48";

/// Owner recorded on jobs when the caller does not supply one.
pub const DEFAULT_OWNER_ID: &str = "public-user";

/// First path segment of every uploaded source image.
pub const DEFAULT_STORAGE_NAMESPACE: &str = "uploads";

/// Inline payload placeholder meaning "no real image was supplied".
pub const PLACEHOLDER_IMAGE_SOURCE: &str = "data:image/jpeg;base64,direct-upload";

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Inline payloads longer than this (encoded, in bytes) are rejected locally.
pub const MAX_INLINE_PAYLOAD_BYTES: usize = 10_000_000;

/// Delay between two status polls of the same upstream job.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Polls before a job still `running` upstream is given up on.
pub const DEFAULT_POLL_MAX_ATTEMPTS: u32 = 300;

/// Consecutive failed status reads tolerated before the job is failed.
pub const DEFAULT_POLL_MAX_TRANSIENT_ERRORS: u32 = 3;

/// Upper bound on a single blob write.
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound on a single submission request.
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

/// Machine codes written to a job's `errorCode` field.
pub mod error_codes {
    pub const TRANSFER_FAILED: &str = "transfer_failed";
    pub const RECORD_WRITE_FAILED: &str = "record_write_failed";
    pub const SUBMISSION_REJECTED: &str = "submission_rejected";
    pub const PAYLOAD_TOO_LARGE: &str = "payload_too_large";
    pub const INVALID_INPUT: &str = "invalid_input";
    pub const POLL_FAILED: &str = "poll_failed";
    pub const POLL_TIMEOUT: &str = "poll_timeout";
    pub const PREDICTION_FAILED: &str = "prediction_failed";
    pub const MISSING_OUTPUT: &str = "missing_output";
}

/// Message recorded when an inline payload exceeds the ceiling.
pub const IMAGE_TOO_LARGE_MESSAGE: &str = "Image too large for processing";

/// Message recorded when the placeholder source reaches submission.
pub const PLACEHOLDER_SOURCE_MESSAGE: &str = "Invalid image source (placeholder URL)";

// ---------------------------------------------------------------------------
// Submission strategy
// ---------------------------------------------------------------------------

/// How the image is handed to the prediction service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmissionStrategy {
    /// Send the in-hand payload inline; oversize payloads fail the job.
    #[default]
    Inline,
    /// Always send the blob store locator.
    Locator,
    /// Inline when under the ceiling, otherwise the locator.
    Auto,
}

/// The single representation actually sent for a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRepresentation {
    Inline,
    Locator,
}

impl SubmissionStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionStrategy::Inline => "inline",
            SubmissionStrategy::Locator => "locator",
            SubmissionStrategy::Auto => "auto",
        }
    }

    /// Pick the representation for one submission.
    ///
    /// `inline_len` is the encoded inline payload length, or `None` when no
    /// payload is in hand (re-drive and retry), in which case the locator is
    /// always used.
    pub fn select(self, inline_len: Option<usize>, ceiling: usize) -> InputRepresentation {
        match (self, inline_len) {
            (_, None) | (SubmissionStrategy::Locator, _) => InputRepresentation::Locator,
            (SubmissionStrategy::Inline, Some(_)) => InputRepresentation::Inline,
            (SubmissionStrategy::Auto, Some(len)) if len <= ceiling => InputRepresentation::Inline,
            (SubmissionStrategy::Auto, Some(_)) => InputRepresentation::Locator,
        }
    }
}

impl fmt::Display for SubmissionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStrategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(SubmissionStrategy::Inline),
            "locator" => Ok(SubmissionStrategy::Locator),
            "auto" => Ok(SubmissionStrategy::Auto),
            other => Err(CoreError::Validation(format!(
                "Invalid submission strategy '{other}'. Must be one of: inline, locator, auto"
            ))),
        }
    }
}
