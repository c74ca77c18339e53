use avatarflow_core::generation::{error_codes, IMAGE_TOO_LARGE_MESSAGE};
use avatarflow_core::types::DocId;
use avatarflow_db::store::StoreError;
use avatarflow_prediction::PredictionError;
use avatarflow_storage::BlobError;

/// Everything that can stop a job run.
///
/// Inside the orchestrator each variant is converted into the job's
/// `error`/`errorCode` fields via [`code`](Self::code) and
/// [`job_message`](Self::job_message).
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Upload failed: {0}")]
    Transfer(#[from] BlobError),

    #[error("Job record write failed: {0}")]
    Record(#[from] StoreError),

    /// Submission failed, or was rejected locally before sending.
    #[error("Submission failed: {0}")]
    Submission(#[source] PredictionError),

    /// Status checks kept failing past the transient error budget.
    #[error("Status check failed: {0}")]
    Poll(#[source] PredictionError),

    #[error("Prediction did not finish after {attempts} status checks")]
    PollTimeout { attempts: u32 },

    /// Upstream reported the prediction as failed.
    #[error("Prediction failed: {0}")]
    PredictionFailed(String),

    #[error("Prediction succeeded without an output image")]
    MissingOutput,

    /// A job cannot be (re)driven in its current state.
    #[error("Precondition failed for job {job_id}: {reason}")]
    Precondition { job_id: DocId, reason: String },

    /// The job's task was cancelled (deletion or shutdown).
    #[error("Job run cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Stable machine code written to `errorCode`.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Transfer(_) => error_codes::TRANSFER_FAILED,
            PipelineError::Record(_) => error_codes::RECORD_WRITE_FAILED,
            PipelineError::Submission(PredictionError::PayloadTooLarge { .. }) => {
                error_codes::PAYLOAD_TOO_LARGE
            }
            PipelineError::Submission(PredictionError::InvalidInput(_)) => {
                error_codes::INVALID_INPUT
            }
            PipelineError::Submission(_) => error_codes::SUBMISSION_REJECTED,
            PipelineError::Poll(_) => error_codes::POLL_FAILED,
            PipelineError::PollTimeout { .. } => error_codes::POLL_TIMEOUT,
            PipelineError::PredictionFailed(_) => error_codes::PREDICTION_FAILED,
            PipelineError::MissingOutput => error_codes::MISSING_OUTPUT,
            PipelineError::Precondition { .. } => error_codes::INVALID_INPUT,
            PipelineError::Cancelled => error_codes::POLL_FAILED,
        }
    }

    /// Human-readable text written to the job's `error` field.
    pub fn job_message(&self) -> String {
        match self {
            PipelineError::Submission(PredictionError::PayloadTooLarge { .. }) => {
                IMAGE_TOO_LARGE_MESSAGE.to_string()
            }
            PipelineError::Submission(PredictionError::InvalidInput(reason)) => reason.clone(),
            PipelineError::PredictionFailed(reason) => reason.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use avatarflow_storage::TransferState;

    use super::*;

    #[test]
    fn oversize_payload_uses_fixed_message() {
        let err = PipelineError::Submission(PredictionError::PayloadTooLarge {
            size: 14_666_696,
            limit: 10_000_000,
        });
        assert_eq!(err.code(), "payload_too_large");
        assert_eq!(err.job_message(), "Image too large for processing");
    }

    #[test]
    fn upstream_rejection_keeps_status_and_message() {
        let err = PipelineError::Submission(PredictionError::Submission {
            status: 422,
            message: "Invalid version".into(),
        });
        assert_eq!(err.code(), "submission_rejected");
        assert!(err.job_message().contains("422"));
        assert!(err.job_message().contains("Invalid version"));
    }

    #[test]
    fn upstream_failure_message_is_passed_through() {
        let err = PipelineError::PredictionFailed("NSFW content detected".into());
        assert_eq!(err.code(), "prediction_failed");
        assert_eq!(err.job_message(), "NSFW content detected");
    }

    #[test]
    fn transfer_failure_code() {
        let err = PipelineError::from(BlobError::Transfer {
            state: TransferState::Failed,
            path: "uploads/u/1_a.jpg".into(),
        });
        assert_eq!(err.code(), "transfer_failed");
    }
}
