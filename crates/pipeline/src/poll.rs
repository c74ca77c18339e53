//! Fixed-interval status polling for one prediction.
//!
//! [`poll_until_terminal`] checks the prediction, sleeps
//! [`PollPolicy::interval`] while it is still running, and stops at the
//! first terminal status, after [`PollPolicy::max_attempts`] checks, after
//! too many consecutive failed checks, or when the [`CancellationToken`]
//! fires. Polls for one handle are strictly sequential.

use std::time::Duration;

use avatarflow_core::generation::{
    DEFAULT_POLL_INTERVAL, DEFAULT_POLL_MAX_ATTEMPTS, DEFAULT_POLL_MAX_TRANSIENT_ERRORS,
};
use avatarflow_prediction::{PredictionHandle, PredictionService, PredictionStatus};
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;

/// Tunable parameters for the poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between consecutive status checks.
    pub interval: Duration,
    /// Total status checks before giving up with `PollTimeout`.
    pub max_attempts: u32,
    /// Consecutive failed checks tolerated before giving up.
    pub max_transient_errors: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_POLL_MAX_ATTEMPTS,
            max_transient_errors: DEFAULT_POLL_MAX_TRANSIENT_ERRORS,
        }
    }
}

/// Terminal result of a prediction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Generated image URL.
    Succeeded(String),
    /// Upstream error text.
    Failed(String),
}

/// Poll `handle` until it reaches a terminal status.
///
/// Returns [`PipelineError::Cancelled`] when `cancel` fires,
/// [`PipelineError::PollTimeout`] when the attempt cap is reached, and
/// [`PipelineError::Poll`] once consecutive failures exceed the budget.
/// A `succeeded` status without output is [`PipelineError::MissingOutput`].
pub async fn poll_until_terminal(
    service: &dyn PredictionService,
    handle: &PredictionHandle,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<PollOutcome, PipelineError> {
    let mut consecutive_errors = 0u32;

    for attempt in 1..=policy.max_attempts {
        let checked = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            checked = service.poll(handle) => checked,
        };

        match checked {
            Ok(PredictionStatus::Succeeded { output: Some(url) }) => {
                return Ok(PollOutcome::Succeeded(url));
            }
            Ok(PredictionStatus::Succeeded { output: None }) => {
                return Err(PipelineError::MissingOutput);
            }
            Ok(PredictionStatus::Failed { error }) => return Ok(PollOutcome::Failed(error)),
            Ok(PredictionStatus::Running { status }) => {
                consecutive_errors = 0;
                tracing::debug!(
                    handle = %handle,
                    attempt,
                    status = %status,
                    "Prediction still running",
                );
            }
            Err(e) => {
                consecutive_errors += 1;
                if consecutive_errors > policy.max_transient_errors {
                    return Err(PipelineError::Poll(e));
                }
                tracing::warn!(
                    handle = %handle,
                    attempt,
                    error = %e,
                    "Status check failed ({consecutive_errors}/{})",
                    policy.max_transient_errors,
                );
            }
        }

        if attempt == policy.max_attempts {
            break;
        }

        // Wait before the next check, respecting cancellation.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            _ = tokio::time::sleep(policy.interval) => {}
        }
    }

    Err(PipelineError::PollTimeout {
        attempts: policy.max_attempts,
    })
}
