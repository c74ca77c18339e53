//! Job lifecycle status and the transition rules between states.
//!
//! ```text
//! uploading -> pending -> processing -> completed
//!     |           |           |
//!     +-----------+-----------+------> error -> pending (explicit retry)
//! ```
//!
//! Field names returned by [`JobStatus::required_fields`] are the
//! serialized names used in the `avatarGenerations` collection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Lifecycle state of a single avatar generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Record exists, source image is being written to the blob store.
    Uploading,
    /// Source image stored; waiting for (re)submission upstream.
    Pending,
    /// Submitted upstream; the poll loop owns the job.
    Processing,
    /// Generated image available.
    Completed,
    /// Terminal failure; may be retried back into `Pending`.
    Error,
}

impl JobStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Uploading,
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Error,
    ];

    /// Wire / storage representation.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Uploading => "uploading",
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }

    /// `completed` and `error` end a run. Only `error` can be left, and only
    /// through an explicit retry.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }

    /// Whether a record in `self` may move to `next`.
    ///
    /// Self-transitions are not transitions and are rejected; callers that
    /// only touch non-status fields should not name a status at all.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Uploading, Pending)
                | (Uploading, Error)
                | (Pending, Processing)
                | (Pending, Error)
                | (Processing, Completed)
                | (Processing, Error)
                | (Error, Pending)
        )
    }

    /// Record fields that must be non-null once a record is in this status.
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            JobStatus::Uploading => &[],
            JobStatus::Pending => &["originalImageUrl", "originalImageStoragePath"],
            JobStatus::Processing => &[
                "originalImageUrl",
                "originalImageStoragePath",
                "predictionId",
            ],
            JobStatus::Completed => &["generatedImageUrl"],
            JobStatus::Error => &["error"],
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown job status '{s}'")))
    }
}

/// Reject a transition that the lifecycle does not allow.
pub fn validate_transition(from: JobStatus, to: JobStatus) -> Result<(), CoreError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition { from, to })
    }
}
