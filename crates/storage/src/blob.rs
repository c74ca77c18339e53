use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

/// Completion state reported by a blob write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    /// The store confirmed the object is durable and retrievable.
    Success,
    /// The write finished but the store gave no confirmation.
    Unverified,
    Cancelled,
    Failed,
}

impl TransferState {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferState::Success => "success",
            TransferState::Unverified => "unverified",
            TransferState::Cancelled => "cancelled",
            TransferState::Failed => "failed",
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single `put`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub state: TransferState,
    pub bytes_transferred: usize,
}

impl TransferReceipt {
    pub fn success(bytes_transferred: usize) -> Self {
        Self {
            state: TransferState::Success,
            bytes_transferred,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// The write did not reach a verified success state. Nothing at `path`
    /// may be assumed retrievable.
    #[error("Blob transfer to {path} ended in state '{state}'")]
    Transfer { state: TransferState, path: String },

    #[error("Blob transfer to {path} timed out after {timeout:?}")]
    Timeout { path: String, timeout: Duration },

    #[error("Blob store error: {0}")]
    Backend(String),
}

/// Object storage addressed by path.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `bytes` at `path`. A returned receipt whose state is not
    /// [`TransferState::Success`] means the write must be treated as lost.
    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<TransferReceipt, BlobError>;

    /// Stable retrieval locator for an object written at `path`.
    fn locator(&self, path: &str) -> String;
}
