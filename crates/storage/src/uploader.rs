//! Source image uploader.
//!
//! Each upload goes to a new path from
//! [`storage_path`](avatarflow_core::naming::storage_path), so concurrent
//! uploads never overwrite each other. A locator is only returned once the
//! store reports a verified write of the whole payload.

use std::sync::Arc;
use std::time::Duration;

use avatarflow_core::naming::{extension_for_content_type, storage_path};

use crate::blob::{BlobError, BlobStore, TransferState};

/// Content type assumed when the caller gives none and sniffing fails.
const FALLBACK_CONTENT_TYPE: &str = "image/jpeg";

/// A successfully stored upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub locator: String,
    pub path: String,
    pub content_type: String,
    pub size: usize,
}

#[derive(Clone)]
pub struct BlobUploader {
    store: Arc<dyn BlobStore>,
    namespace: String,
    timeout: Duration,
}

impl BlobUploader {
    pub fn new(store: Arc<dyn BlobStore>, namespace: impl Into<String>, timeout: Duration) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            timeout,
        }
    }

    /// Write `payload` under `{namespace}/{path_hint}/` and return where it
    /// landed.
    ///
    /// When `content_type` is `None` the type is sniffed from the payload
    /// header.
    pub async fn upload(
        &self,
        payload: &[u8],
        content_type: Option<&str>,
        path_hint: &str,
    ) -> Result<StoredBlob, BlobError> {
        let content_type = content_type
            .map(str::to_string)
            .unwrap_or_else(|| sniff_content_type(payload).to_string());
        let path = storage_path(
            &self.namespace,
            path_hint,
            extension_for_content_type(&content_type),
        );

        tracing::debug!(
            path = %path,
            size = payload.len(),
            content_type = %content_type,
            "Uploading blob",
        );

        let receipt = tokio::time::timeout(
            self.timeout,
            self.store.put(&path, payload.to_vec(), &content_type),
        )
        .await
        .map_err(|_| BlobError::Timeout {
            path: path.clone(),
            timeout: self.timeout,
        })??;

        if receipt.state != TransferState::Success {
            return Err(BlobError::Transfer {
                state: receipt.state,
                path,
            });
        }
        if receipt.bytes_transferred != payload.len() {
            tracing::warn!(
                path = %path,
                expected = payload.len(),
                transferred = receipt.bytes_transferred,
                "Blob write reported a short transfer",
            );
            return Err(BlobError::Transfer {
                state: TransferState::Unverified,
                path,
            });
        }

        Ok(StoredBlob {
            locator: self.store.locator(&path),
            path,
            content_type,
            size: payload.len(),
        })
    }
}

/// MIME type guessed from the payload's magic bytes.
pub fn sniff_content_type(payload: &[u8]) -> &'static str {
    image::guess_format(payload)
        .map(|format| format.to_mime_type())
        .unwrap_or(FALLBACK_CONTENT_TYPE)
}
