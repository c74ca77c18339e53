//! S3 blob store.
//!
//! Objects are written with `PutObject`. A write only counts as verified
//! when S3 acknowledges it with an ETag.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;

use crate::blob::{BlobError, BlobStore, TransferReceipt, TransferState};

/// Blob store backed by one S3 bucket.
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
    /// Public URL prefix for the bucket (e.g. a CDN). Locators fall back to
    /// `s3://{bucket}/{path}` when unset.
    public_base_url: Option<String>,
}

impl S3BlobStore {
    pub fn new(
        client: S3Client,
        bucket: impl Into<String>,
        public_base_url: Option<String>,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            public_base_url: public_base_url.map(|url| url.trim_end_matches('/').to_string()),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<TransferReceipt, BlobError> {
        let len = bytes.len();
        let output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| {
                BlobError::Backend(format!(
                    "Failed to write s3://{}/{path}: {e}",
                    self.bucket
                ))
            })?;

        let state = if output.e_tag().is_some() {
            TransferState::Success
        } else {
            TransferState::Unverified
        };
        Ok(TransferReceipt {
            state,
            bytes_transferred: len,
        })
    }

    fn locator(&self, path: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{base}/{path}"),
            None => format!("s3://{}/{path}", self.bucket),
        }
    }
}
