//! Avatar generation job record and its partial-update patch.
//!
//! Serialized field names match the `avatarGenerations` document shape
//! (`originalImageUrl`, `predictionId`, ...), so records written by other
//! clients of the collection deserialize unchanged.

use avatarflow_core::error::CoreError;
use avatarflow_core::status::JobStatus;
use avatarflow_core::types::{DocId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::{Document, Fields, StoreError};

/// One avatar generation job as persisted in the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Store-assigned document id. Not part of the document body.
    #[serde(skip)]
    pub id: DocId,
    pub status: JobStatus,
    pub created_at: Timestamp,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub upload_id: Option<String>,
    #[serde(rename = "originalImageUrl", default)]
    pub original_locator: Option<String>,
    #[serde(rename = "originalImageStoragePath", default)]
    pub original_storage_path: Option<String>,
    #[serde(rename = "generatedImageUrl", default)]
    pub generated_locator: Option<String>,
    #[serde(rename = "predictionId", default)]
    pub external_job_handle: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub attempts: u32,
}

impl Job {
    /// Map a stored document onto the model.
    pub fn from_document(doc: Document) -> Result<Self, StoreError> {
        let mut job: Job = serde_json::from_value(Value::Object(doc.fields))?;
        job.id = doc.id;
        Ok(job)
    }

    /// Whether the re-drive sweep should resubmit this job.
    pub fn awaits_submission(&self) -> bool {
        self.status == JobStatus::Pending && self.generated_locator.is_none()
    }
}

/// Fields supplied by the caller when a job is first recorded.
#[derive(Debug, Clone, Default)]
pub struct NewJob {
    pub user_id: Option<String>,
    pub prompt: Option<String>,
    pub platform: Option<String>,
    pub upload_id: Option<String>,
}

impl NewJob {
    /// Initial document body: `uploading`, zero attempts, every locator
    /// explicitly null.
    pub fn into_fields(self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("status".into(), Value::from(JobStatus::Uploading.as_str()));
        fields.insert("userId".into(), opt(self.user_id));
        fields.insert("prompt".into(), opt(self.prompt));
        fields.insert("platform".into(), opt(self.platform));
        fields.insert("uploadId".into(), opt(self.upload_id));
        for key in [
            "originalImageUrl",
            "originalImageStoragePath",
            "generatedImageUrl",
            "predictionId",
            "error",
            "errorCode",
        ] {
            fields.insert(key.into(), Value::Null);
        }
        fields.insert("attempts".into(), Value::from(0u32));
        fields
    }
}

/// A partial update. Only fields set here are written; everything else in
/// the record keeps its value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub original_locator: Option<String>,
    pub original_storage_path: Option<String>,
    pub generated_locator: Option<String>,
    pub external_job_handle: Option<String>,
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub attempts: Option<u32>,
    /// Write `null` to `error` and `errorCode`.
    pub clear_error: bool,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// `uploading -> pending` once the source image is stored.
    pub fn uploaded(locator: impl Into<String>, storage_path: impl Into<String>) -> Self {
        Self {
            original_locator: Some(locator.into()),
            original_storage_path: Some(storage_path.into()),
            ..Self::status(JobStatus::Pending)
        }
    }

    /// `pending -> processing` once upstream accepted the submission.
    pub fn submitted(handle: impl Into<String>, attempts: u32) -> Self {
        Self {
            external_job_handle: Some(handle.into()),
            attempts: Some(attempts),
            ..Self::status(JobStatus::Processing)
        }
    }

    /// `processing -> completed`.
    pub fn completed(generated_locator: impl Into<String>) -> Self {
        Self {
            generated_locator: Some(generated_locator.into()),
            ..Self::status(JobStatus::Completed)
        }
    }

    /// Any state `-> error`.
    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            error_code: Some(code.into()),
            ..Self::status(JobStatus::Error)
        }
    }

    /// `error -> pending` on an explicit retry.
    pub fn retried() -> Self {
        Self {
            clear_error: true,
            ..Self::status(JobStatus::Pending)
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// Reject patches that would break the record invariants regardless of
    /// the record's current state.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.generated_locator.is_some() && self.status != Some(JobStatus::Completed) {
            return Err(CoreError::Validation(
                "generatedImageUrl may only be written together with status 'completed'".into(),
            ));
        }
        if (self.error.is_some() || self.error_code.is_some())
            && self.status != Some(JobStatus::Error)
        {
            return Err(CoreError::Validation(
                "error fields may only be written together with status 'error'".into(),
            ));
        }
        if self.clear_error && (self.error.is_some() || self.error_code.is_some()) {
            return Err(CoreError::Validation(
                "a patch cannot both set and clear the error fields".into(),
            ));
        }
        Ok(())
    }

    /// Document fields written by this patch.
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        if let Some(status) = self.status {
            fields.insert("status".into(), Value::from(status.as_str()));
        }
        set(&mut fields, "originalImageUrl", &self.original_locator);
        set(&mut fields, "originalImageStoragePath", &self.original_storage_path);
        set(&mut fields, "generatedImageUrl", &self.generated_locator);
        set(&mut fields, "predictionId", &self.external_job_handle);
        set(&mut fields, "error", &self.error);
        set(&mut fields, "errorCode", &self.error_code);
        if let Some(attempts) = self.attempts {
            fields.insert("attempts".into(), Value::from(attempts));
        }
        if self.clear_error {
            fields.insert("error".into(), Value::Null);
            fields.insert("errorCode".into(), Value::Null);
        }
        fields
    }
}

fn opt(value: Option<String>) -> Value {
    value.map_or(Value::Null, Value::String)
}

fn set(fields: &mut Fields, key: &str, value: &Option<String>) {
    if let Some(v) = value {
        fields.insert(key.into(), Value::String(v.clone()));
    }
}
