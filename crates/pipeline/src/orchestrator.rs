//! Job orchestrator.
//!
//! Drives each job through the lifecycle, writing the record at every
//! transition:
//!
//! ```text
//! start_job:  uploading -> upload -> pending -> submit -> processing -> poll -> completed | error
//! resubmit:                        pending -> submit -> processing -> poll -> ...
//! retry:      error -------------> pending -> submit -> processing -> poll -> ...
//! resume:                                               processing -> poll -> ...
//! ```
//!
//! Each run is a detached task registered in the [`JobTracker`] under the
//! job id. The record is the only state shared with anything outside the
//! task; failures inside a run end up in the record's `error` fields and
//! are never returned to the caller that started the run.

use std::sync::Arc;

use avatarflow_core::data_uri;
use avatarflow_core::generation::{error_codes, InputRepresentation};
use avatarflow_core::naming::upload_id;
use avatarflow_core::status::JobStatus;
use avatarflow_core::types::DocId;
use avatarflow_db::models::job::{Job, JobPatch, NewJob};
use avatarflow_db::repositories::JobRepo;
use avatarflow_db::store::StoreError;
use avatarflow_events::{EventBus, JobEvent, JobEventKind};
use avatarflow_prediction::guard::check_input;
use avatarflow_prediction::{
    PredictionError, PredictionHandle, PredictionInput, PredictionService,
};
use avatarflow_storage::{BlobUploader, StoredBlob};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::poll::{poll_until_terminal, PollOutcome};
use crate::redrive::select_resume_candidates;
use crate::tracker::{JobTracker, Reservation, TaskCompletion};

/// A request to generate an avatar from one source image.
#[derive(Debug, Clone, Default)]
pub struct JobRequest {
    pub payload: Vec<u8>,
    /// Sniffed from the payload when `None`.
    pub content_type: Option<String>,
    /// Owner; the configured default owner when `None`.
    pub user_id: Option<String>,
    /// Overrides the configured prompt.
    pub prompt: Option<String>,
    pub platform: Option<String>,
}

/// What a submission step sends and how many attempts preceded it.
struct Submission {
    input: PredictionInput,
    prior_attempts: u32,
}

/// Drives avatar generation jobs. Created once and shared via `Arc`.
pub struct Orchestrator {
    repo: JobRepo,
    uploader: BlobUploader,
    prediction: Arc<dyn PredictionService>,
    events: Arc<EventBus>,
    config: PipelineConfig,
    tracker: JobTracker,
}

impl Orchestrator {
    pub fn new(
        repo: JobRepo,
        uploader: BlobUploader,
        prediction: Arc<dyn PredictionService>,
        events: Arc<EventBus>,
        config: PipelineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            repo,
            uploader,
            prediction,
            events,
            config,
            tracker: JobTracker::new(),
        })
    }

    pub fn repo(&self) -> &JobRepo {
        &self.repo
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Ids of jobs with a task running in this process.
    pub fn in_flight(&self) -> Vec<DocId> {
        self.tracker.tracked_ids()
    }

    pub fn is_in_flight(&self, id: &str) -> bool {
        self.tracker.is_tracked(id)
    }

    // ---- entry points ----

    /// Record a new job and drive it in the background.
    ///
    /// Returns once the `uploading` record exists. Only a failure to create
    /// that record is returned; everything later lands in the record.
    pub async fn start_job(self: &Arc<Self>, request: JobRequest) -> Result<DocId, PipelineError> {
        let (id, _) = self.launch(request).await?;
        Ok(id)
    }

    /// Same as [`start_job`](Self::start_job), but waits for the run to
    /// finish and returns the final record.
    pub async fn run_job(self: &Arc<Self>, request: JobRequest) -> Result<Job, PipelineError> {
        let (id, completion) = self.launch(request).await?;
        completion.wait().await;
        Ok(self.repo.get(&id).await?)
    }

    /// Resubmit a `pending` job from its stored locator.
    ///
    /// Returns `Ok(false)` without doing anything when the job is already
    /// being driven by this process or is no longer waiting for submission.
    pub async fn resubmit(self: &Arc<Self>, id: &str) -> Result<bool, PipelineError> {
        let Some(reservation) = self.tracker.reserve(id) else {
            tracing::debug!(job_id = %id, "Job already in flight, skipping resubmit");
            return Ok(false);
        };

        let Some(job) = self.repo.find(id).await? else {
            return Ok(false);
        };
        if !job.awaits_submission() {
            return Ok(false);
        }
        let submission = self.stored_submission(&job)?;

        tracing::info!(job_id = %id, attempts = job.attempts, "Re-driving pending job");
        self.spawn_submission(reservation, submission);
        Ok(true)
    }

    /// Move an `error` job back to `pending` and resubmit it from its
    /// stored locator.
    pub async fn retry(self: &Arc<Self>, id: &str) -> Result<(), PipelineError> {
        let reservation = self.tracker.reserve(id).ok_or_else(|| PipelineError::Precondition {
            job_id: id.to_string(),
            reason: "job is already running".into(),
        })?;

        let job = self.repo.get(id).await?;
        let submission = self.stored_submission(&job)?;
        let job = self.repo.transition(id, JobPatch::retried()).await?;
        self.publish(id, JobEventKind::Retried);

        tracing::info!(job_id = %id, attempts = job.attempts, "Retrying job");
        self.spawn_submission(reservation, submission);
        Ok(())
    }

    /// Continue polling a `processing` job from its stored prediction
    /// handle, without submitting again.
    ///
    /// Returns `Ok(false)` when the job is already being driven by this
    /// process or is not `processing`.
    pub async fn resume(self: &Arc<Self>, id: &str) -> Result<bool, PipelineError> {
        let Some(reservation) = self.tracker.reserve(id) else {
            tracing::debug!(job_id = %id, "Job already in flight, skipping resume");
            return Ok(false);
        };

        let Some(job) = self.repo.find(id).await? else {
            return Ok(false);
        };
        if job.status != JobStatus::Processing {
            return Ok(false);
        }
        let handle = job
            .external_job_handle
            .clone()
            .map(PredictionHandle)
            .ok_or_else(|| PipelineError::Precondition {
                job_id: id.to_string(),
                reason: "no prediction handle recorded".into(),
            })?;

        tracing::info!(job_id = %id, handle = %handle, attempts = job.attempts, "Resuming poll");
        let this = Arc::clone(self);
        let job_id = id.to_string();
        let span = tracing::info_span!("job", job_id = %id);
        reservation.spawn(move |cancel| {
            async move { this.poll_and_finish(&job_id, &handle, &cancel).await }.instrument(span)
        });
        Ok(true)
    }

    /// Resume every `processing` job this process is not driving, typically
    /// once at startup. Returns how many were resumed.
    pub async fn resume_interrupted(self: &Arc<Self>) -> Result<usize, PipelineError> {
        let jobs = self.repo.list(Some(JobStatus::Processing)).await?;
        let mut resumed = 0;
        for job in select_resume_candidates(&jobs) {
            match self.resume(&job.id).await {
                Ok(true) => resumed += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(job_id = %job.id, error = %e, "Resume failed"),
            }
        }
        Ok(resumed)
    }

    /// Delete the job's record, then stop its task.
    ///
    /// The task keeps running when the delete fails.
    pub async fn delete_job(&self, id: &str) -> Result<bool, PipelineError> {
        let removed = self.repo.delete(id).await?;
        self.tracker.cancel(id);
        if removed {
            self.publish(id, JobEventKind::Deleted);
        }
        Ok(removed)
    }

    /// Delete every job record, then stop the tasks of the deleted jobs.
    ///
    /// Tasks of jobs created after the listing stop on their next write.
    pub async fn delete_all(&self) -> Result<usize, PipelineError> {
        let ids: Vec<DocId> = self.repo.list(None).await?.into_iter().map(|job| job.id).collect();
        let removed = self.repo.delete_all().await?;
        let mut cancelled = 0;
        for id in ids {
            if self.tracker.cancel(&id) {
                cancelled += 1;
            }
            self.publish(&id, JobEventKind::Deleted);
        }
        tracing::info!(removed, cancelled, "Deleted all jobs");
        Ok(removed)
    }

    /// Stop the task driving `id` without touching the record.
    pub fn cancel_job(&self, id: &str) -> bool {
        self.tracker.cancel(id)
    }

    /// Cancel every task and wait for them to exit. Records of interrupted
    /// jobs keep their last written state.
    pub async fn shutdown(&self) {
        tracing::info!(in_flight = self.tracker.len(), "Shutting down orchestrator");
        self.tracker.shutdown(self.config.shutdown_timeout).await;
        tracing::info!("Orchestrator shut down complete");
    }

    // ---- task bodies ----

    async fn launch(
        self: &Arc<Self>,
        request: JobRequest,
    ) -> Result<(DocId, TaskCompletion), PipelineError> {
        let id = self
            .repo
            .create(NewJob {
                user_id: Some(
                    request
                        .user_id
                        .clone()
                        .unwrap_or_else(|| self.config.default_owner_id.clone()),
                ),
                prompt: Some(self.prompt_for(request.prompt.as_deref())),
                platform: request.platform.clone(),
                upload_id: Some(upload_id()),
            })
            .await?;
        self.publish(&id, JobEventKind::Created);
        tracing::info!(job_id = %id, size = request.payload.len(), "Job created");

        // A freshly created id cannot be tracked yet; `None` only after shutdown.
        let Some(reservation) = self.tracker.reserve(&id) else {
            return Err(PipelineError::Cancelled);
        };

        let this = Arc::clone(self);
        let job_id = id.clone();
        let span = tracing::info_span!("job", job_id = %id);
        let completion = reservation.spawn(move |cancel| {
            async move { this.drive_new_job(&job_id, request, cancel).await }.instrument(span)
        });
        Ok((id, completion))
    }

    fn spawn_submission(self: &Arc<Self>, reservation: Reservation, submission: Submission) {
        let this = Arc::clone(self);
        let job_id = reservation.job_id().to_string();
        let span = tracing::info_span!("job", job_id = %job_id);
        reservation.spawn(move |cancel| {
            async move { this.submit_and_poll(&job_id, submission, &cancel).await }.instrument(span)
        });
    }

    async fn drive_new_job(&self, id: &str, request: JobRequest, cancel: CancellationToken) {
        let owner = request
            .user_id
            .as_deref()
            .unwrap_or(&self.config.default_owner_id)
            .to_string();

        let uploaded = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            uploaded = self.uploader.upload(
                &request.payload,
                request.content_type.as_deref(),
                &owner,
            ) => uploaded,
        };
        let blob = match uploaded {
            Ok(blob) => blob,
            Err(e) => {
                tracing::warn!(error = %e, "Source image upload failed");
                self.fail(id, PipelineError::Transfer(e), None).await;
                return;
            }
        };

        if let Err(e) = self
            .repo
            .transition(id, JobPatch::uploaded(&blob.locator, &blob.path))
            .await
        {
            self.record_failed(id, e, JobPatch::default()).await;
            return;
        }
        self.publish(
            id,
            JobEventKind::Uploaded {
                locator: blob.locator.clone(),
            },
        );
        tracing::info!(path = %blob.path, "Source image stored");

        let input = match self.select_input(&request, &blob) {
            Ok(input) => input,
            Err(e) => {
                tracing::warn!(error = %e, "Submission rejected locally");
                self.fail(id, PipelineError::Submission(e), None).await;
                return;
            }
        };
        self.submit_and_poll(
            id,
            Submission {
                input,
                prior_attempts: 0,
            },
            &cancel,
        )
        .await;
    }

    /// Submit, record the handle, poll to a terminal state, record it.
    async fn submit_and_poll(&self, id: &str, submission: Submission, cancel: &CancellationToken) {
        let Submission {
            input,
            prior_attempts,
        } = submission;

        if let Err(e) = check_input(&input, self.config.max_inline_payload_bytes) {
            tracing::warn!(error = %e, "Submission rejected locally");
            self.fail(id, PipelineError::Submission(e), None).await;
            return;
        }

        let attempt = prior_attempts + 1;
        let submit_timeout = self.config.submit_timeout;
        let submitted = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            submitted = tokio::time::timeout(submit_timeout, self.prediction.submit(&input)) => {
                submitted.unwrap_or_else(|_| Err(PredictionError::Timeout(submit_timeout)))
            }
        };

        let handle = match submitted {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Submission failed");
                // A locally rejected input never left the process.
                let attempts = (!e.is_local()).then_some(attempt);
                self.fail(id, PipelineError::Submission(e), attempts).await;
                return;
            }
        };

        if let Err(e) = self
            .repo
            .transition(id, JobPatch::submitted(handle.as_str(), attempt))
            .await
        {
            // Upstream accepted it, so the attempt and handle still count.
            let accepted = JobPatch {
                external_job_handle: Some(handle.to_string()),
                attempts: Some(attempt),
                ..JobPatch::default()
            };
            self.record_failed(id, e, accepted).await;
            return;
        }
        self.publish(
            id,
            JobEventKind::Submitted {
                handle: handle.to_string(),
                attempt,
            },
        );
        tracing::info!(
            handle = %handle,
            attempt,
            inline = input.is_inline(),
            "Prediction submitted",
        );

        self.poll_and_finish(id, &handle, cancel).await;
    }

    /// Poll `handle` to a terminal state and record it.
    async fn poll_and_finish(
        &self,
        id: &str,
        handle: &PredictionHandle,
        cancel: &CancellationToken,
    ) {
        let outcome =
            poll_until_terminal(self.prediction.as_ref(), handle, &self.config.poll, cancel).await;
        match outcome {
            Ok(PollOutcome::Succeeded(url)) => {
                match self.repo.transition(id, JobPatch::completed(&url)).await {
                    Ok(_) => {
                        tracing::info!(handle = %handle, "Avatar generated");
                        self.publish(
                            id,
                            JobEventKind::Completed {
                                generated_locator: url,
                            },
                        );
                    }
                    Err(e) => self.record_failed(id, e, JobPatch::default()).await,
                }
            }
            Ok(PollOutcome::Failed(reason)) => {
                self.fail(id, PipelineError::PredictionFailed(reason), None).await;
            }
            Err(PipelineError::Cancelled) => {
                tracing::info!(handle = %handle, "Polling cancelled");
            }
            Err(e) => self.fail(id, e, None).await,
        }
    }

    // ---- private helpers ----

    /// Pick the single representation sent for a fresh upload.
    fn select_input(
        &self,
        request: &JobRequest,
        blob: &StoredBlob,
    ) -> Result<PredictionInput, PredictionError> {
        let prompt = self.prompt_for(request.prompt.as_deref());
        let ceiling = self.config.max_inline_payload_bytes;
        let inline_len = data_uri::encoded_len(&blob.content_type, request.payload.len());
        match self.config.submission_strategy.select(Some(inline_len), ceiling) {
            InputRepresentation::Inline => {
                inline_within(&blob.content_type, &request.payload, prompt, ceiling)
            }
            InputRepresentation::Locator => Ok(PredictionInput::locator(&blob.locator, prompt)),
        }
    }

    /// Submission from the record alone (re-drive and retry).
    fn stored_submission(&self, job: &Job) -> Result<Submission, PipelineError> {
        let locator = job
            .original_locator
            .clone()
            .ok_or_else(|| PipelineError::Precondition {
                job_id: job.id.clone(),
                reason: "Image unavailable".into(),
            })?;
        Ok(Submission {
            input: PredictionInput::locator(locator, self.prompt_for(job.prompt.as_deref())),
            prior_attempts: job.attempts,
        })
    }

    fn prompt_for(&self, requested: Option<&str>) -> String {
        requested
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(&self.config.prompt)
            .to_string()
    }

    /// Write `error` to the record. A failing write is logged only.
    async fn fail(&self, id: &str, error: PipelineError, attempts: Option<u32>) {
        let code = error.code();
        let message = error.job_message();
        let mut patch = JobPatch::failed(code, &message);
        if let Some(attempts) = attempts {
            patch = patch.with_attempts(attempts);
        }

        match self.repo.transition(id, patch).await {
            Ok(_) => {
                tracing::info!(code, message = %message, "Job failed");
                self.publish(
                    id,
                    JobEventKind::Failed {
                        code: code.to_string(),
                        message,
                    },
                );
            }
            Err(StoreError::NotFound { .. }) => {
                tracing::info!(code, "Job deleted before its failure could be recorded");
            }
            Err(e) => {
                tracing::error!(code, error = %e, "Failed to record job failure");
            }
        }
    }

    /// A lifecycle write failed: make one best-effort attempt to mark the
    /// job errored, then stop driving it. `carry` holds fields that must
    /// survive into the error record.
    async fn record_failed(&self, id: &str, error: StoreError, carry: JobPatch) {
        if let StoreError::NotFound { .. } = error {
            tracing::info!("Job deleted while running, stopping");
            return;
        }
        tracing::error!(error = %error, "Job record write failed");

        let message = PipelineError::Record(error).job_message();
        let patch = JobPatch {
            external_job_handle: carry.external_job_handle,
            attempts: carry.attempts,
            ..JobPatch::failed(error_codes::RECORD_WRITE_FAILED, &message)
        };
        match self.repo.transition(id, patch).await {
            Ok(_) => self.publish(
                id,
                JobEventKind::Failed {
                    code: error_codes::RECORD_WRITE_FAILED.to_string(),
                    message,
                },
            ),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "Could not mark job errored after a record write failure",
                );
            }
        }
    }

    fn publish(&self, id: &str, kind: JobEventKind) {
        self.events.publish(JobEvent::new(id, kind));
    }
}

/// Inline `data:` URI input, rejected before encoding when its encoded
/// length exceeds `ceiling`.
fn inline_within(
    content_type: &str,
    payload: &[u8],
    prompt: String,
    ceiling: usize,
) -> Result<PredictionInput, PredictionError> {
    let size = data_uri::encoded_len(content_type, payload.len());
    if size > ceiling {
        return Err(PredictionError::PayloadTooLarge {
            size,
            limit: ceiling,
        });
    }
    Ok(PredictionInput::inline(content_type, payload, prompt))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn inline_within_rejects_oversize_payloads_by_encoded_length() {
        let payload = vec![0u8; 7_600_000];
        let size = data_uri::encoded_len("image/png", payload.len());
        assert!(payload.len() < 10_000_000 && size > 10_000_000);

        let result = inline_within("image/png", &payload, "p".into(), 10_000_000);
        assert_matches!(
            result,
            Err(PredictionError::PayloadTooLarge { size: s, limit: 10_000_000 }) if s == size
        );
    }

    #[test]
    fn inline_within_encodes_payloads_at_the_ceiling() {
        let payload = b"tiny";
        let ceiling = data_uri::encoded_len("image/png", payload.len());

        let input = inline_within("image/png", payload, "p".into(), ceiling).unwrap();
        assert!(input.is_inline());
        assert_eq!(input.image.len(), ceiling);
    }
}
