//! Re-drive sweep.
//!
//! Watches the [`JobFeed`] and, on every snapshot, resubmits each job that
//! is `pending` without a generated image. Jobs this process is already
//! driving are skipped by the orchestrator's tracker. Tracked jobs whose
//! records disappeared are cancelled.
//!
//! `processing` jobs are never resubmitted here; an interrupted poll is
//! picked up by [`Orchestrator::resume`] instead.

use std::collections::HashSet;
use std::sync::Arc;

use avatarflow_core::status::JobStatus;
use avatarflow_db::models::job::Job;
use tokio_util::sync::CancellationToken;

use crate::feed::JobFeed;
use crate::orchestrator::Orchestrator;

/// Jobs in a snapshot that the sweep should resubmit.
pub fn select_redrive_candidates(jobs: &[Job]) -> Vec<&Job> {
    jobs.iter().filter(|job| job.awaits_submission()).collect()
}

/// Jobs whose poll can be resumed from a recorded prediction handle.
pub fn select_resume_candidates(jobs: &[Job]) -> Vec<&Job> {
    jobs.iter()
        .filter(|job| job.status == JobStatus::Processing && job.external_job_handle.is_some())
        .collect()
}

pub struct ReDriveSweep {
    orchestrator: Arc<Orchestrator>,
    feed: JobFeed,
}

impl ReDriveSweep {
    pub fn new(orchestrator: Arc<Orchestrator>, feed: JobFeed) -> Self {
        Self { orchestrator, feed }
    }

    /// Run until `cancel` fires or the feed ends.
    pub async fn run(self, cancel: CancellationToken) {
        let mut subscription = self.feed.subscribe();
        tracing::info!("Re-drive sweep started");

        loop {
            let snapshot = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                snapshot = subscription.next() => snapshot,
            };

            match snapshot {
                Some(Ok(jobs)) => {
                    let resubmitted = self.handle_snapshot(&jobs).await;
                    if resubmitted > 0 {
                        tracing::info!(resubmitted, total = jobs.len(), "Re-drove pending jobs");
                    }
                }
                Some(Err(e)) => tracing::warn!(error = %e, "Failed to read job snapshot"),
                None => {
                    tracing::warn!("Job feed closed");
                    break;
                }
            }
        }

        tracing::info!("Re-drive sweep stopped");
    }

    /// Process one snapshot. Returns how many jobs were resubmitted.
    pub async fn handle_snapshot(&self, jobs: &[Job]) -> usize {
        self.cancel_vanished(jobs).await;

        let mut resubmitted = 0;
        for job in select_redrive_candidates(jobs) {
            match self.orchestrator.resubmit(&job.id).await {
                Ok(true) => resubmitted += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(job_id = %job.id, error = %e, "Re-drive failed"),
            }
        }
        resubmitted
    }

    /// Cancel tracked tasks whose records are gone.
    async fn cancel_vanished(&self, jobs: &[Job]) {
        let present: HashSet<&str> = jobs.iter().map(|job| job.id.as_str()).collect();
        for id in self.orchestrator.in_flight() {
            if present.contains(id.as_str()) {
                continue;
            }
            // The snapshot may predate the job's creation.
            match self.orchestrator.repo().find(&id).await {
                Ok(None) => {
                    if self.orchestrator.cancel_job(&id) {
                        tracing::info!(job_id = %id, "Record deleted, cancelled its task");
                    }
                }
                Ok(Some(_)) => {}
                Err(e) => tracing::warn!(job_id = %id, error = %e, "Could not check tracked job"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use avatarflow_core::types::Timestamp;

    use super::*;

    fn job(id: &str, status: JobStatus, generated: Option<&str>) -> Job {
        Job {
            id: id.into(),
            status,
            created_at: epoch(),
            user_id: None,
            prompt: None,
            platform: None,
            upload_id: None,
            original_locator: Some("memory://a.jpg".into()),
            original_storage_path: Some("uploads/u/a.jpg".into()),
            generated_locator: generated.map(str::to_string),
            external_job_handle: None,
            error: None,
            error_code: None,
            attempts: 0,
        }
    }

    fn epoch() -> Timestamp {
        Timestamp::default()
    }

    #[test]
    fn only_pending_jobs_without_output_are_candidates() {
        let jobs = vec![
            job("uploading", JobStatus::Uploading, None),
            job("pending", JobStatus::Pending, None),
            job("processing", JobStatus::Processing, None),
            job("completed", JobStatus::Completed, Some("https://x/a.png")),
            job("error", JobStatus::Error, None),
            job("pending-with-output", JobStatus::Pending, Some("https://x/b.png")),
        ];

        let ids: Vec<&str> = select_redrive_candidates(&jobs)
            .into_iter()
            .map(|job| job.id.as_str())
            .collect();
        assert_eq!(ids, ["pending"]);
    }

    #[test]
    fn only_processing_jobs_with_a_handle_are_resumable() {
        let mut submitted = job("submitted", JobStatus::Processing, None);
        submitted.external_job_handle = Some("H1".into());
        let jobs = vec![
            job("pending", JobStatus::Pending, None),
            submitted,
            job("no-handle", JobStatus::Processing, None),
            job("completed", JobStatus::Completed, Some("https://x/a.png")),
        ];

        let ids: Vec<&str> = select_resume_candidates(&jobs)
            .into_iter()
            .map(|job| job.id.as_str())
            .collect();
        assert_eq!(ids, ["submitted"]);
    }
}
