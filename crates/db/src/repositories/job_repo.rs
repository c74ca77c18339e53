//! Repository for the `avatarGenerations` collection.
//!
//! Every status change goes through [`JobRepo::transition`], which reads
//! the current record, checks the move against the lifecycle in
//! `avatarflow_core::status`, and verifies that the merged record carries
//! the fields the target status requires before anything is written.

use std::sync::Arc;

use avatarflow_core::error::CoreError;
use avatarflow_core::generation::COLLECTION_AVATAR_GENERATIONS;
use avatarflow_core::status::{validate_transition, JobStatus};
use avatarflow_core::types::DocId;
use tokio::sync::broadcast;

use crate::models::job::{Job, JobPatch, NewJob};
use crate::store::{DocumentStore, Fields, Query, StoreChange, StoreError};

/// Typed access to job records.
#[derive(Clone)]
pub struct JobRepo {
    store: Arc<dyn DocumentStore>,
}

impl JobRepo {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Insert a new job in `uploading` and return its id.
    pub async fn create(&self, input: NewJob) -> Result<DocId, StoreError> {
        self.store
            .create(COLLECTION_AVATAR_GENERATIONS, input.into_fields())
            .await
    }

    /// Fetch a job, or `None` when it does not exist.
    pub async fn find(&self, id: &str) -> Result<Option<Job>, StoreError> {
        self.store
            .get(COLLECTION_AVATAR_GENERATIONS, id)
            .await?
            .map(Job::from_document)
            .transpose()
    }

    /// Fetch a job that must exist.
    pub async fn get(&self, id: &str) -> Result<Job, StoreError> {
        self.find(id).await?.ok_or_else(|| StoreError::NotFound {
            collection: COLLECTION_AVATAR_GENERATIONS.to_string(),
            id: id.to_string(),
        })
    }

    /// Apply a patch that does not change status.
    pub async fn update(&self, id: &str, patch: &JobPatch) -> Result<(), StoreError> {
        if patch.status.is_some() {
            return Err(CoreError::Validation(
                "status changes must go through JobRepo::transition".into(),
            )
            .into());
        }
        patch.validate()?;
        self.store
            .update(COLLECTION_AVATAR_GENERATIONS, id, patch.to_fields())
            .await
    }

    /// Move a job to `patch.status`, writing the patch's other fields in
    /// the same update.
    ///
    /// Leaving `error` always clears `error` and `errorCode`. Returns the
    /// record as it looks after the write.
    pub async fn transition(&self, id: &str, patch: JobPatch) -> Result<Job, StoreError> {
        let Some(to) = patch.status else {
            return Err(CoreError::Validation("transition requires a target status".into()).into());
        };
        patch.validate()?;

        let current = self.get(id).await?;
        validate_transition(current.status, to)?;

        let mut patch = patch;
        if current.status == JobStatus::Error {
            patch.clear_error = true;
        }
        let fields = patch.to_fields();

        let mut merged = serde_json::to_value(&current)?
            .as_object()
            .cloned()
            .unwrap_or_default();
        merged.extend(fields.clone());
        check_required(to, &merged)?;

        self.store
            .update(COLLECTION_AVATAR_GENERATIONS, id, fields)
            .await?;

        let mut job: Job = serde_json::from_value(serde_json::Value::Object(merged))?;
        job.id = current.id;
        Ok(job)
    }

    /// Move a job to `error` with a code and a human-readable message.
    pub async fn mark_error(&self, id: &str, code: &str, message: &str) -> Result<Job, StoreError> {
        self.transition(id, JobPatch::failed(code, message)).await
    }

    /// Jobs newest first, optionally restricted to one status.
    pub async fn list(&self, status: Option<JobStatus>) -> Result<Vec<Job>, StoreError> {
        let mut query = Query::all();
        if let Some(status) = status {
            query = query.filter_eq("status", status.as_str());
        }
        self.store
            .query(COLLECTION_AVATAR_GENERATIONS, &query)
            .await?
            .into_iter()
            .map(Job::from_document)
            .collect()
    }

    /// Remove one job. Returns `false` when it was already gone.
    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.store.delete(COLLECTION_AVATAR_GENERATIONS, id).await
    }

    /// Remove every job as one visible step.
    pub async fn delete_all(&self) -> Result<usize, StoreError> {
        self.store.delete_all(COLLECTION_AVATAR_GENERATIONS).await
    }

    /// Raw change notifications; filter with
    /// [`StoreChange::affects`] and [`JobRepo::collection`].
    pub fn changes(&self) -> broadcast::Receiver<StoreChange> {
        self.store.changes()
    }

    pub fn collection(&self) -> &'static str {
        COLLECTION_AVATAR_GENERATIONS
    }
}

fn check_required(status: JobStatus, fields: &Fields) -> Result<(), CoreError> {
    for &field in status.required_fields() {
        if fields.get(field).map_or(true, serde_json::Value::is_null) {
            return Err(CoreError::MissingField { status, field });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::store::MemoryDocumentStore;

    fn repo() -> (JobRepo, Arc<MemoryDocumentStore>) {
        let store = Arc::new(MemoryDocumentStore::new());
        (JobRepo::new(store.clone()), store)
    }

    async fn pending_job(repo: &JobRepo) -> DocId {
        let id = repo.create(NewJob::default()).await.unwrap();
        repo.transition(&id, JobPatch::uploaded("https://blob/a.jpg", "uploads/u/1_a.jpg"))
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn create_starts_in_uploading() {
        let (repo, _) = repo();
        let id = repo.create(NewJob::default()).await.unwrap();
        let job = repo.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Uploading);
        assert_eq!(job.attempts, 0);
        assert!(job.original_locator.is_none());
    }

    #[tokio::test]
    async fn full_lifecycle() {
        let (repo, _) = repo();
        let id = pending_job(&repo).await;

        let job = repo.transition(&id, JobPatch::submitted("H1", 1)).await.unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.attempts, 1);

        let job = repo
            .transition(&id, JobPatch::completed("https://x/avatar.png"))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job, repo.get(&id).await.unwrap());
    }

    #[tokio::test]
    async fn pending_requires_original_locator() {
        let (repo, _) = repo();
        let id = repo.create(NewJob::default()).await.unwrap();
        let result = repo.transition(&id, JobPatch::status(JobStatus::Pending)).await;
        assert_matches!(
            result,
            Err(StoreError::Rejected(CoreError::MissingField {
                field: "originalImageUrl",
                ..
            }))
        );
        assert_eq!(repo.get(&id).await.unwrap().status, JobStatus::Uploading);
    }

    #[tokio::test]
    async fn skipping_states_is_rejected() {
        let (repo, _) = repo();
        let id = repo.create(NewJob::default()).await.unwrap();
        let result = repo.transition(&id, JobPatch::completed("https://x/a.png")).await;
        assert_matches!(
            result,
            Err(StoreError::Rejected(CoreError::InvalidTransition { .. }))
        );
    }

    #[tokio::test]
    async fn completed_cannot_be_reopened() {
        let (repo, _) = repo();
        let id = pending_job(&repo).await;
        repo.transition(&id, JobPatch::submitted("H1", 1)).await.unwrap();
        repo.transition(&id, JobPatch::completed("https://x/a.png"))
            .await
            .unwrap();

        let result = repo.transition(&id, JobPatch::retried()).await;
        assert_matches!(
            result,
            Err(StoreError::Rejected(CoreError::InvalidTransition { .. }))
        );
    }

    #[tokio::test]
    async fn leaving_error_clears_message() {
        let (repo, _) = repo();
        let id = pending_job(&repo).await;
        repo.mark_error(&id, "poll_failed", "boom").await.unwrap();

        let job = repo.get(&id).await.unwrap();
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert_eq!(job.error_code.as_deref(), Some("poll_failed"));

        let job = repo.transition(&id, JobPatch::status(JobStatus::Pending)).await.unwrap();
        assert!(job.error.is_none());
        assert!(job.error_code.is_none());
        assert_eq!(job.original_locator.as_deref(), Some("https://blob/a.jpg"));
    }

    #[tokio::test]
    async fn update_refuses_status_changes() {
        let (repo, _) = repo();
        let id = repo.create(NewJob::default()).await.unwrap();
        let result = repo.update(&id, &JobPatch::status(JobStatus::Pending)).await;
        assert_matches!(result, Err(StoreError::Rejected(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn failed_write_leaves_record_unchanged() {
        let (repo, store) = repo();
        let id = pending_job(&repo).await;
        store.fail_next_writes(1);

        let result = repo.transition(&id, JobPatch::submitted("H1", 1)).await;
        assert_matches!(result, Err(StoreError::Backend(_)));

        let job = repo.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
    }

    #[tokio::test]
    async fn list_filters_by_status_newest_first() {
        let (repo, _) = repo();
        let a = pending_job(&repo).await;
        let b = repo.create(NewJob::default()).await.unwrap();
        let c = pending_job(&repo).await;

        let all: Vec<_> = repo.list(None).await.unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(all, vec![c.clone(), b, a.clone()]);

        let pending: Vec<_> = repo
            .list(Some(JobStatus::Pending))
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(pending, vec![c, a]);
    }

    #[tokio::test]
    async fn missing_job_is_not_found() {
        let (repo, _) = repo();
        assert!(repo.find("nope").await.unwrap().is_none());
        assert_matches!(repo.get("nope").await, Err(StoreError::NotFound { .. }));
        assert!(!repo.delete("nope").await.unwrap());
    }
}
