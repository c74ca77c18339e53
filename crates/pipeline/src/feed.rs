//! Live job feed.
//!
//! Every emission is the full list of jobs, newest first. Consumers replace
//! whatever they held before; nothing is a delta.

use avatarflow_db::models::job::Job;
use avatarflow_db::repositories::JobRepo;
use avatarflow_db::store::{StoreChange, StoreError};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::broadcast::Receiver;

#[derive(Clone)]
pub struct JobFeed {
    repo: JobRepo,
}

impl JobFeed {
    pub fn new(repo: JobRepo) -> Self {
        Self { repo }
    }

    /// Start a subscription. Its first [`next`](FeedSubscription::next)
    /// yields the current snapshot immediately.
    pub fn subscribe(&self) -> FeedSubscription {
        // Subscribe before the first read so no change can slip between them.
        FeedSubscription {
            changes: self.repo.changes(),
            repo: self.repo.clone(),
            primed: false,
        }
    }
}

pub struct FeedSubscription {
    repo: JobRepo,
    changes: Receiver<StoreChange>,
    primed: bool,
}

impl FeedSubscription {
    /// Wait for the next snapshot.
    ///
    /// Changes that queued up while the caller was busy are folded into a
    /// single re-read. A lagged receiver counts as a change. Returns `None`
    /// once the store stops publishing changes.
    pub async fn next(&mut self) -> Option<Result<Vec<Job>, StoreError>> {
        if !self.primed {
            self.primed = true;
            return Some(self.repo.list(None).await);
        }

        let collection = self.repo.collection();
        loop {
            match self.changes.recv().await {
                Ok(change) if change.affects(collection) => break,
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Job feed lagged, re-reading");
                    break;
                }
                Err(RecvError::Closed) => return None,
            }
        }

        loop {
            match self.changes.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        Some(self.repo.list(None).await)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use avatarflow_core::status::JobStatus;
    use avatarflow_db::models::job::{JobPatch, NewJob};
    use avatarflow_db::store::MemoryDocumentStore;

    use super::*;

    fn feed() -> (JobRepo, JobFeed) {
        let repo = JobRepo::new(Arc::new(MemoryDocumentStore::new()));
        (repo.clone(), JobFeed::new(repo))
    }

    #[tokio::test]
    async fn first_emission_is_the_current_snapshot() {
        let (repo, feed) = feed();
        repo.create(NewJob::default()).await.unwrap();

        let mut sub = feed.subscribe();
        let jobs = sub.next().await.unwrap().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Uploading);
    }

    #[tokio::test]
    async fn changes_produce_full_snapshots_newest_first() {
        let (repo, feed) = feed();
        let mut sub = feed.subscribe();
        assert!(sub.next().await.unwrap().unwrap().is_empty());

        let first = repo.create(NewJob::default()).await.unwrap();
        let second = repo.create(NewJob::default()).await.unwrap();

        // Both creates are folded into one re-read.
        let jobs = sub.next().await.unwrap().unwrap();
        let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, [second.as_str(), first.as_str()]);
    }

    #[tokio::test]
    async fn updates_are_reflected() {
        let (repo, feed) = feed();
        let id = repo.create(NewJob::default()).await.unwrap();
        let mut sub = feed.subscribe();
        sub.next().await.unwrap().unwrap();

        repo.transition(&id, JobPatch::uploaded("memory://a.jpg", "uploads/u/a.jpg"))
            .await
            .unwrap();
        let jobs = sub.next().await.unwrap().unwrap();
        assert_eq!(jobs[0].status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn bulk_delete_yields_empty_snapshot() {
        let (repo, feed) = feed();
        for _ in 0..3 {
            repo.create(NewJob::default()).await.unwrap();
        }
        let mut sub = feed.subscribe();
        assert_eq!(sub.next().await.unwrap().unwrap().len(), 3);

        assert_eq!(repo.delete_all().await.unwrap(), 3);
        assert!(sub.next().await.unwrap().unwrap().is_empty());
    }
}
