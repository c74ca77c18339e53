//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc<EventBus>` between the orchestrator,
//! which publishes, and whatever surfaces notifications to users.

use avatarflow_core::types::{DocId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// What happened to a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEventKind {
    /// Record created in `uploading`.
    Created,
    /// Source image stored; job is `pending`.
    Uploaded { locator: String },
    /// Accepted upstream; job is `processing`.
    Submitted { handle: String, attempt: u32 },
    Completed { generated_locator: String },
    /// Job moved to `error`. This is the single user-visible failure
    /// notification for a run.
    Failed { code: String, message: String },
    /// Explicit retry moved the job from `error` back to `pending`.
    Retried,
    Deleted,
}

impl JobEventKind {
    /// Dot-separated event name, e.g. `"job.submitted"`.
    pub fn event_type(&self) -> &'static str {
        match self {
            JobEventKind::Created => "job.created",
            JobEventKind::Uploaded { .. } => "job.uploaded",
            JobEventKind::Submitted { .. } => "job.submitted",
            JobEventKind::Completed { .. } => "job.completed",
            JobEventKind::Failed { .. } => "job.failed",
            JobEventKind::Retried => "job.retried",
            JobEventKind::Deleted => "job.deleted",
        }
    }
}

/// A job lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: DocId,
    pub kind: JobEventKind,
    pub timestamp: Timestamp,
}

impl JobEvent {
    pub fn new(job_id: impl Into<DocId>, kind: JobEventKind) -> Self {
        Self {
            job_id: job_id.into(),
            kind,
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use avatarflow_events::bus::{EventBus, JobEvent, JobEventKind};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(JobEvent::new("job-1", JobEventKind::Created));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// Slow receivers observe `RecvError::Lagged` once the buffer is full.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers. Dropped when nobody
    /// is listening.
    pub fn publish(&self, event: JobEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Log every event from `rx` until the bus is dropped.
pub async fn log_events(mut rx: broadcast::Receiver<JobEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match &event.kind {
                JobEventKind::Failed { code, message } => tracing::warn!(
                    job_id = %event.job_id,
                    code = %code,
                    message = %message,
                    "{}",
                    event.kind.event_type(),
                ),
                kind => tracing::info!(job_id = %event.job_id, "{}", kind.event_type()),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event logger lagged behind the bus");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(JobEvent::new(
            "job-1",
            JobEventKind::Submitted {
                handle: "H1".into(),
                attempt: 1,
            },
        ));

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.job_id, "job-1");
        assert_eq!(received.kind.event_type(), "job.submitted");
        assert_eq!(
            received.kind,
            JobEventKind::Submitted {
                handle: "H1".into(),
                attempt: 1
            }
        );
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(JobEvent::new("job-1", JobEventKind::Deleted));

        assert_eq!(rx1.recv().await.unwrap().kind, JobEventKind::Deleted);
        assert_eq!(rx2.recv().await.unwrap().kind, JobEventKind::Deleted);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(JobEvent::new("orphan", JobEventKind::Created));
    }

    #[test]
    fn kind_serializes_with_type_tag() {
        let json = serde_json::to_value(JobEventKind::Failed {
            code: "payload_too_large".into(),
            message: "Image too large for processing".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "failed");
        assert_eq!(json["code"], "payload_too_large");
    }

    #[tokio::test]
    async fn logger_stops_when_bus_is_dropped() {
        let bus = EventBus::default();
        let rx = bus.subscribe();
        bus.publish(JobEvent::new("job-1", JobEventKind::Retried));
        drop(bus);

        log_events(rx).await;
    }
}
