//! Avatarflow job event bus.
//!
//! - [`EventBus`] -- in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`JobEvent`] -- one notification about a job's lifecycle, published
//!   by the orchestrator at each transition.
//! - [`log_events`] -- subscriber that writes every event to the log.

pub mod bus;

pub use bus::{log_events, EventBus, JobEvent, JobEventKind};
