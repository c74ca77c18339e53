//! Avatar generation pipeline.
//!
//! - [`Orchestrator`] -- drives each job through
//!   `uploading -> pending -> processing -> completed | error`, one tracked
//!   task per job.
//! - [`poll`] -- the fixed-interval status loop with an attempt cap.
//! - [`JobFeed`] -- live full snapshots of every job, newest first.
//! - [`ReDriveSweep`] -- resubmits jobs left in `pending`; interrupted
//!   polls are resumed with [`Orchestrator::resume_interrupted`].
//! - [`PipelineConfig`] -- environment-driven settings.

pub mod config;
pub mod error;
pub mod feed;
pub mod orchestrator;
pub mod poll;
pub mod redrive;
pub mod tracker;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use feed::{FeedSubscription, JobFeed};
pub use orchestrator::{JobRequest, Orchestrator};
pub use poll::PollPolicy;
pub use redrive::{select_redrive_candidates, select_resume_candidates, ReDriveSweep};
pub use tracker::JobTracker;
