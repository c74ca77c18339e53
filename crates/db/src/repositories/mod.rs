//! Repository layer.
//!
//! Repositories wrap a shared [`DocumentStore`](crate::store::DocumentStore)
//! handle and expose typed operations for one collection each.

pub mod job_repo;

pub use job_repo::JobRepo;
