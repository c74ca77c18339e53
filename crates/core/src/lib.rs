//! Shared domain types for the avatar generation pipeline.
//!
//! Pure types, constants, and validation with no I/O: identifiers, the
//! job status state machine, storage path naming, and inline payload
//! encoding. Every other crate in the workspace depends on this one.

pub mod data_uri;
pub mod error;
pub mod generation;
pub mod naming;
pub mod status;
pub mod types;
