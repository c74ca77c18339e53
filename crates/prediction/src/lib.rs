//! Client for the external image prediction service.
//!
//! - [`PredictionService`] -- the submit/poll seam the orchestrator drives.
//! - [`PredictionApi`] -- HTTP implementation (`POST /predictions`,
//!   `GET /predictions/{id}`, bearer token auth).
//! - [`guard`] -- local input checks that run before anything is sent.

pub mod api;
pub mod error;
pub mod guard;
pub mod messages;
pub mod service;

pub use api::PredictionApi;
pub use error::PredictionError;
pub use service::{PredictionHandle, PredictionInput, PredictionService, PredictionStatus};
