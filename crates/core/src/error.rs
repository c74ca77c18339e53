use crate::status::JobStatus;
use crate::types::DocId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DocId },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Status '{status}' requires field '{field}' to be set")]
    MissingField {
        status: JobStatus,
        field: &'static str,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}
