//! Local input checks run before a submission leaves the process.

use avatarflow_core::generation::{PLACEHOLDER_IMAGE_SOURCE, PLACEHOLDER_SOURCE_MESSAGE};

use crate::error::PredictionError;
use crate::service::PredictionInput;

/// Reject inputs that must never reach the service.
///
/// - the placeholder source that stands in for "no image supplied";
/// - an empty image reference;
/// - inline payloads whose encoded length exceeds `max_inline_bytes`.
pub fn check_input(
    input: &PredictionInput,
    max_inline_bytes: usize,
) -> Result<(), PredictionError> {
    if input.image == PLACEHOLDER_IMAGE_SOURCE {
        return Err(PredictionError::InvalidInput(PLACEHOLDER_SOURCE_MESSAGE.into()));
    }
    if input.image.trim().is_empty() {
        return Err(PredictionError::InvalidInput("image reference is empty".into()));
    }
    if input.is_inline() && input.image.len() > max_inline_bytes {
        return Err(PredictionError::PayloadTooLarge {
            size: input.image.len(),
            limit: max_inline_bytes,
        });
    }
    Ok(())
}
