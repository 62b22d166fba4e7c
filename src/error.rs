use thiserror::Error;

use crate::my_types::ImageShape;

/// Failures that end a session. Per-point tracking failures never show up here,
/// they are status flags filtered inside the tracker.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("feature detector found no points on frame {frame} after a reseed")]
    DetectorEmpty { frame: u64 },

    #[error("{stage}: expected {expected:?} frames, got {actual:?}")]
    DimensionMismatch {
        stage: &'static str,
        expected: ImageShape,
        actual: ImageShape,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Fail fast when two images that must line up do not.
pub fn ensure_same_shape(
    stage: &'static str,
    expected: ImageShape,
    actual: ImageShape,
) -> Result<(), SessionError> {
    if expected != actual {
        return Err(SessionError::DimensionMismatch {
            stage,
            expected,
            actual,
        });
    }
    Ok(())
}
