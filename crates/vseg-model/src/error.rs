//! Error types for model construction and forward passes.

use thiserror::Error;

/// Main error type for model operations.
///
/// Shape problems are construction bugs or bad input data; there is no
/// recovery path, callers propagate them until the run terminates.
#[derive(Error, Debug)]
pub enum ModelError {
    /// Shape mismatch between two tensors that must agree.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Crop margin that cannot be centered (negative or odd).
    #[error("Crop margin on spatial axis {axis} is {margin}; must be non-negative and even")]
    UncenteredCrop { axis: usize, margin: i64 },

    /// Pooling window does not divide the spatial dimensions.
    #[error("Spatial dims {dims:?} are not divisible by pooling window {window}")]
    PoolWindowMismatch { dims: [usize; 3], window: usize },
}

/// Result type for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ModelError::UncenteredCrop { axis: 2, margin: 3 };
        assert!(err.to_string().contains("axis 2"));

        let err = ModelError::ShapeMismatch {
            expected: vec![1, 1, 8, 8, 8],
            actual: vec![1, 1, 8, 8, 4],
        };
        assert!(err.to_string().contains("expected"));
    }
}
