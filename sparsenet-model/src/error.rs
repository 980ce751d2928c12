//! Error types for sparse-code inference.

use thiserror::Error;

/// Result type alias for model operations.
pub type Result<T> = std::result::Result<T, SparseNetError>;

/// Errors raised while building a model or running inference.
#[derive(Debug, Error)]
pub enum SparseNetError {
    /// A hyperparameter is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Dictionary and expander were built for different problem sizes.
    #[error("shape mismatch in {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// An input batch does not have the shape the model was built for.
    #[error("batch shape mismatch: expected {expected:?}, got {actual:?}")]
    BatchShape {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// The relative-change criterion was not met within the iteration cap.
    #[error("ISTA did not converge after {iterations} iterations (relative change {relative_change})")]
    NonConvergence {
        iterations: usize,
        relative_change: f32,
    },

    /// Loss or codes became non-finite, usually because the step size is too large.
    #[error("non-finite values at ISTA iteration {iteration}")]
    NumericOverflow { iteration: usize },

    /// Parameter gradients were requested before any inference call.
    #[error("no codes available, run inference first")]
    MissingCodes,

    #[error("array layout error: {0}")]
    Layout(#[from] ndarray::ShapeError),
}
