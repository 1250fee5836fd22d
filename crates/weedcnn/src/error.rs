//! Error taxonomy for tensors, kernels, and the network.
//!
//! Shape and argument failures are programming or configuration defects: they are reported
//! immediately and never retried. Numeric overflow is not an error; kernels saturate instead.

use thiserror::Error;

/// Failures raised by tensor construction, views, element access, and the numeric kernels.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TensorError {
    #[error("invalid tensor shape {dims:?}: {reason}")]
    InvalidShape { dims: Vec<usize>, reason: String },
    #[error("rank mismatch: expected {expected}, got {actual}")]
    RankMismatch { expected: usize, actual: usize },
    #[error("shape mismatch: {expected:?} vs {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("index {index} out of bounds for extent {extent}")]
    OutOfBounds { index: usize, extent: usize },
    #[error("tensor has no bias to slice")]
    MissingBias,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("tensor buffer is already borrowed through an overlapping alias")]
    BufferBusy,
    #[error("tensor buffer lock poisoned")]
    Poisoned,
}

impl TensorError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        TensorError::InvalidArgument(message.into())
    }

    pub(crate) fn invalid_shape(dims: &[usize], reason: impl Into<String>) -> Self {
        TensorError::InvalidShape {
            dims: dims.to_vec(),
            reason: reason.into(),
        }
    }

    pub(crate) fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        TensorError::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}

/// Convenience alias for tensor and kernel routines.
pub type TensorResult<T> = Result<T, TensorError>;

/// Failures raised while building or running a [`crate::model::Cnn`].
#[derive(Debug, Error)]
pub enum CnnError {
    /// Bad topology or parameters that do not fit it. Fatal.
    #[error("configuration error: {0}")]
    Config(String),
    /// Shape or argument failure inside a tensor routine.
    #[error(transparent)]
    Tensor(#[from] TensorError),
    /// The parameter source could not produce its datasets.
    #[error("failed to load network parameters")]
    Params(#[source] anyhow::Error),
}

impl CnnError {
    pub fn config(message: impl Into<String>) -> Self {
        CnnError::Config(message.into())
    }
}

pub type CnnResult<T> = Result<T, CnnError>;
