use crate::graph::{FunctionId, TensorId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TideError {
    #[error("Shape mismatch in {context}: expected {expected} elements, got {actual}")]
    ShapeMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    #[error("Function `{function}` expects {expected}, got {actual}")]
    Arity {
        function: String,
        expected: String,
        actual: usize,
    },

    #[error("Backward on `{function}` has no matching pending forward invocation")]
    StaleBackward { function: String },

    #[error("Backward called on a tensor whose gradient was never seeded")]
    UnseededGradient,

    #[error("Unknown tensor {0:?} (released or from another graph)")]
    UnknownTensor(TensorId),

    #[error("Unknown function {0:?}")]
    UnknownFunction(FunctionId),

    #[error("Unknown block or value name `{0}`")]
    UnknownBlock(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),
}

impl TideError {
    pub(crate) fn shape(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        TideError::ShapeMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }
}

pub type Result<T> = std::result::Result<T, TideError>;
