//! Error types for fmha

use thiserror::Error;

/// Result type alias using fmha's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Hard failures raised while dispatching an attention operator.
///
/// Soft rejections (an operator that cannot handle a request) are not errors:
/// they are reported as reason strings by
/// [`AttentionFwOp::not_supported_reasons`](crate::op::AttentionFwOp::not_supported_reasons).
#[derive(Error, Debug)]
pub enum Error {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    #[error("Dtype mismatch: expected {expected}, got {got}")]
    DtypeMismatch { expected: String, got: String },

    #[error("Device mismatch: expected {expected}, got {got}")]
    DeviceMismatch { expected: String, got: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported attention bias: {0}")]
    UnsupportedBias(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Kernel error: {0}")]
    Kernel(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}
