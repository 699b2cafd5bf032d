use std::path::PathBuf;
use thiserror::Error;

/// Failures callers are expected to tell apart.
///
/// Everything else travels as a plain `anyhow::Error`; these variants are
/// attached to it and can be recovered with `downcast_ref::<EvalError>()`.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("video file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("unsupported video format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("ensemble member {member} has no dropout-enabled variant")]
    MissingDropoutModel { member: usize },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("ensemble has no models")]
    EmptyEnsemble,
}

impl EvalError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        EvalError::Configuration(msg.into())
    }
}
