//! Error types for llama3-gguf

use thiserror::Error;

/// Result type alias for llama3-gguf operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading or running a model
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed GGUF container (bad magic, unknown tag, truncation)
    #[error("GGUF format error: {0}")]
    Format(String),

    /// The file parsed but is not a model this engine accepts
    #[error("Validation error: {0}")]
    Validation(String),

    /// JSON serialization error (CLI output)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Tensor shape mismatch
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// Tensor storage type that cannot be loaded into a compute buffer
    #[error("Unsupported dtype {dtype} for tensor {tensor}")]
    UnsupportedDType { tensor: String, dtype: String },

    /// Tensor not found in the directory
    #[error("Tensor not found: {0}")]
    TensorNotFound(String),

    /// Tokenizer construction or encoding error
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// Generation error
    #[error("Generation error: {0}")]
    Generation(String),
}

impl Error {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }
}
