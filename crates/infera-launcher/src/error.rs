//! Error types for the launcher layer.

use thiserror::Error;

/// Errors that can occur while loading, reshaping or running a model.
#[derive(Error, Debug)]
pub enum LauncherError {
    /// The model source is missing, malformed or incompletely described.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// The requested compile mode is not recognised.
    #[error("unsupported compile mode '{0}' (expected 'baseline' or 'optimized')")]
    UnsupportedMode(String),

    /// The reshape request names an unknown input or violates the model structure.
    #[error("failed to reshape model: {0}")]
    Reshape(String),

    /// Inference execution failed or a required input was not supplied.
    #[error("inference failed: {0}")]
    Inference(String),

    /// Supplied data does not match the declared input shape.
    #[error("shape mismatch for '{name}': expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<i64>,
        actual: Vec<usize>,
    },

    /// Lookup of a tensor name the model does not declare.
    #[error("unknown tensor '{0}'")]
    UnknownTensor(String),

    /// The same tensor name was reported as both an input and an output.
    #[error("tensor '{0}' is declared as both input and output")]
    DuplicateTensor(String),

    /// Invalid input tensor construction.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Output tensor extraction failed.
    #[error("failed to extract output: {0}")]
    OutputExtraction(String),

    /// I/O error when loading model files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
