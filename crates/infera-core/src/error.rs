//! Error types for the infera-core library.

use thiserror::Error;

/// Main error type for the infera library.
#[derive(Error, Debug)]
pub enum InferaError {
    /// Error from the launcher layer.
    #[error("launcher error: {0}")]
    Launcher(#[from] infera_launcher::LauncherError),

    /// Model wrapper error.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Parameter validation error.
    #[error("parameter error: {0}")]
    Parameter(#[from] ParameterError),

    /// Image processing error.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Errors raised by model wrappers.
#[derive(Error, Debug)]
pub enum ModelError {
    /// The model has the wrong number of inputs or outputs.
    #[error("unexpected topology: {0}")]
    Topology(String),

    /// The model's tensors have a shape this wrapper cannot handle.
    #[error("unsupported topology: {0}")]
    UnsupportedTopology(String),

    /// A labels file line could not be parsed.
    #[error("the labels file has incorrect format at line {line}: '{content}'")]
    LabelFormat { line: usize, content: String },

    /// The number of labels does not match the model's class count.
    #[error("model's number of classes and parsed labels must match ({classes} != {labels})")]
    LabelCountMismatch { classes: usize, labels: usize },

    /// The launcher was reshaped after the model captured its tensors.
    #[error("network info is stale (taken at generation {snapshot}, launcher is at {current})")]
    StaleNetworkInfo { snapshot: u64, current: u64 },

    /// Input could not be converted into model tensors.
    #[error("preprocessing failed: {0}")]
    Preprocessing(String),

    /// Raw output could not be interpreted.
    #[error("invalid model output: {0}")]
    Output(String),
}

/// Errors raised while resolving a parameter map against a schema.
#[derive(Error, Debug)]
pub enum ParameterError {
    /// A required parameter has neither a value nor a default.
    #[error("missing required parameter '{0}'")]
    MissingParameter(String),

    /// The configuration names a parameter the schema does not declare.
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    /// The value has the wrong type or is out of bounds.
    #[error("invalid value for '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },
}

/// Result type for the infera library.
pub type Result<T> = std::result::Result<T, InferaError>;
