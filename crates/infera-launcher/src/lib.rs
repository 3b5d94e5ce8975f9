//! Backend-agnostic model launchers for infera.
//!
//! This crate defines the contract every inference backend satisfies:
//! - loading a model from an artifact or a registered constructor
//! - reporting input/output tensor [`Metadata`]
//! - reshaping model inputs
//! - synchronous inference over named tensors
//!
//! Backends:
//! - `ort` (ONNX Runtime) for native platforms
//! - `tract` for pure-Rust execution

mod backend;
mod error;
mod metadata;
mod network;
mod source;
mod tensor;

pub use backend::{create_launcher, Launcher, LauncherKind, ShapeMap};
pub use error::LauncherError;
pub use metadata::{default_layout, Metadata, DYNAMIC_DIM};
pub use network::{LayerMap, NetworkInfo};
pub use source::{CompileMode, Device, LauncherConfig, ModelConstructor, ModelRegistry, ModelSource};
pub use tensor::{InputTensor, OutputMap, OutputTensor, TensorMap, TensorType};

#[cfg(feature = "native")]
pub use backend::ort::OrtLauncher;

#[cfg(feature = "tract")]
pub use backend::tract::TractLauncher;

/// Result type for launcher operations.
pub type Result<T> = std::result::Result<T, LauncherError>;
