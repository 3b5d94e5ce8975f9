//! Model wrappers on top of infera launchers.
//!
//! This crate provides:
//! - declarative parameter schemas for model configuration
//! - the [`Model`] contract (preprocess, infer, postprocess)
//! - image preprocessing and top-k classification
//! - JSON configuration for a launcher and its model

pub mod error;
pub mod models;
pub mod params;

#[cfg(test)]
mod testing;

pub use error::{InferaError, ModelError, ParameterError, Result};
pub use models::classification::{
    load_labels, parse_labels, Classification, ClassificationConfig, Prediction,
};
pub use models::config::InferaConfig;
pub use models::image_model::{ImageMeta, ImagePreprocessor, ResizeType};
pub use models::{check_io_number, Model};
pub use params::{
    NumericType, Parameter, ParameterKind, ParameterMap, ParameterSchema, ResolvedParameters,
};

/// Re-export launcher types.
pub use infera_launcher::{
    create_launcher, CompileMode, Device, InputTensor, LayerMap, Launcher, LauncherConfig,
    LauncherError, LauncherKind, Metadata, ModelRegistry, ModelSource, NetworkInfo, OutputMap,
    OutputTensor, ShapeMap, TensorMap, TensorType,
};

#[cfg(feature = "native")]
pub use infera_launcher::OrtLauncher;

#[cfg(feature = "tract")]
pub use infera_launcher::TractLauncher;
