//! Tensor types exchanged with launchers.

use std::collections::BTreeMap;

use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::LauncherError;
use crate::Result;

/// Named input tensors for one inference request.
pub type TensorMap = BTreeMap<String, InputTensor>;

/// Named raw output tensors produced by one inference request.
pub type OutputMap = BTreeMap<String, OutputTensor>;

/// Element types call sites exchange with a launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TensorType {
    Float32,
    Float64,
    Int32,
    Int64,
    Uint8,
}

impl TensorType {
    /// Backend precision identifier for this element type.
    pub fn precision(self) -> &'static str {
        match self {
            TensorType::Float32 => "FP32",
            TensorType::Float64 => "FP64",
            TensorType::Int32 => "I32",
            TensorType::Int64 => "I64",
            TensorType::Uint8 => "U8",
        }
    }

    /// Parse a precision identifier. Precisions without an exchange type
    /// (e.g. `FP16`) yield `None`.
    pub fn from_precision(precision: &str) -> Option<Self> {
        match precision {
            "FP32" => Some(TensorType::Float32),
            "FP64" => Some(TensorType::Float64),
            "I32" => Some(TensorType::Int32),
            "I64" => Some(TensorType::Int64),
            "U8" => Some(TensorType::Uint8),
            _ => None,
        }
    }
}

/// Input tensor for inference.
#[derive(Debug, Clone)]
pub enum InputTensor {
    Float32(ArrayD<f32>),
    Float64(ArrayD<f64>),
    Int32(ArrayD<i32>),
    Int64(ArrayD<i64>),
    Uint8(ArrayD<u8>),
}

impl InputTensor {
    /// Get the shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        match self {
            InputTensor::Float32(arr) => arr.shape(),
            InputTensor::Float64(arr) => arr.shape(),
            InputTensor::Int32(arr) => arr.shape(),
            InputTensor::Int64(arr) => arr.shape(),
            InputTensor::Uint8(arr) => arr.shape(),
        }
    }

    /// Get the data type of the tensor.
    pub fn dtype(&self) -> TensorType {
        match self {
            InputTensor::Float32(_) => TensorType::Float32,
            InputTensor::Float64(_) => TensorType::Float64,
            InputTensor::Int32(_) => TensorType::Int32,
            InputTensor::Int64(_) => TensorType::Int64,
            InputTensor::Uint8(_) => TensorType::Uint8,
        }
    }

    /// Create a Float32 tensor from raw data and shape.
    pub fn from_f32(data: Vec<f32>, shape: Vec<usize>) -> Result<Self> {
        let arr = ArrayD::from_shape_vec(IxDyn(&shape), data)
            .map_err(|e| LauncherError::InvalidInput(e.to_string()))?;
        Ok(InputTensor::Float32(arr))
    }

    /// Create a Uint8 tensor from raw data and shape.
    pub fn from_u8(data: Vec<u8>, shape: Vec<usize>) -> Result<Self> {
        let arr = ArrayD::from_shape_vec(IxDyn(&shape), data)
            .map_err(|e| LauncherError::InvalidInput(e.to_string()))?;
        Ok(InputTensor::Uint8(arr))
    }

    /// Convert the tensor element-wise into `target`.
    ///
    /// Conversions go through `f64`, so integers beyond 2^53 lose precision
    /// and float-to-integer conversions saturate.
    pub fn cast(self, target: TensorType) -> Self {
        if self.dtype() == target {
            return self;
        }

        let wide = match self {
            InputTensor::Float32(arr) => arr.mapv(f64::from),
            InputTensor::Float64(arr) => arr,
            InputTensor::Int32(arr) => arr.mapv(f64::from),
            InputTensor::Int64(arr) => arr.mapv(|v| v as f64),
            InputTensor::Uint8(arr) => arr.mapv(f64::from),
        };

        match target {
            TensorType::Float32 => InputTensor::Float32(wide.mapv(|v| v as f32)),
            TensorType::Float64 => InputTensor::Float64(wide),
            TensorType::Int32 => InputTensor::Int32(wide.mapv(|v| v as i32)),
            TensorType::Int64 => InputTensor::Int64(wide.mapv(|v| v as i64)),
            TensorType::Uint8 => InputTensor::Uint8(wide.mapv(|v| v as u8)),
        }
    }
}

/// Output tensor from inference.
#[derive(Debug, Clone)]
pub enum OutputTensor {
    Float32(ArrayD<f32>),
    Float64(ArrayD<f64>),
    Int32(ArrayD<i32>),
    Int64(ArrayD<i64>),
    Uint8(ArrayD<u8>),
}

impl OutputTensor {
    /// Get the shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        match self {
            OutputTensor::Float32(arr) => arr.shape(),
            OutputTensor::Float64(arr) => arr.shape(),
            OutputTensor::Int32(arr) => arr.shape(),
            OutputTensor::Int64(arr) => arr.shape(),
            OutputTensor::Uint8(arr) => arr.shape(),
        }
    }

    /// Get the data type of the tensor.
    pub fn dtype(&self) -> TensorType {
        match self {
            OutputTensor::Float32(_) => TensorType::Float32,
            OutputTensor::Float64(_) => TensorType::Float64,
            OutputTensor::Int32(_) => TensorType::Int32,
            OutputTensor::Int64(_) => TensorType::Int64,
            OutputTensor::Uint8(_) => TensorType::Uint8,
        }
    }

    /// Try to get the inner Float32 array.
    pub fn as_f32(&self) -> Option<&ArrayD<f32>> {
        match self {
            OutputTensor::Float32(arr) => Some(arr),
            _ => None,
        }
    }

    /// Try to get the inner Int64 array.
    pub fn as_i64(&self) -> Option<&ArrayD<i64>> {
        match self {
            OutputTensor::Int64(arr) => Some(arr),
            _ => None,
        }
    }

    /// Copy the tensor into a Float32 array regardless of its element type.
    pub fn to_f32(&self) -> ArrayD<f32> {
        match self {
            OutputTensor::Float32(arr) => arr.clone(),
            OutputTensor::Float64(arr) => arr.mapv(|v| v as f32),
            OutputTensor::Int32(arr) => arr.mapv(|v| v as f32),
            OutputTensor::Int64(arr) => arr.mapv(|v| v as f32),
            OutputTensor::Uint8(arr) => arr.mapv(f32::from),
        }
    }
}
