//! Per-tensor metadata reported by launchers.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::tensor::TensorType;

/// Sentinel for a dimension whose size is only known at inference time.
pub const DYNAMIC_DIM: i64 = -1;

/// Description of one model input or output tensor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    /// Every name the tensor is known by.
    pub names: BTreeSet<String>,

    /// Dimension sizes, `DYNAMIC_DIM` for unknown dimensions.
    pub shape: Vec<i64>,

    /// Axis semantics such as `NCHW`; empty when unknown.
    pub layout: String,

    /// Precision the backend stores the tensor in.
    pub precision: String,

    /// Element type call sites must supply or will receive.
    #[serde(rename = "type")]
    pub ty: Option<TensorType>,

    /// Backend-specific extras.
    pub meta: BTreeMap<String, serde_json::Value>,
}

impl Metadata {
    /// Metadata for a tensor with a single name and nothing else known.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            names: BTreeSet::from([name.into()]),
            ..Self::default()
        }
    }

    pub fn with_shape(mut self, shape: Vec<i64>) -> Self {
        self.shape = shape;
        self
    }

    pub fn with_layout(mut self, layout: impl Into<String>) -> Self {
        self.layout = layout.into();
        self
    }

    /// Set the exchange type together with its matching precision.
    pub fn with_type(mut self, ty: TensorType) -> Self {
        self.ty = Some(ty);
        self.precision = ty.precision().to_string();
        self
    }

    /// Exchange type, falling back to the one implied by `precision`.
    pub fn exchange_type(&self) -> Option<TensorType> {
        self.ty.or_else(|| TensorType::from_precision(&self.precision))
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Whether any dimension is dynamic.
    pub fn is_dynamic(&self) -> bool {
        self.shape.iter().any(|&d| d < 0)
    }

    /// Check a concrete shape against the declared one.
    ///
    /// Ranks must agree; every static dimension must match exactly while
    /// dynamic dimensions accept any size.
    pub fn accepts(&self, shape: &[usize]) -> bool {
        self.shape.len() == shape.len()
            && self
                .shape
                .iter()
                .zip(shape)
                .all(|(&declared, &actual)| declared < 0 || declared as usize == actual)
    }
}

/// Default layout for a tensor of the given rank when the backend does not say.
pub fn default_layout(rank: usize) -> &'static str {
    if rank == 4 { "NCHW" } else { "" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_is_empty() {
        let meta = Metadata::default();
        assert!(meta.names.is_empty());
        assert!(meta.shape.is_empty());
        assert!(meta.layout.is_empty());
        assert!(meta.precision.is_empty());
        assert_eq!(meta.ty, None);
        assert!(meta.meta.is_empty());
    }

    #[test]
    fn test_with_type_sets_precision() {
        let meta = Metadata::new("data").with_type(TensorType::Uint8);
        assert_eq!(meta.precision, "U8");
        assert_eq!(meta.ty, Some(TensorType::Uint8));
    }

    #[test]
    fn test_exchange_type_from_precision() {
        let meta: Metadata =
            serde_json::from_value(serde_json::json!({"names": ["data"], "precision": "U8"})).unwrap();
        assert_eq!(meta.ty, None);
        assert_eq!(meta.exchange_type(), Some(TensorType::Uint8));

        let meta = Metadata {
            precision: "FP16".to_string(),
            ..Metadata::new("data")
        };
        assert_eq!(meta.exchange_type(), None);
    }

    #[test]
    fn test_accepts_dynamic_dims() {
        let meta = Metadata::new("data").with_shape(vec![DYNAMIC_DIM, 3, 224, 224]);
        assert!(meta.is_dynamic());
        assert!(meta.accepts(&[8, 3, 224, 224]));
        assert!(!meta.accepts(&[1, 1, 224, 224]));
        assert!(!meta.accepts(&[3, 224, 224]));
    }

    #[test]
    fn test_comparison_detects_reshape() {
        let before = Metadata::new("data").with_shape(vec![1, 3, 224, 224]);
        let after = before.clone().with_shape(vec![1, 3, 320, 320]);
        assert_ne!(before, after);
        assert_eq!(before.clone(), before);
    }

    #[test]
    fn test_serializes_type_field() {
        let meta = Metadata::new("prob").with_type(TensorType::Float32);
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["type"], serde_json::json!("Float32"));
    }
}
