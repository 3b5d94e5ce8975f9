//! Launcher contract and backend implementations.

#[cfg(feature = "native")]
pub mod ort;

#[cfg(feature = "tract")]
pub mod tract;

#[cfg(all(test, any(feature = "native", feature = "tract")))]
pub(crate) mod test_models;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::LauncherError;
use crate::network::{LayerMap, NetworkInfo};
use crate::source::{CompileMode, LauncherConfig, ModelRegistry};
use crate::tensor::{InputTensor, OutputMap, TensorMap};
use crate::Result;

/// New shapes keyed by input name.
pub type ShapeMap = BTreeMap<String, Vec<i64>>;

/// Trait for model launchers.
///
/// A launcher exclusively owns a loaded backend model. It reports the
/// model's tensors, reshapes its inputs and runs blocking inference.
/// Mutating operations take `&mut self`; sharing a launcher between threads
/// requires an external lock.
pub trait Launcher: Send {
    /// Backend name, e.g. `onnxruntime`.
    fn provider(&self) -> &'static str;

    /// (Re)build the runnable model in the given compile mode.
    fn load_model(&mut self, mode: CompileMode) -> Result<()>;

    /// Metadata for every model input.
    fn get_input_layers(&self) -> Result<LayerMap>;

    /// Metadata for every model output.
    fn get_output_layers(&self) -> Result<LayerMap>;

    /// Replace the shapes of the named inputs.
    ///
    /// On failure the previous model stays in place.
    fn reshape_model(&mut self, new_shape: &ShapeMap) -> Result<()>;

    /// Run one blocking forward pass.
    ///
    /// # Arguments
    /// * `data` - Input tensors keyed by input name
    ///
    /// # Returns
    /// Raw output tensors keyed by output name
    fn infer_sync(&mut self, data: TensorMap) -> Result<OutputMap>;

    /// Counter bumped by every successful reshape.
    fn generation(&self) -> u64;

    /// Snapshot of the current inputs and outputs.
    fn network_info(&self) -> Arc<NetworkInfo>;
}

/// Supported launcher backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LauncherKind {
    Ort,
    Tract,
}

impl FromStr for LauncherKind {
    type Err = LauncherError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "onnxruntime" | "ort" => Ok(LauncherKind::Ort),
            "tract" => Ok(LauncherKind::Tract),
            other => Err(LauncherError::ModelLoad(format!("unknown provider '{}'", other))),
        }
    }
}

impl fmt::Display for LauncherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LauncherKind::Ort => f.write_str("onnxruntime"),
            LauncherKind::Tract => f.write_str("tract"),
        }
    }
}

/// Create the launcher named by `config.provider`.
pub fn create_launcher(config: &LauncherConfig, registry: &ModelRegistry) -> Result<Box<dyn Launcher>> {
    let kind: LauncherKind = config.provider.parse()?;
    match kind {
        #[cfg(feature = "native")]
        LauncherKind::Ort => Ok(Box::new(ort::OrtLauncher::new(config, registry)?)),
        #[cfg(feature = "tract")]
        LauncherKind::Tract => Ok(Box::new(tract::TractLauncher::new(config, registry)?)),
        #[allow(unreachable_patterns)]
        other => {
            let _ = registry;
            Err(LauncherError::ModelLoad(format!(
                "provider '{}' is not enabled in this build",
                other
            )))
        }
    }
}

/// Validate a reshape request against the current inputs.
pub(crate) fn validate_reshape(inputs: &LayerMap, new_shape: &ShapeMap) -> Result<()> {
    for (name, shape) in new_shape {
        let current = inputs
            .get(name)
            .ok_or_else(|| LauncherError::Reshape(format!("model has no input '{}'", name)))?;

        if current.rank() != shape.len() {
            return Err(LauncherError::Reshape(format!(
                "input '{}' has rank {}, requested shape {:?} has rank {}",
                name,
                current.rank(),
                shape,
                shape.len()
            )));
        }

        if shape.iter().any(|&d| d == 0 || d < -1) {
            return Err(LauncherError::Reshape(format!(
                "invalid dimension in shape {:?} for '{}'",
                shape, name
            )));
        }
    }
    Ok(())
}

/// Check and convert request tensors into the launcher's declared input order.
///
/// Every declared input must be present and shape compatible. Tensors are
/// cast to the declared exchange type.
pub(crate) fn prepare_inputs(
    info: &NetworkInfo,
    order: &[String],
    mut data: TensorMap,
) -> Result<Vec<(String, InputTensor)>> {
    let mut prepared = Vec::with_capacity(order.len());

    for name in order {
        let tensor = data
            .remove(name)
            .ok_or_else(|| LauncherError::Inference(format!("missing input '{}'", name)))?;
        let meta = info.input(name)?;

        if !meta.accepts(tensor.shape()) {
            return Err(LauncherError::ShapeMismatch {
                name: name.clone(),
                expected: meta.shape.clone(),
                actual: tensor.shape().to_vec(),
            });
        }

        let tensor = match meta.exchange_type() {
            Some(ty) => tensor.cast(ty),
            None => tensor,
        };
        prepared.push((name.clone(), tensor));
    }

    if let Some(extra) = data.keys().next() {
        return Err(LauncherError::UnknownTensor(extra.clone()));
    }

    Ok(prepared)
}

/// Overlay requested shapes onto a layer map.
pub(crate) fn apply_shapes(mut layers: LayerMap, shapes: &ShapeMap) -> LayerMap {
    for (name, shape) in shapes {
        if let Some(meta) = layers.get_mut(name) {
            meta.shape = shape.clone();
        }
    }
    layers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Metadata;
    use crate::tensor::TensorType;
    use pretty_assertions::assert_eq;

    fn info() -> NetworkInfo {
        let inputs = LayerMap::from([(
            "data".to_string(),
            Metadata::new("data")
                .with_shape(vec![-1, 3, 2, 2])
                .with_layout("NCHW")
                .with_type(TensorType::Float32),
        )]);
        let outputs = LayerMap::from([(
            "prob".to_string(),
            Metadata::new("prob").with_shape(vec![-1, 3]),
        )]);
        NetworkInfo::new(inputs, outputs, 0).unwrap()
    }

    fn order() -> Vec<String> {
        vec!["data".to_string()]
    }

    #[test]
    fn test_prepare_casts_to_declared_type() {
        let data = TensorMap::from([(
            "data".to_string(),
            InputTensor::from_u8(vec![1; 12], vec![1, 3, 2, 2]).unwrap(),
        )]);
        let prepared = prepare_inputs(&info(), &order(), data).unwrap();
        assert_eq!(prepared.len(), 1);
        assert_eq!(prepared[0].1.dtype(), TensorType::Float32);
    }

    #[test]
    fn test_prepare_casts_by_precision() {
        let mut info = info();
        if let Some(meta) = info.inputs_info.get_mut("data") {
            meta.ty = None;
            meta.precision = "I64".to_string();
        }
        let data = TensorMap::from([(
            "data".to_string(),
            InputTensor::from_f32(vec![2.0; 12], vec![1, 3, 2, 2]).unwrap(),
        )]);
        let prepared = prepare_inputs(&info, &order(), data).unwrap();
        assert_eq!(prepared[0].1.dtype(), TensorType::Int64);
    }

    #[test]
    fn test_prepare_missing_input() {
        let err = prepare_inputs(&info(), &order(), TensorMap::new()).unwrap_err();
        assert!(matches!(err, LauncherError::Inference(msg) if msg.contains("data")));
    }

    #[test]
    fn test_prepare_shape_mismatch() {
        let data = TensorMap::from([(
            "data".to_string(),
            InputTensor::from_f32(vec![0.0; 8], vec![1, 2, 2, 2]).unwrap(),
        )]);
        match prepare_inputs(&info(), &order(), data).unwrap_err() {
            LauncherError::ShapeMismatch {
                name,
                expected,
                actual,
            } => {
                assert_eq!(name, "data");
                assert_eq!(expected, vec![-1, 3, 2, 2]);
                assert_eq!(actual, vec![1, 2, 2, 2]);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_prepare_rejects_unknown_input() {
        let data = TensorMap::from([
            (
                "data".to_string(),
                InputTensor::from_f32(vec![0.0; 12], vec![1, 3, 2, 2]).unwrap(),
            ),
            (
                "extra".to_string(),
                InputTensor::from_f32(vec![0.0], vec![1]).unwrap(),
            ),
        ]);
        let err = prepare_inputs(&info(), &order(), data).unwrap_err();
        assert!(matches!(err, LauncherError::UnknownTensor(name) if name == "extra"));
    }

    #[test]
    fn test_validate_reshape() {
        let inputs = info().inputs_info;
        let ok = ShapeMap::from([("data".to_string(), vec![2, 3, 8, 8])]);
        assert!(validate_reshape(&inputs, &ok).is_ok());

        let unknown = ShapeMap::from([("image".to_string(), vec![1, 3, 8, 8])]);
        assert!(matches!(
            validate_reshape(&inputs, &unknown).unwrap_err(),
            LauncherError::Reshape(_)
        ));

        let wrong_rank = ShapeMap::from([("data".to_string(), vec![1, 3, 8])]);
        assert!(validate_reshape(&inputs, &wrong_rank).is_err());

        let zero_dim = ShapeMap::from([("data".to_string(), vec![1, 0, 8, 8])]);
        assert!(validate_reshape(&inputs, &zero_dim).is_err());
    }

    #[test]
    fn test_apply_shapes() {
        let shapes = ShapeMap::from([("data".to_string(), vec![1, 3, 4, 4])]);
        let layers = apply_shapes(info().inputs_info, &shapes);
        assert_eq!(layers["data"].shape, vec![1, 3, 4, 4]);
    }

    #[test]
    fn test_launcher_kind_parse() {
        assert_eq!("onnxruntime".parse::<LauncherKind>().unwrap(), LauncherKind::Ort);
        assert_eq!("tract".parse::<LauncherKind>().unwrap(), LauncherKind::Tract);
        assert!("pytorch".parse::<LauncherKind>().is_err());
    }
}
