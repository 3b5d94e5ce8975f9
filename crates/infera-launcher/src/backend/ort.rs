//! ONNX Runtime (ort) launcher for native platforms.

use std::fmt::Debug;
use std::sync::Arc;

use ndarray::ArrayD;
use ort::ep::XNNPACK;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionInputValue};
use ort::tensor::{PrimitiveTensorElementType, TensorElementType};
use ort::value::{DynValue, Tensor, ValueType};
use tracing::{debug, info, info_span, Span};

use crate::backend::{apply_shapes, prepare_inputs, validate_reshape, Launcher, ShapeMap};
use crate::error::LauncherError;
use crate::metadata::{default_layout, Metadata, DYNAMIC_DIM};
use crate::network::{LayerMap, NetworkInfo};
use crate::source::{CompileMode, Device, LauncherConfig, ModelRegistry};
use crate::tensor::{InputTensor, OutputMap, OutputTensor, TensorMap, TensorType};
use crate::Result;

/// Launcher backed by ONNX Runtime.
///
/// ONNX Runtime resolves dynamic dimensions per run, so reshaping only
/// narrows dimensions the model leaves dynamic. Output metadata keeps the
/// shapes the model declares.
pub struct OrtLauncher {
    session: Session,
    model_bytes: Vec<u8>,
    device: Device,
    mode: CompileMode,
    input_names: Vec<String>,
    native_inputs: LayerMap,
    native_outputs: LayerMap,
    shapes: ShapeMap,
    generation: u64,
    info: Arc<NetworkInfo>,
    span: Span,
}

impl OrtLauncher {
    /// Load the configured model source.
    pub fn new(config: &LauncherConfig, registry: &ModelRegistry) -> Result<Self> {
        let span = info_span!("launcher", provider = "onnxruntime");
        let scope = span.clone();

        scope.in_scope(move || {
            let source = config.model_source()?;
            let device = config.device()?;
            let mode = config.mode()?;
            let model_bytes = registry.resolve(&source)?;

            debug!(
                "Loading ONNX model from {} ({} bytes)",
                source.model_path().display(),
                model_bytes.len()
            );

            let session = build_session(&model_bytes, device, mode)?;
            info!("Inference will be executed on {} model ({})", mode, device);

            let input_names: Vec<String> = session
                .inputs()
                .iter()
                .map(|i| i.name().to_string())
                .collect();

            let native_inputs = collect_layers(
                session.inputs().iter().map(|i| (i.name(), i.dtype())),
                true,
            )?;
            let native_outputs = collect_layers(
                session.outputs().iter().map(|o| (o.name(), o.dtype())),
                false,
            )?;

            debug!("Model inputs: {:?}", input_names);
            debug!("Model outputs: {:?}", native_outputs.keys().collect::<Vec<_>>());

            let shapes = config.inputs.clone();
            check_shapes(&native_inputs, &shapes).map_err(|e| LauncherError::ModelLoad(e.to_string()))?;

            let info = NetworkInfo::new(
                apply_shapes(native_inputs.clone(), &shapes),
                native_outputs.clone(),
                0,
            )?;

            Ok(Self {
                session,
                model_bytes,
                device,
                mode,
                input_names,
                native_inputs,
                native_outputs,
                shapes,
                generation: 0,
                info: Arc::new(info),
                span,
            })
        })
    }

    /// Compile mode the current session was built with.
    pub fn mode(&self) -> CompileMode {
        self.mode
    }

    fn refresh_info(&self, shapes: &ShapeMap, generation: u64) -> Result<NetworkInfo> {
        NetworkInfo::new(
            apply_shapes(self.native_inputs.clone(), shapes),
            self.native_outputs.clone(),
            generation,
        )
    }
}

impl Launcher for OrtLauncher {
    fn provider(&self) -> &'static str {
        "onnxruntime"
    }

    fn load_model(&mut self, mode: CompileMode) -> Result<()> {
        let span = self.span.clone();
        let _guard = span.enter();

        self.session = build_session(&self.model_bytes, self.device, mode)?;
        self.mode = mode;
        info!("Inference will be executed on {} model ({})", mode, self.device);
        Ok(())
    }

    fn get_input_layers(&self) -> Result<LayerMap> {
        Ok(apply_shapes(self.native_inputs.clone(), &self.shapes))
    }

    fn get_output_layers(&self) -> Result<LayerMap> {
        Ok(self.native_outputs.clone())
    }

    fn reshape_model(&mut self, new_shape: &ShapeMap) -> Result<()> {
        let span = self.span.clone();
        let _guard = span.enter();

        check_shapes(&self.native_inputs, new_shape)?;

        let mut shapes = self.shapes.clone();
        shapes.extend(new_shape.iter().map(|(k, v)| (k.clone(), v.clone())));
        let info = self.refresh_info(&shapes, self.generation + 1)?;

        debug!("Reshaped inputs: {:?}", new_shape);
        self.shapes = shapes;
        self.generation += 1;
        self.info = Arc::new(info);
        Ok(())
    }

    fn infer_sync(&mut self, data: TensorMap) -> Result<OutputMap> {
        let span = self.span.clone();
        let _guard = span.enter();

        let prepared = prepare_inputs(&self.info, &self.input_names, data)?;
        let ort_inputs: Vec<(&str, SessionInputValue<'static>)> = prepared
            .iter()
            .map(|(name, tensor)| {
                let value = convert_input(tensor)?;
                Ok((name.as_str(), value))
            })
            .collect::<Result<Vec<_>>>()?;

        let outputs = self
            .session
            .run(ort_inputs)
            .map_err(|e| LauncherError::Inference(e.to_string()))?;

        let mut results = OutputMap::new();

        for (name, value) in outputs.iter() {
            let tensor = if let Some(arr) = extract_output::<f32>(&value) {
                OutputTensor::Float32(arr?)
            } else if let Some(arr) = extract_output::<i64>(&value) {
                OutputTensor::Int64(arr?)
            } else if let Some(arr) = extract_output::<i32>(&value) {
                OutputTensor::Int32(arr?)
            } else if let Some(arr) = extract_output::<f64>(&value) {
                OutputTensor::Float64(arr?)
            } else if let Some(arr) = extract_output::<u8>(&value) {
                OutputTensor::Uint8(arr?)
            } else {
                return Err(LauncherError::OutputExtraction(format!(
                    "unsupported output type for '{}'",
                    name
                )));
            };

            results.insert(name.to_string(), tensor);
        }

        Ok(results)
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    fn network_info(&self) -> Arc<NetworkInfo> {
        Arc::clone(&self.info)
    }
}

fn build_session(bytes: &[u8], device: Device, mode: CompileMode) -> Result<Session> {
    let level = match mode {
        CompileMode::Baseline => GraphOptimizationLevel::Disable,
        CompileMode::Optimized => GraphOptimizationLevel::Level3,
    };

    let mut builder = Session::builder()
        .map_err(|e| LauncherError::ModelLoad(e.to_string()))?;

    if device == Device::Xnnpack {
        builder = builder
            .with_execution_providers([XNNPACK::default().build()])
            .map_err(|e| LauncherError::ModelLoad(e.to_string()))?;
    }

    builder
        .with_optimization_level(level)
        .map_err(|e| LauncherError::ModelLoad(e.to_string()))?
        .with_intra_threads(4)
        .map_err(|e| LauncherError::ModelLoad(e.to_string()))?
        .commit_from_memory(bytes)
        .map_err(|e| LauncherError::ModelLoad(e.to_string()))
}

fn convert_input(tensor: &InputTensor) -> Result<SessionInputValue<'static>> {
    match tensor {
        InputTensor::Float32(arr) => ort_input(arr),
        InputTensor::Float64(arr) => ort_input(arr),
        InputTensor::Int32(arr) => ort_input(arr),
        InputTensor::Int64(arr) => ort_input(arr),
        InputTensor::Uint8(arr) => ort_input(arr),
    }
}

fn ort_input<T>(arr: &ArrayD<T>) -> Result<SessionInputValue<'static>>
where
    T: PrimitiveTensorElementType + Clone + Debug + 'static,
{
    let shape: Vec<i64> = arr.shape().iter().map(|&s| s as i64).collect();
    let data: Vec<T> = arr.iter().cloned().collect();
    Tensor::from_array((shape, data))
        .map(Into::into)
        .map_err(|e| LauncherError::InvalidInput(e.to_string()))
}

/// Copy an output out of the session, `None` when it holds another element type.
fn extract_output<T>(value: &DynValue) -> Option<Result<ArrayD<T>>>
where
    T: PrimitiveTensorElementType + Clone,
{
    let (shape, data) = value.try_extract_tensor::<T>().ok()?;
    let shape: Vec<usize> = shape.iter().map(|&s| s as usize).collect();
    Some(
        ArrayD::from_shape_vec(ndarray::IxDyn(&shape), data.to_vec())
            .map_err(|e| LauncherError::OutputExtraction(e.to_string())),
    )
}

fn collect_layers<'a>(
    outlets: impl Iterator<Item = (&'a str, &'a ValueType)>,
    is_input: bool,
) -> Result<LayerMap> {
    let mut layers = LayerMap::new();

    for (name, value_type) in outlets {
        let ValueType::Tensor { ty, shape, .. } = value_type else {
            return Err(LauncherError::ModelLoad(format!(
                "'{}' is not a tensor",
                name
            )));
        };

        let dims: Vec<i64> = shape
            .iter()
            .map(|&d| if d < 0 { DYNAMIC_DIM } else { d })
            .collect();

        let mut meta = Metadata::new(name)
            .with_meta("element_type", serde_json::Value::String(ty.to_string()));
        if is_input {
            meta = meta.with_layout(default_layout(dims.len()));
        }
        meta = match exchange_type(*ty) {
            Some(t) => meta.with_type(t),
            None => {
                meta.precision = native_precision(*ty).to_string();
                meta
            }
        };

        layers.insert(name.to_string(), meta.with_shape(dims));
    }

    Ok(layers)
}

/// Validate a reshape request, including dimensions the model fixes.
fn check_shapes(native: &LayerMap, shapes: &ShapeMap) -> Result<()> {
    validate_reshape(native, shapes)?;

    for (name, shape) in shapes {
        let Some(declared) = native.get(name) else {
            continue;
        };
        for (axis, (&fixed, &requested)) in declared.shape.iter().zip(shape).enumerate() {
            if fixed >= 0 && fixed != requested {
                return Err(LauncherError::Reshape(format!(
                    "dimension {} of '{}' is fixed at {} by the model, requested {}",
                    axis, name, fixed, requested
                )));
            }
        }
    }
    Ok(())
}

fn exchange_type(ty: TensorElementType) -> Option<TensorType> {
    match ty {
        TensorElementType::Float32 => Some(TensorType::Float32),
        TensorElementType::Float64 => Some(TensorType::Float64),
        TensorElementType::Int32 => Some(TensorType::Int32),
        TensorElementType::Int64 => Some(TensorType::Int64),
        TensorElementType::Uint8 => Some(TensorType::Uint8),
        _ => None,
    }
}

fn native_precision(ty: TensorElementType) -> &'static str {
    match ty {
        TensorElementType::Float16 => "FP16",
        TensorElementType::Int16 => "I16",
        TensorElementType::Int8 => "I8",
        _ => "",
    }
}
