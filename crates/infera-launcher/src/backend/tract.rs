//! Tract launcher for pure-Rust ONNX inference.

use std::io::Cursor;
use std::sync::Arc;

use ndarray::ArrayD;
use tract_onnx::prelude::*;
use tracing::{debug, info, info_span, Span};

use crate::backend::{prepare_inputs, validate_reshape, Launcher, ShapeMap};
use crate::error::LauncherError;
use crate::metadata::{default_layout, Metadata, DYNAMIC_DIM};
use crate::network::{LayerMap, NetworkInfo};
use crate::source::{CompileMode, LauncherConfig, ModelRegistry};
use crate::tensor::{InputTensor, OutputMap, OutputTensor, TensorMap, TensorType};
use crate::Result;

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Launcher backed by tract.
///
/// The untyped ONNX graph is kept so that reshaping can re-type it with new
/// input facts. Tract needs concrete input dimensions to type most graphs,
/// so reshape requests must not contain dynamic dimensions.
pub struct TractLauncher {
    source: InferenceModel,
    plan: Plan,
    mode: CompileMode,
    input_names: Vec<String>,
    output_names: Vec<String>,
    shapes: ShapeMap,
    generation: u64,
    info: Arc<NetworkInfo>,
    span: Span,
}

impl TractLauncher {
    /// Load the configured model source.
    pub fn new(config: &LauncherConfig, registry: &ModelRegistry) -> Result<Self> {
        let span = info_span!("launcher", provider = "tract");
        let scope = span.clone();

        scope.in_scope(move || {
            let source_desc = config.model_source()?;
            // Tract runs on the host CPU whatever device is requested.
            let device = config.device()?;
            let mode = config.mode()?;
            let bytes = registry.resolve(&source_desc)?;

            debug!(
                "Loading ONNX model with Tract from {} ({} bytes)",
                source_desc.model_path().display(),
                bytes.len()
            );

            let source = tract_onnx::onnx()
                .model_for_read(&mut Cursor::new(&bytes))
                .map_err(|e| LauncherError::ModelLoad(format!("Failed to load model: {}", e)))?;

            let input_names = outlet_names(&source, true)?;
            let output_names = outlet_names(&source, false)?;

            let shapes = config.inputs.clone();
            if let Some((name, shape)) = shapes.iter().find(|(_, s)| s.iter().any(|&d| d <= 0)) {
                return Err(LauncherError::ModelLoad(format!(
                    "tract needs concrete dimensions, got {:?} for '{}'",
                    shape, name
                )));
            }
            if let Some(name) = shapes.keys().find(|n| !input_names.contains(n)) {
                return Err(LauncherError::ModelLoad(format!("model has no input '{}'", name)));
            }

            let plan = build_plan(&source, &input_names, &shapes, mode)
                .map_err(|e| LauncherError::ModelLoad(e.to_string()))?;
            info!("Inference will be executed on {} model ({})", mode, device);

            let mut launcher = Self {
                source,
                plan,
                mode,
                input_names,
                output_names,
                shapes,
                generation: 0,
                info: Arc::new(NetworkInfo::default()),
                span,
            };
            launcher.info = Arc::new(NetworkInfo::from_launcher(&launcher)?);
            Ok(launcher)
        })
    }

    /// Compile mode the current plan was built with.
    pub fn mode(&self) -> CompileMode {
        self.mode
    }

    fn layers(&self, inputs: bool) -> Result<LayerMap> {
        let model = self.plan.model();
        let (names, outlets) = if inputs {
            (&self.input_names, model.input_outlets())
        } else {
            (&self.output_names, model.output_outlets())
        };
        let outlets = outlets.map_err(|e| LauncherError::ModelLoad(e.to_string()))?;

        let mut layers = LayerMap::new();
        for (name, outlet) in names.iter().zip(outlets) {
            let fact = model
                .outlet_fact(*outlet)
                .map_err(|e| LauncherError::ModelLoad(e.to_string()))?;

            let dims: Vec<i64> = fact
                .shape
                .iter()
                .map(|d| d.to_i64().unwrap_or(DYNAMIC_DIM))
                .collect();

            let mut meta = Metadata::new(name.clone())
                .with_meta("datum_type", serde_json::Value::String(format!("{:?}", fact.datum_type)));
            if inputs {
                meta = meta.with_layout(default_layout(dims.len()));
            }
            meta = match exchange_type(fact.datum_type) {
                Some(ty) => meta.with_type(ty),
                None => {
                    meta.precision = native_precision(fact.datum_type).to_string();
                    meta
                }
            };
            layers.insert(name.clone(), meta.with_shape(dims));
        }

        Ok(layers)
    }
}

impl Launcher for TractLauncher {
    fn provider(&self) -> &'static str {
        "tract"
    }

    fn load_model(&mut self, mode: CompileMode) -> Result<()> {
        let span = self.span.clone();
        let _guard = span.enter();

        self.plan = build_plan(&self.source, &self.input_names, &self.shapes, mode)
            .map_err(|e| LauncherError::ModelLoad(e.to_string()))?;
        self.mode = mode;
        info!("Inference will be executed on {} model", mode);
        Ok(())
    }

    fn get_input_layers(&self) -> Result<LayerMap> {
        self.layers(true)
    }

    fn get_output_layers(&self) -> Result<LayerMap> {
        self.layers(false)
    }

    fn reshape_model(&mut self, new_shape: &ShapeMap) -> Result<()> {
        let span = self.span.clone();
        let _guard = span.enter();

        validate_reshape(&self.info.inputs_info, new_shape)?;
        if let Some((name, shape)) = new_shape.iter().find(|(_, s)| s.iter().any(|&d| d < 0)) {
            return Err(LauncherError::Reshape(format!(
                "tract needs concrete dimensions, got {:?} for '{}'",
                shape, name
            )));
        }

        let mut shapes = self.shapes.clone();
        shapes.extend(new_shape.iter().map(|(k, v)| (k.clone(), v.clone())));

        let plan = build_plan(&self.source, &self.input_names, &shapes, self.mode)
            .map_err(|e| LauncherError::Reshape(e.to_string()))?;

        let previous = std::mem::replace(&mut self.plan, plan);
        let generation = self.generation + 1;
        let refreshed = self
            .get_input_layers()
            .and_then(|inputs| NetworkInfo::new(inputs, self.get_output_layers()?, generation));

        match refreshed {
            Ok(info) => {
                debug!("Reshaped inputs: {:?}", new_shape);
                self.shapes = shapes;
                self.generation = generation;
                self.info = Arc::new(info);
                Ok(())
            }
            Err(e) => {
                self.plan = previous;
                Err(LauncherError::Reshape(e.to_string()))
            }
        }
    }

    fn infer_sync(&mut self, data: TensorMap) -> Result<OutputMap> {
        let span = self.span.clone();
        let _guard = span.enter();

        let prepared = prepare_inputs(&self.info, &self.input_names, data)?;
        let tract_inputs: TVec<TValue> = prepared
            .iter()
            .map(|(_, tensor)| convert_input(tensor))
            .collect::<Result<TVec<_>>>()?;

        let outputs = self
            .plan
            .run(tract_inputs)
            .map_err(|e| LauncherError::Inference(e.to_string()))?;

        let mut results = OutputMap::new();

        for (idx, output) in outputs.iter().enumerate() {
            let name = self
                .output_names
                .get(idx)
                .cloned()
                .unwrap_or_else(|| format!("output_{}", idx));

            let tensor = if let Some(arr) = tract_output::<f32>(output) {
                OutputTensor::Float32(arr?)
            } else if let Some(arr) = tract_output::<i64>(output) {
                OutputTensor::Int64(arr?)
            } else if let Some(arr) = tract_output::<i32>(output) {
                OutputTensor::Int32(arr?)
            } else if let Some(arr) = tract_output::<f64>(output) {
                OutputTensor::Float64(arr?)
            } else if let Some(arr) = tract_output::<u8>(output) {
                OutputTensor::Uint8(arr?)
            } else {
                return Err(LauncherError::OutputExtraction(format!(
                    "unsupported output type for '{}'",
                    name
                )));
            };

            results.insert(name, tensor);
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

/// Tensor names of the graph inputs or outputs, in graph order.
fn outlet_names(model: &InferenceModel, inputs: bool) -> Result<Vec<String>> {
    let outlets = if inputs {
        model.input_outlets()
    } else {
        model.output_outlets()
    }
    .map_err(|e| LauncherError::ModelLoad(e.to_string()))?;

    Ok(outlets
        .iter()
        .map(|outlet| {
            model
                .outlet_label(*outlet)
                .map(str::to_string)
                .unwrap_or_else(|| model.node(outlet.node).name.clone())
        })
        .collect())
}

/// Apply input shapes to a copy of the source graph and make it runnable.
fn build_plan(
    source: &InferenceModel,
    input_names: &[String],
    shapes: &ShapeMap,
    mode: CompileMode,
) -> TractResult<Plan> {
    let mut model = source.clone();

    for (ix, name) in input_names.iter().enumerate() {
        if let Some(shape) = shapes.get(name) {
            let dt = model
                .input_fact(ix)?
                .datum_type()
                .unwrap_or_else(|| f32::datum_type());
            let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
            model.set_input_fact(ix, InferenceFact::dt_shape(dt, dims.as_slice()))?;
        }
    }

    let typed = model.into_typed()?;
    let typed = match mode {
        CompileMode::Baseline => typed,
        CompileMode::Optimized => typed.into_optimized()?,
    };
    typed.into_runnable()
}

fn convert_input(tensor: &InputTensor) -> Result<TValue> {
    match tensor {
        InputTensor::Float32(arr) => tract_input(arr),
        InputTensor::Float64(arr) => tract_input(arr),
        InputTensor::Int32(arr) => tract_input(arr),
        InputTensor::Int64(arr) => tract_input(arr),
        InputTensor::Uint8(arr) => tract_input(arr),
    }
}

fn tract_input<T: Datum>(arr: &ArrayD<T>) -> Result<TValue> {
    let data: Vec<T> = arr.iter().cloned().collect();
    let tract_tensor = tract_ndarray::ArrayD::from_shape_vec(tract_ndarray::IxDyn(arr.shape()), data)
        .map_err(|e| LauncherError::InvalidInput(e.to_string()))?;
    Ok(tract_tensor.into_tvalue())
}

/// Copy an output out of tract, `None` when it holds another element type.
fn tract_output<T: Datum>(value: &TValue) -> Option<Result<ArrayD<T>>> {
    let view = value.to_array_view::<T>().ok()?;
    let data: Vec<T> = view.iter().cloned().collect();
    Some(
        ArrayD::from_shape_vec(ndarray::IxDyn(view.shape()), data)
            .map_err(|e| LauncherError::OutputExtraction(e.to_string())),
    )
}

fn exchange_type(dt: DatumType) -> Option<TensorType> {
    match dt {
        DatumType::F32 => Some(TensorType::Float32),
        DatumType::F64 => Some(TensorType::Float64),
        DatumType::I32 => Some(TensorType::Int32),
        DatumType::I64 => Some(TensorType::Int64),
        DatumType::U8 => Some(TensorType::Uint8),
        _ => None,
    }
}

fn native_precision(dt: DatumType) -> &'static str {
    match dt {
        DatumType::F16 => "FP16",
        DatumType::I16 => "I16",
        DatumType::I8 => "I8",
        _ => "",
    }
}
