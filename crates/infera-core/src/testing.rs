//! In-memory launcher used by unit tests.

use std::sync::Arc;

use infera_launcher::{
    CompileMode, LayerMap, Launcher, LauncherError, Metadata, NetworkInfo, OutputMap,
    OutputTensor, ShapeMap, TensorMap, TensorType,
};
use ndarray::{ArrayD, IxDyn};

type LauncherResult<T> = std::result::Result<T, LauncherError>;

pub(crate) fn layers(specs: &[(&str, &[i64])]) -> LayerMap {
    specs
        .iter()
        .map(|(name, shape)| {
            let meta = Metadata::new(*name)
                .with_shape(shape.to_vec())
                .with_layout(infera_launcher::default_layout(shape.len()))
                .with_type(TensorType::Float32);
            (name.to_string(), meta)
        })
        .collect()
}

/// Launcher that returns the same output values for every request.
pub(crate) struct StaticLauncher {
    inputs: LayerMap,
    outputs: LayerMap,
    values: Vec<f32>,
    generation: u64,
    info: Arc<NetworkInfo>,
    calls: usize,
}

impl StaticLauncher {
    /// One output named `output` with shape `[1, values.len()]`.
    pub(crate) fn new(inputs: &[(&str, &[i64])], output: &str, values: Vec<f32>) -> Self {
        let shape = [1, values.len() as i64];
        Self::with_outputs(inputs, &[(output, &shape)], values)
    }

    pub(crate) fn with_outputs(
        inputs: &[(&str, &[i64])],
        outputs: &[(&str, &[i64])],
        values: Vec<f32>,
    ) -> Self {
        let inputs = layers(inputs);
        let outputs = layers(outputs);
        let info = NetworkInfo::new(inputs.clone(), outputs.clone(), 0)
            .expect("distinct input and output names");
        Self {
            inputs,
            outputs,
            values,
            generation: 0,
            info: Arc::new(info),
            calls: 0,
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls
    }
}

impl Launcher for StaticLauncher {
    fn provider(&self) -> &'static str {
        "static"
    }

    fn load_model(&mut self, _mode: CompileMode) -> LauncherResult<()> {
        Ok(())
    }

    fn get_input_layers(&self) -> LauncherResult<LayerMap> {
        Ok(self.inputs.clone())
    }

    fn get_output_layers(&self) -> LauncherResult<LayerMap> {
        Ok(self.outputs.clone())
    }

    fn reshape_model(&mut self, new_shape: &ShapeMap) -> LauncherResult<()> {
        for (name, shape) in new_shape {
            let meta = self
                .inputs
                .get_mut(name)
                .ok_or_else(|| LauncherError::Reshape(format!("model has no input '{}'", name)))?;
            meta.shape = shape.clone();
        }
        self.generation += 1;
        self.info = Arc::new(NetworkInfo::from_launcher(&*self)?);
        Ok(())
    }

    fn infer_sync(&mut self, data: TensorMap) -> LauncherResult<OutputMap> {
        for (name, meta) in &self.inputs {
            let tensor = data
                .get(name)
                .ok_or_else(|| LauncherError::Inference(format!("missing input '{}'", name)))?;
            if !meta.accepts(tensor.shape()) {
                return Err(LauncherError::ShapeMismatch {
                    name: name.clone(),
                    expected: meta.shape.clone(),
                    actual: tensor.shape().to_vec(),
                });
            }
        }
        self.calls += 1;

        self.outputs
            .iter()
            .map(|(name, meta)| {
                let shape: Vec<usize> = meta.shape.iter().map(|&d| d.max(1) as usize).collect();
                let arr = ArrayD::from_shape_vec(IxDyn(&shape), self.values.clone())
                    .map_err(|e| LauncherError::OutputExtraction(e.to_string()))?;
                Ok((name.clone(), OutputTensor::Float32(arr)))
            })
            .collect()
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    fn network_info(&self) -> Arc<NetworkInfo> {
        Arc::clone(&self.info)
    }
}
