//! Image classification wrapper.
//!
//! Converts a single score vector into the top-k `(index, label, score)`
//! predictions. Scores that do not already sum to one are normalized with a
//! softmax over the selected entries.

use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use image::DynamicImage;
use infera_launcher::{NetworkInfo, OutputMap, TensorMap};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::ModelError;
use crate::models::image_model::{ImageMeta, ImagePreprocessor};
use crate::models::{check_io_number, Model};
use crate::params::{NumericType, Parameter, ParameterMap, ParameterSchema, ResolvedParameters};
use crate::Result;

/// Label inserted at index 0 when the model has one class more than the labels.
pub const BACKGROUND_LABEL: &str = "other";

/// Tolerance for deciding that scores already form a probability distribution.
const PROBABILITY_TOLERANCE: f32 = 0.01;

/// One classification result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub index: usize,
    pub label: String,
    pub score: f32,
}

/// Resolved classification settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationConfig {
    /// Number of predictions returned per image.
    pub topk: usize,
    /// Class labels, index-aligned with the model output when present.
    pub labels: Option<Vec<String>>,
}

impl ClassificationConfig {
    /// Read the settings out of resolved parameters.
    ///
    /// `classes` is the output's class count, `None` when dynamic.
    pub fn from_parameters(params: &ResolvedParameters, classes: Option<usize>) -> Result<Self> {
        let topk = params.get_i64("topk").unwrap_or(1).max(1) as usize;

        let labels = match params.get_str("path_to_labels") {
            Some(path) => Some(load_labels(Path::new(path))?),
            None => params.get_string_list("labels"),
        };
        let labels = labels.filter(|labels| {
            if labels.is_empty() {
                debug!("Label list is empty, predictions will carry no labels");
            }
            !labels.is_empty()
        });
        let labels = match (labels, classes) {
            (Some(labels), Some(classes)) => Some(reconcile_labels(labels, classes)?),
            (Some(labels), None) => {
                debug!(
                    "Class dimension is dynamic, keeping {} labels as given",
                    labels.len()
                );
                Some(labels)
            }
            (None, _) => None,
        };

        Ok(Self { topk, labels })
    }
}

/// Classification model over one image input and one score output.
#[derive(Debug, Clone)]
pub struct Classification {
    network_info: Arc<NetworkInfo>,
    preprocessor: ImagePreprocessor,
    config: ClassificationConfig,
    out_layer_name: String,
}

impl Classification {
    /// Parameters accepted by [`Classification::new`].
    pub fn parameters() -> ParameterSchema {
        let mut schema = ImagePreprocessor::parameters();
        schema.update_default("resize_type", json!("crop"));
        schema
            .with(
                "topk",
                Parameter::numerical(NumericType::Int)
                    .with_default(json!(1))
                    .with_min(1.0)
                    .with_description("Number of most likely labels to return"),
            )
            .with(
                "labels",
                Parameter::list().with_description("List of class labels"),
            )
            .with(
                "path_to_labels",
                Parameter::string()
                    .with_description("Path to file with labels. Overrides the labels list"),
            )
    }

    /// Build a classifier for the given network.
    pub fn new(network_info: Arc<NetworkInfo>, parameters: &ParameterMap) -> Result<Self> {
        check_io_number(&network_info, 1..=1, 1..=1)?;
        let (out_layer_name, classes) = resolve_output(&network_info)?;

        let mut schema = Self::parameters();
        if let Some(classes) = classes {
            schema.set_max("topk", classes as f64);
        }
        let params = schema.resolve(parameters)?;

        let preprocessor = ImagePreprocessor::new(&network_info, &params)?;
        let config = ClassificationConfig::from_parameters(&params, classes)?;

        debug!(
            "Classification on '{}' -> '{}', topk={}, {} labels",
            preprocessor.input_name(),
            out_layer_name,
            config.topk,
            config.labels.as_ref().map_or(0, Vec::len)
        );

        Ok(Self {
            network_info,
            preprocessor,
            config,
            out_layer_name,
        })
    }

    pub fn topk(&self) -> usize {
        self.config.topk
    }

    pub fn labels(&self) -> Option<&[String]> {
        self.config.labels.as_deref()
    }

    pub fn preprocessor(&self) -> &ImagePreprocessor {
        &self.preprocessor
    }

    /// Top-k predictions for one score vector.
    ///
    /// NaN and infinite scores are not filtered.
    pub fn top_predictions(&self, scores: &[f32]) -> Vec<Prediction> {
        let k = self.config.topk.min(scores.len());
        if k == 0 {
            return Vec::new();
        }

        let by_score = |a: &usize, b: &usize| -> Ordering {
            scores[*b].total_cmp(&scores[*a]).then(a.cmp(b))
        };
        let mut indices: Vec<usize> = (0..scores.len()).collect();
        indices.select_nth_unstable_by(k - 1, by_score);
        indices.truncate(k);
        indices.sort_unstable_by(by_score);

        let mut top: Vec<f32> = indices.iter().map(|&i| scores[i]).collect();
        let total: f32 = scores.iter().sum();
        if (total - 1.0).abs() > PROBABILITY_TOLERANCE {
            softmax(&mut top);
        }

        indices
            .into_iter()
            .zip(top)
            .map(|(index, score)| Prediction {
                index,
                label: self
                    .config
                    .labels
                    .as_ref()
                    .and_then(|labels| labels.get(index))
                    .cloned()
                    .unwrap_or_default(),
                score,
            })
            .collect()
    }
}

impl Model for Classification {
    type Input = DynamicImage;
    type Meta = ImageMeta;
    type Output = Vec<Prediction>;

    fn network_info(&self) -> &NetworkInfo {
        &self.network_info
    }

    fn preprocess(&self, input: DynamicImage) -> Result<(TensorMap, ImageMeta)> {
        self.preprocessor.preprocess(&input)
    }

    fn postprocess(&self, outputs: &OutputMap, _meta: &ImageMeta) -> Result<Vec<Prediction>> {
        let output = outputs.get(&self.out_layer_name).ok_or_else(|| {
            ModelError::Output(format!("missing output '{}'", self.out_layer_name))
        })?;
        let scores = output.to_f32();

        let non_trivial = scores.shape().iter().filter(|&&d| d > 1).count();
        if non_trivial > 1 {
            return Err(ModelError::Output(format!(
                "expected a single score vector, got shape {:?}",
                scores.shape()
            ))
            .into());
        }

        let scores: Vec<f32> = scores.iter().copied().collect();
        Ok(self.top_predictions(&scores))
    }
}

/// Output layer name and its class count (`None` when dynamic).
fn resolve_output(info: &NetworkInfo) -> std::result::Result<(String, Option<usize>), ModelError> {
    let (name, meta) = info
        .outputs_info
        .iter()
        .next()
        .ok_or_else(|| ModelError::Topology("model has no outputs".to_string()))?;

    let supported = match meta.shape.as_slice() {
        [_, _] => true,
        [_, _, 1, 1] => true,
        _ => false,
    };
    if !supported {
        return Err(ModelError::UnsupportedTopology(format!(
            "the classification model's output '{}' has shape {:?}; expected [B, C] or [B, C, 1, 1]",
            name, meta.shape
        )));
    }

    let classes = usize::try_from(meta.shape[1]).ok().filter(|&c| c > 0);
    Ok((name.clone(), classes))
}

/// Read labels from a `<id> <label>,<synonyms>` file.
pub fn load_labels(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)?;
    Ok(parse_labels(&content)?)
}

/// Parse labels file content. Blank lines are skipped.
pub fn parse_labels(content: &str) -> std::result::Result<Vec<String>, ModelError> {
    let mut labels = Vec::new();
    for (ix, line) in content.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let (_, rest) = line.split_once(' ').ok_or_else(|| ModelError::LabelFormat {
            line: ix + 1,
            content: line.to_string(),
        })?;
        let label = rest.split_once(',').map_or(rest, |(label, _)| label);
        labels.push(label.to_string());
    }
    Ok(labels)
}

fn reconcile_labels(
    mut labels: Vec<String>,
    classes: usize,
) -> std::result::Result<Vec<String>, ModelError> {
    if labels.len() + 1 == classes {
        warn!(
            "Model has {} classes but {} labels were given; inserting '{}' at index 0",
            classes,
            labels.len(),
            BACKGROUND_LABEL
        );
        labels.insert(0, BACKGROUND_LABEL.to_string());
    }
    if labels.len() != classes {
        return Err(ModelError::LabelCountMismatch {
            classes,
            labels: labels.len(),
        });
    }
    Ok(labels)
}

fn softmax(values: &mut [f32]) {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    for v in values.iter_mut() {
        *v /= sum;
    }
}
