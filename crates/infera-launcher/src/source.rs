//! Model sources, constructor registry and launcher configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::backend::ShapeMap;
use crate::error::LauncherError;
use crate::Result;

/// Compute device a launcher places the model on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    /// CPU with the XNNPACK execution provider (ort only).
    Xnnpack,
}

impl FromStr for Device {
    type Err = LauncherError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CPU" => Ok(Device::Cpu),
            "XNNPACK" => Ok(Device::Xnnpack),
            other => Err(LauncherError::ModelLoad(format!("unknown device '{}'", other))),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("CPU"),
            Device::Xnnpack => f.write_str("XNNPACK"),
        }
    }
}

/// How the loaded graph is prepared for execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompileMode {
    /// Run the graph as loaded.
    #[default]
    Baseline,
    /// Run the fully optimised graph.
    Optimized,
}

impl FromStr for CompileMode {
    type Err = LauncherError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "baseline" => Ok(CompileMode::Baseline),
            "optimized" => Ok(CompileMode::Optimized),
            other => Err(LauncherError::UnsupportedMode(other.to_string())),
        }
    }
}

impl fmt::Display for CompileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileMode::Baseline => f.write_str("baseline"),
            CompileMode::Optimized => f.write_str("optimized"),
        }
    }
}

/// Where a model comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// A serialized whole-model artifact.
    Artifact { model_path: PathBuf },
    /// A registered constructor applied to a weights file.
    Constructor {
        module_name: String,
        model_name: String,
        model_path: PathBuf,
    },
}

impl ModelSource {
    /// Parse a descriptor. The presence of `module_name` selects
    /// [`ModelSource::Constructor`], which then also needs `model_name` and
    /// `model_path`.
    pub fn from_descriptor(descriptor: &Map<String, Value>) -> Result<Self> {
        let field = |key: &str| -> Result<String> {
            match descriptor.get(key) {
                Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
                Some(_) => Err(LauncherError::ModelLoad(format!(
                    "descriptor key '{}' must be a non-empty string",
                    key
                ))),
                None => Err(LauncherError::ModelLoad(format!(
                    "descriptor is missing required key '{}'",
                    key
                ))),
            }
        };

        if descriptor.contains_key("module_name") {
            Ok(ModelSource::Constructor {
                module_name: field("module_name")?,
                model_name: field("model_name")?,
                model_path: PathBuf::from(field("model_path")?),
            })
        } else {
            Ok(ModelSource::Artifact {
                model_path: PathBuf::from(field("model_path")?),
            })
        }
    }

    /// Inverse of [`ModelSource::from_descriptor`].
    pub fn to_descriptor(&self) -> Map<String, Value> {
        let mut map = Map::new();
        match self {
            ModelSource::Artifact { model_path } => {
                map.insert("model_path".into(), Value::String(model_path.display().to_string()));
            }
            ModelSource::Constructor {
                module_name,
                model_name,
                model_path,
            } => {
                map.insert("module_name".into(), Value::String(module_name.clone()));
                map.insert("model_name".into(), Value::String(model_name.clone()));
                map.insert("model_path".into(), Value::String(model_path.display().to_string()));
            }
        }
        map
    }

    pub fn model_path(&self) -> &Path {
        match self {
            ModelSource::Artifact { model_path } | ModelSource::Constructor { model_path, .. } => {
                model_path
            }
        }
    }
}

/// Builds a serialized model graph from a weights file.
pub type ModelConstructor = Box<dyn Fn(&Path) -> Result<Vec<u8>> + Send + Sync>;

/// Constructors addressable by `<module_name>::<model_name>`.
///
/// Populate the registry once at startup and hand it to launcher
/// construction.
#[derive(Default)]
pub struct ModelRegistry {
    constructors: BTreeMap<String, ModelConstructor>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(module_name: &str, model_name: &str) -> String {
        format!("{}::{}", module_name, model_name)
    }

    /// Register a constructor, replacing any previous one with the same id.
    pub fn register<F>(&mut self, module_name: &str, model_name: &str, constructor: F)
    where
        F: Fn(&Path) -> Result<Vec<u8>> + Send + Sync + 'static,
    {
        self.constructors
            .insert(Self::key(module_name, model_name), Box::new(constructor));
    }

    /// Produce the serialized model for a source.
    pub fn resolve(&self, source: &ModelSource) -> Result<Vec<u8>> {
        let bytes = match source {
            ModelSource::Artifact { model_path } => read_model_file(model_path)?,
            ModelSource::Constructor {
                module_name,
                model_name,
                model_path,
            } => {
                let key = Self::key(module_name, model_name);
                let constructor = self.constructors.get(&key).ok_or_else(|| {
                    LauncherError::ModelLoad(format!("no constructor registered for '{}'", key))
                })?;
                debug!("Building model '{}' from weights {}", key, model_path.display());
                constructor(model_path)?
            }
        };

        if bytes.is_empty() {
            return Err(LauncherError::ModelLoad(format!(
                "model source {} is empty",
                source.model_path().display()
            )));
        }

        Ok(bytes)
    }
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("constructors", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn read_model_file(path: &Path) -> Result<Vec<u8>> {
    debug!("Reading model from: {}", path.display());
    std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            LauncherError::ModelLoad(format!("model file not found: {}", path.display()))
        }
        _ => LauncherError::Io(e),
    })
}

/// Launcher configuration as stored in config files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Backend name: `onnxruntime` or `tract`.
    pub provider: String,

    /// Model source descriptor, see [`ModelSource::from_descriptor`].
    pub source: Map<String, Value>,

    /// Compute device name.
    pub device: String,

    /// Compile mode name: `baseline` or `optimized`.
    pub mode: String,

    /// Initial input shapes. Inputs not listed keep the shape the model declares.
    pub inputs: ShapeMap,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            provider: "onnxruntime".to_string(),
            source: ModelSource::Artifact {
                model_path: PathBuf::from("model.onnx"),
            }
            .to_descriptor(),
            device: "CPU".to_string(),
            mode: "baseline".to_string(),
            inputs: ShapeMap::new(),
        }
    }
}

impl LauncherConfig {
    /// Configuration for an artifact on disk with default settings.
    pub fn for_model<P: Into<PathBuf>>(model_path: P) -> Self {
        Self {
            source: ModelSource::Artifact {
                model_path: model_path.into(),
            }
            .to_descriptor(),
            ..Self::default()
        }
    }

    pub fn model_source(&self) -> Result<ModelSource> {
        ModelSource::from_descriptor(&self.source)
    }

    pub fn device(&self) -> Result<Device> {
        self.device.parse()
    }

    pub fn mode(&self) -> Result<CompileMode> {
        self.mode.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn descriptor(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_artifact_descriptor() {
        let source =
            ModelSource::from_descriptor(&descriptor(json!({"model_path": "net.onnx"}))).unwrap();
        assert_eq!(
            source,
            ModelSource::Artifact {
                model_path: PathBuf::from("net.onnx")
            }
        );
    }

    #[test]
    fn test_module_name_selects_constructor() {
        let source = ModelSource::from_descriptor(&descriptor(json!({
            "module_name": "zoo",
            "model_name": "resnet",
            "model_path": "resnet.bin",
        })))
        .unwrap();
        assert!(matches!(source, ModelSource::Constructor { .. }));
        assert_eq!(ModelSource::from_descriptor(&source.to_descriptor()).unwrap(), source);
    }

    #[test]
    fn test_incomplete_constructor_descriptor() {
        let err = ModelSource::from_descriptor(&descriptor(json!({
            "module_name": "zoo",
            "model_path": "resnet.bin",
        })))
        .unwrap_err();
        assert!(matches!(err, LauncherError::ModelLoad(msg) if msg.contains("model_name")));
    }

    #[test]
    fn test_missing_model_path() {
        let err = ModelSource::from_descriptor(&Map::new()).unwrap_err();
        assert!(matches!(err, LauncherError::ModelLoad(_)));
    }

    #[test]
    fn test_compile_mode_parse() {
        assert_eq!("baseline".parse::<CompileMode>().unwrap(), CompileMode::Baseline);
        assert_eq!("optimized".parse::<CompileMode>().unwrap(), CompileMode::Optimized);
        let err = "scripted-fast".parse::<CompileMode>().unwrap_err();
        assert!(matches!(err, LauncherError::UnsupportedMode(mode) if mode == "scripted-fast"));
    }

    #[test]
    fn test_device_parse() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("XNNPACK".parse::<Device>().unwrap(), Device::Xnnpack);
        assert!("GPU.0".parse::<Device>().is_err());
    }

    #[test]
    fn test_registry_resolves_constructor() {
        let mut registry = ModelRegistry::new();
        registry.register("zoo", "tiny", |path: &Path| {
            Ok(path.display().to_string().into_bytes())
        });

        let source = ModelSource::Constructor {
            module_name: "zoo".into(),
            model_name: "tiny".into(),
            model_path: PathBuf::from("weights.bin"),
        };
        assert_eq!(registry.resolve(&source).unwrap(), b"weights.bin".to_vec());
    }

    #[test]
    fn test_registry_unknown_constructor() {
        let registry = ModelRegistry::new();
        let source = ModelSource::Constructor {
            module_name: "zoo".into(),
            model_name: "missing".into(),
            model_path: PathBuf::from("weights.bin"),
        };
        let err = registry.resolve(&source).unwrap_err();
        assert!(matches!(err, LauncherError::ModelLoad(msg) if msg.contains("zoo::missing")));
    }

    #[test]
    fn test_registry_missing_artifact() {
        let registry = ModelRegistry::new();
        let source = ModelSource::Artifact {
            model_path: PathBuf::from("/nonexistent/model.onnx"),
        };
        assert!(matches!(
            registry.resolve(&source).unwrap_err(),
            LauncherError::ModelLoad(_)
        ));
    }

    #[test]
    fn test_registry_empty_artifact() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let source = ModelSource::Artifact {
            model_path: file.path().to_path_buf(),
        };
        let err = ModelRegistry::new().resolve(&source).unwrap_err();
        assert!(matches!(err, LauncherError::ModelLoad(msg) if msg.contains("empty")));
    }

    #[test]
    fn test_config_round_trip() {
        let mut config = LauncherConfig::for_model("models/net.onnx");
        config.inputs.insert("data".into(), vec![1, 3, 224, 224]);

        let json = serde_json::to_string(&config).unwrap();
        let parsed: LauncherConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
        assert_eq!(
            parsed.model_source().unwrap().model_path(),
            Path::new("models/net.onnx")
        );
        assert_eq!(parsed.device().unwrap(), Device::Cpu);
        assert_eq!(parsed.mode().unwrap(), CompileMode::Baseline);
    }
}
