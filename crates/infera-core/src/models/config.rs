//! Configuration for a launcher and the model wrapped around it.

use std::path::Path;

use infera_launcher::{create_launcher, Launcher, LauncherConfig, ModelRegistry};
use serde::{Deserialize, Serialize};

use crate::models::classification::Classification;
use crate::params::ParameterMap;
use crate::Result;

/// Main configuration for infera.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferaConfig {
    /// Which backend runs which model.
    pub launcher: LauncherConfig,

    /// Parameters handed to the model wrapper.
    pub model: ParameterMap,
}

impl InferaConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> std::result::Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> std::result::Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;
        std::fs::write(path, content)
    }

    /// Create the configured launcher.
    pub fn create_launcher(&self, registry: &ModelRegistry) -> Result<Box<dyn Launcher>> {
        Ok(create_launcher(&self.launcher, registry)?)
    }

    /// Build a classifier against the launcher's current network info.
    pub fn classification(&self, launcher: &dyn Launcher) -> Result<Classification> {
        Classification::new(launcher.network_info(), &self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("infera.json");

        let mut config = InferaConfig {
            launcher: LauncherConfig::for_model("models/resnet50.onnx"),
            ..Default::default()
        };
        config.launcher.mode = "optimized".to_string();
        config.model.insert("topk".to_string(), json!(5));
        config.save(&path).unwrap();

        let loaded = InferaConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{"model": {"topk": 3}}"#).unwrap();

        let loaded = InferaConfig::from_file(&path).unwrap();
        assert_eq!(loaded.launcher, LauncherConfig::default());
        assert_eq!(loaded.model.get("topk"), Some(&json!(3)));
    }

    #[test]
    fn test_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = InferaConfig::from_file(&path).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_classification_from_launcher() {
        let launcher = crate::testing::StaticLauncher::new(
            &[("data", &[1, 3, 4, 4])],
            "prob",
            vec![0.5, 0.5],
        );
        let mut config = InferaConfig::default();
        config.model.insert("topk".to_string(), json!(2));

        let model = config.classification(&launcher).unwrap();
        assert_eq!(model.topk(), 2);
    }
}
