//! Subcommands and the helpers they share.

pub mod classify;
pub mod config;
pub mod inspect;

use std::path::{Path, PathBuf};

use infera_core::{InferaConfig, Launcher, ModelRegistry, ShapeMap};
use tracing::{debug, info};

/// Output format shared by commands that print results.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// CSV output
    Csv,
    /// Plain text summary
    Text,
}

/// Load the configuration file, or defaults when none is given.
pub fn load_config(config_path: Option<&str>) -> anyhow::Result<InferaConfig> {
    match config_path {
        Some(path) => {
            let path = Path::new(path);
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            debug!("Loading configuration from {}", path.display());
            Ok(InferaConfig::from_file(path)?)
        }
        None => Ok(InferaConfig::default()),
    }
}

/// Point the launcher at a model artifact given on the command line.
pub fn override_model(config: &mut InferaConfig, model: Option<&PathBuf>) {
    if let Some(model) = model {
        let mut launcher = infera_core::LauncherConfig::for_model(model.clone());
        launcher.provider = std::mem::take(&mut config.launcher.provider);
        launcher.device = std::mem::take(&mut config.launcher.device);
        launcher.mode = std::mem::take(&mut config.launcher.mode);
        launcher.inputs = std::mem::take(&mut config.launcher.inputs);
        config.launcher = launcher;
    }
}

/// Parse `name=1,3,224,224` into an input name and shape.
pub fn parse_shape(arg: &str) -> anyhow::Result<(String, Vec<i64>)> {
    let (name, dims) = arg
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("Invalid shape '{}', expected name=d0,d1,...", arg))?;

    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("Invalid shape '{}': missing input name", arg);
    }

    let dims = dims
        .split(',')
        .map(|d| {
            d.trim()
                .parse::<i64>()
                .map_err(|_| anyhow::anyhow!("Invalid dimension '{}' in '{}'", d.trim(), arg))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok((name.to_string(), dims))
}

/// Create the launcher and apply any requested reshape.
pub fn open_launcher(config: &InferaConfig, reshape: &[String]) -> anyhow::Result<Box<dyn Launcher>> {
    let shapes = reshape
        .iter()
        .map(|s| parse_shape(s))
        .collect::<anyhow::Result<ShapeMap>>()?;

    let registry = ModelRegistry::new();
    let mut launcher = config.create_launcher(&registry)?;
    info!("Loaded model with {} launcher", launcher.provider());

    if !shapes.is_empty() {
        launcher.reshape_model(&shapes)?;
        debug!("Reshaped inputs: {:?}", shapes);
    }

    Ok(launcher)
}
