//! Input/output contract of a loaded model.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::LauncherError;
use crate::metadata::Metadata;
use crate::{Launcher, Result};

/// Name-keyed tensor metadata.
pub type LayerMap = BTreeMap<String, Metadata>;

/// Snapshot of a launcher's inputs and outputs.
///
/// A snapshot records the launcher generation it was taken at. Reshaping the
/// launcher bumps its generation, after which [`NetworkInfo::is_stale_for`]
/// reports the snapshot as outdated.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NetworkInfo {
    pub inputs_info: LayerMap,
    pub outputs_info: LayerMap,
    generation: u64,
}

impl NetworkInfo {
    /// Build a snapshot from already queried layers.
    pub fn new(inputs_info: LayerMap, outputs_info: LayerMap, generation: u64) -> Result<Self> {
        if let Some(name) = inputs_info.keys().find(|name| outputs_info.contains_key(*name)) {
            return Err(LauncherError::DuplicateTensor(name.clone()));
        }

        Ok(Self {
            inputs_info,
            outputs_info,
            generation,
        })
    }

    /// Query both layer maps from a launcher.
    ///
    /// Both queries run under the same shared borrow, so no reshape can slip
    /// in between them.
    pub fn from_launcher<L: Launcher + ?Sized>(launcher: &L) -> Result<Self> {
        let inputs = launcher.get_input_layers()?;
        let outputs = launcher.get_output_layers()?;
        Self::new(inputs, outputs, launcher.generation())
    }

    /// Look up an input by name.
    pub fn input(&self, name: &str) -> Result<&Metadata> {
        self.inputs_info
            .get(name)
            .ok_or_else(|| LauncherError::UnknownTensor(name.to_string()))
    }

    /// Look up an output by name.
    pub fn output(&self, name: &str) -> Result<&Metadata> {
        self.outputs_info
            .get(name)
            .ok_or_else(|| LauncherError::UnknownTensor(name.to_string()))
    }

    /// Launcher generation this snapshot was taken at.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the launcher has been reshaped since this snapshot.
    pub fn is_stale_for<L: Launcher + ?Sized>(&self, launcher: &L) -> bool {
        self.generation != launcher.generation()
    }
}
