//! Task-specific model wrappers.

pub mod classification;
pub mod config;
pub mod image_model;

use std::ops::RangeInclusive;

use infera_launcher::{Launcher, NetworkInfo, OutputMap, TensorMap};
use tracing::trace;

use crate::error::ModelError;
use crate::Result;

/// Pre- and post-processing around a launcher.
///
/// A model wraps the [`NetworkInfo`] snapshot taken when it was built. It
/// does not own the launcher; [`Model::infer`] borrows it for one call.
pub trait Model {
    /// Raw input accepted by [`Model::preprocess`].
    type Input;
    /// Side information carried from preprocess to postprocess.
    type Meta;
    /// Task-specific result.
    type Output;

    /// Tensor contract the model was built against.
    fn network_info(&self) -> &NetworkInfo;

    /// Turn raw input into named input tensors.
    fn preprocess(&self, input: Self::Input) -> Result<(TensorMap, Self::Meta)>;

    /// Turn raw output tensors into the task result.
    fn postprocess(&self, outputs: &OutputMap, meta: &Self::Meta) -> Result<Self::Output>;

    /// Run preprocess, one synchronous inference and postprocess.
    ///
    /// Fails with [`ModelError::StaleNetworkInfo`] if the launcher has been
    /// reshaped since the model was built.
    fn infer(&self, launcher: &mut dyn Launcher, input: Self::Input) -> Result<Self::Output> {
        let info = self.network_info();
        if info.is_stale_for(&*launcher) {
            return Err(ModelError::StaleNetworkInfo {
                snapshot: info.generation(),
                current: launcher.generation(),
            }
            .into());
        }

        let (inputs, meta) = self.preprocess(input)?;
        trace!("Running inference on {} input(s)", inputs.len());
        let outputs = launcher.infer_sync(inputs)?;
        self.postprocess(&outputs, &meta)
    }
}

/// Check the number of model inputs and outputs.
pub fn check_io_number(
    info: &NetworkInfo,
    inputs: RangeInclusive<usize>,
    outputs: RangeInclusive<usize>,
) -> std::result::Result<(), ModelError> {
    let found = info.inputs_info.len();
    if !inputs.contains(&found) {
        return Err(ModelError::Topology(format!(
            "expected {} input(s), got {}",
            describe(&inputs),
            found
        )));
    }

    let found = info.outputs_info.len();
    if !outputs.contains(&found) {
        return Err(ModelError::Topology(format!(
            "expected {} output(s), got {}",
            describe(&outputs),
            found
        )));
    }

    Ok(())
}

fn describe(range: &RangeInclusive<usize>) -> String {
    if range.start() == range.end() {
        range.start().to_string()
    } else if *range.end() == usize::MAX {
        format!("at least {}", range.start())
    } else {
        format!("{} to {}", range.start(), range.end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{layers, StaticLauncher};

    #[test]
    fn test_check_io_number() {
        let info = NetworkInfo::new(
            layers(&[("data", &[1, 3, 4, 4])]),
            layers(&[("prob", &[1, 10]), ("aux", &[1, 10])]),
            0,
        )
        .unwrap();

        assert!(check_io_number(&info, 1..=1, 1..=usize::MAX).is_ok());
        let err = check_io_number(&info, 1..=1, 1..=1).unwrap_err();
        assert!(matches!(err, ModelError::Topology(msg) if msg == "expected 1 output(s), got 2"));
        assert!(check_io_number(&info, 2..=3, 1..=2).is_err());
    }

    struct Echo {
        info: std::sync::Arc<NetworkInfo>,
    }

    impl Model for Echo {
        type Input = f32;
        type Meta = ();
        type Output = f32;

        fn network_info(&self) -> &NetworkInfo {
            &self.info
        }

        fn preprocess(&self, input: f32) -> Result<(TensorMap, ())> {
            let tensor = infera_launcher::InputTensor::from_f32(vec![input; 10], vec![1, 10])?;
            Ok((TensorMap::from([("data".to_string(), tensor)]), ()))
        }

        fn postprocess(&self, outputs: &OutputMap, _meta: &()) -> Result<f32> {
            Ok(outputs["prob"].to_f32().sum())
        }
    }

    #[test]
    fn test_infer_sequences_steps() {
        let mut launcher = StaticLauncher::new(&[("data", &[1, 10])], "prob", vec![0.5; 10]);
        let model = Echo {
            info: launcher.network_info(),
        };
        assert_eq!(model.infer(&mut launcher, 1.0).unwrap(), 5.0);
        assert_eq!(launcher.calls(), 1);
    }

    #[test]
    fn test_infer_rejects_stale_snapshot() {
        let mut launcher = StaticLauncher::new(&[("data", &[1, 10])], "prob", vec![0.5; 10]);
        let model = Echo {
            info: launcher.network_info(),
        };
        launcher
            .reshape_model(&infera_launcher::ShapeMap::from([("data".to_string(), vec![2, 10])]))
            .unwrap();

        let err = model.infer(&mut launcher, 1.0).unwrap_err();
        assert!(matches!(
            err,
            crate::InferaError::Model(ModelError::StaleNetworkInfo {
                snapshot: 0,
                current: 1
            })
        ));
        assert_eq!(launcher.calls(), 0);
    }
}
