//! Boundary to the neural network runtime
//!
//! Loading models and running them is someone else's job. The pipeline only
//! needs "run this model with these named inputs and hand back the named
//! outputs", which is what [`InferenceEngine`] expresses.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use burn::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Error, Result};

/// Which network a handle refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    TextEncoder,
    Unet,
    VaeEncoder,
    VaeDecoder,
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelRole::TextEncoder => "text encoder",
            ModelRole::Unet => "unet",
            ModelRole::VaeEncoder => "vae encoder",
            ModelRole::VaeDecoder => "vae decoder",
        };
        f.write_str(name)
    }
}

/// A model the engine knows how to run
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelHandle {
    pub role: ModelRole,
    pub path: PathBuf,
}

impl ModelHandle {
    pub fn new(role: ModelRole, path: impl Into<PathBuf>) -> Self {
        Self {
            role,
            path: path.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model {} is not loaded", .0.display())]
    NotLoaded(PathBuf),

    #[error("missing input {0:?}")]
    MissingInput(String),

    #[error("{role} run failed: {message}")]
    Run { role: ModelRole, message: String },
}

/// Named tensors passed to and returned from a model
pub type NamedTensors = HashMap<String, TensorData>;

/// Synchronous model runner
pub trait InferenceEngine {
    fn run(
        &self,
        model: &ModelHandle,
        inputs: Vec<(String, TensorData)>,
    ) -> std::result::Result<NamedTensors, EngineError>;
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for &E {
    fn run(
        &self,
        model: &ModelHandle,
        inputs: Vec<(String, TensorData)>,
    ) -> std::result::Result<NamedTensors, EngineError> {
        (**self).run(model, inputs)
    }
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for Arc<E> {
    fn run(
        &self,
        model: &ModelHandle,
        inputs: Vec<(String, TensorData)>,
    ) -> std::result::Result<NamedTensors, EngineError> {
        (**self).run(model, inputs)
    }
}

/// Remove the output `name` and load it as a rank-`D` float tensor
pub(crate) fn take_output<B: Backend, const D: usize>(
    outputs: &mut NamedTensors,
    model: &ModelHandle,
    name: &str,
    device: &B::Device,
) -> Result<Tensor<B, D>> {
    let data = outputs.remove(name).ok_or_else(|| Error::MissingOutput {
        model: model.role,
        name: name.to_string(),
    })?;

    if data.shape.len() != D {
        return Err(Error::Shape(format!(
            "{} output {name:?} has shape {:?}, expected rank {D}",
            model.role, data.shape
        )));
    }

    Ok(Tensor::from_data(data.convert::<f32>(), device))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_take_output_checks_rank() {
        let device = Default::default();
        let model = ModelHandle::new(ModelRole::Unet, "unet.onnx");
        let mut outputs = NamedTensors::new();
        outputs.insert(
            "out_sample".to_string(),
            TensorData::new(vec![0.0f32; 4], [1, 4]),
        );

        let result = take_output::<TestBackend, 4>(&mut outputs.clone(), &model, "out_sample", &device);
        assert!(matches!(result, Err(Error::Shape(_))));

        let tensor = take_output::<TestBackend, 2>(&mut outputs, &model, "out_sample", &device).unwrap();
        assert_eq!(tensor.dims(), [1, 4]);
    }

    #[test]
    fn test_take_output_reports_missing_name() {
        let device = Default::default();
        let model = ModelHandle::new(ModelRole::VaeDecoder, "decoder.onnx");
        let result = take_output::<TestBackend, 4>(&mut NamedTensors::new(), &model, "sample", &device);
        match result {
            Err(Error::MissingOutput { model, name }) => {
                assert_eq!(model, ModelRole::VaeDecoder);
                assert_eq!(name, "sample");
            }
            other => panic!("unexpected result: {:?}", other.map(|t| t.dims())),
        }
    }
}
