//! UNet noise predictor wrapper

use burn::prelude::*;
use burn::tensor::Int;

use crate::config::UnetIo;
use crate::engine::{take_output, InferenceEngine, ModelHandle};
use crate::error::{Error, Result};

/// Noise predictor run through the engine
#[derive(Debug, Clone)]
pub struct Unet {
    handle: ModelHandle,
    io: UnetIo,
}

impl Unet {
    pub fn new(handle: ModelHandle, io: UnetIo) -> Self {
        Self { handle, io }
    }

    pub fn handle(&self) -> &ModelHandle {
        &self.handle
    }

    /// Predict the model output for `sample` at `timestep`
    ///
    /// The output must have the same shape as the sample.
    pub fn predict<B: Backend, E: InferenceEngine>(
        &self,
        engine: &E,
        sample: Tensor<B, 4>,
        timestep: Tensor<B, 1, Int>,
        embedding: Tensor<B, 3>,
    ) -> Result<Tensor<B, 4>> {
        let device = sample.device();
        let dims = sample.dims();

        let inputs = vec![
            (self.io.sample.clone(), sample.into_data().convert::<f32>()),
            (self.io.timestep.clone(), timestep.into_data().convert::<i64>()),
            (
                self.io.encoder_hidden_states.clone(),
                embedding.into_data().convert::<f32>(),
            ),
        ];
        let mut outputs = engine.run(&self.handle, inputs)?;
        let noise: Tensor<B, 4> =
            take_output(&mut outputs, &self.handle, &self.io.out_sample, &device)?;

        if noise.dims() != dims {
            return Err(Error::Shape(format!(
                "unet returned {:?} for a sample of {dims:?}",
                noise.dims()
            )));
        }
        Ok(noise)
    }
}
