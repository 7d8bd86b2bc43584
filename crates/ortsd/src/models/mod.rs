//! Engine-backed model wrappers
//!
//! Each wrapper knows the handle and tensor names of one network and converts
//! between burn tensors and the engine's named [`TensorData`] maps.
//!
//! [`TensorData`]: burn::tensor::TensorData

mod clip;
mod unet;
mod vae;

pub use clip::TextEncoder;
pub use unet::Unet;
pub use vae::Vae;
