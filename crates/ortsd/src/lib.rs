//! ortsd: Stable Diffusion sampling driven by an external inference engine
//!
//! The networks themselves (text encoder, UNet, VAE) are run by an
//! [`InferenceEngine`] supplied by the caller. This crate owns everything
//! around them: prompt weighting and chunking, noise scheduling,
//! classifier-free guidance and the request lifecycle.
//!
//! # Example
//!
//! ```ignore
//! use ortsd::{Context, ContextConfig};
//!
//! let config = ContextConfig::from_file("sd15.json")?;
//! let context = Context::<NdArray, _>::new(config, &engine, &device)?;
//!
//! context.prepare("a (red:1.3) fox in the snow", "blurry")?;
//! let image = context.inference(None)?; // [1, 3, 512, 512] in [0, 1]
//! context.release()?;
//! ```

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod models;
pub mod pipeline;

pub use ortsd_clip as clip;
pub use ortsd_samplers as samplers;

pub use config::{ContextConfig, ModelIoNames, ModelPaths, TextEncoderIo, UnetIo, VaeIo};
pub use context::Context;
pub use engine::{EngineError, InferenceEngine, ModelHandle, ModelRole, NamedTensors};
pub use error::{Error, Result};
pub use models::{TextEncoder, Unet, Vae};
pub use pipeline::{apply_guidance, Conditioning, DenoisingLoop};
