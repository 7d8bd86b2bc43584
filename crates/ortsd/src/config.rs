//! Context configuration
//!
//! One JSON document describes everything a [`crate::Context`] needs: model
//! locations, scheduler and tokenizer options, tensor names and the sampling
//! parameters. Every field except the model paths has a default.

use std::fs;
use std::path::{Path, PathBuf};

use ortsd_clip::TokenizerConfig;
use ortsd_samplers::{SchedulerConfig, SchedulerKind};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::engine::{ModelHandle, ModelRole};
use crate::error::{Error, Result};

/// Locations of the four networks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPaths {
    pub text_encoder: PathBuf,
    pub unet: PathBuf,
    pub vae_encoder: PathBuf,
    pub vae_decoder: PathBuf,
}

impl ModelPaths {
    pub fn handle(&self, role: ModelRole) -> ModelHandle {
        let path = match role {
            ModelRole::TextEncoder => &self.text_encoder,
            ModelRole::Unet => &self.unet,
            ModelRole::VaeEncoder => &self.vae_encoder,
            ModelRole::VaeDecoder => &self.vae_decoder,
        };
        ModelHandle::new(role, path.clone())
    }
}

/// Tensor names of the text encoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextEncoderIo {
    pub input_ids: String,
    pub last_hidden_state: String,
}

impl Default for TextEncoderIo {
    fn default() -> Self {
        Self {
            input_ids: "input_ids".to_string(),
            last_hidden_state: "last_hidden_state".to_string(),
        }
    }
}

/// Tensor names of the UNet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnetIo {
    pub sample: String,
    pub timestep: String,
    pub encoder_hidden_states: String,
    pub out_sample: String,
}

impl Default for UnetIo {
    fn default() -> Self {
        Self {
            sample: "sample".to_string(),
            timestep: "timestep".to_string(),
            encoder_hidden_states: "encoder_hidden_states".to_string(),
            out_sample: "out_sample".to_string(),
        }
    }
}

/// Single-input, single-output tensor names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaeIo {
    pub input: String,
    pub output: String,
}

impl VaeIo {
    fn new(input: &str, output: &str) -> Self {
        Self {
            input: input.to_string(),
            output: output.to_string(),
        }
    }
}

/// Input and output tensor names for every model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelIoNames {
    pub text_encoder: TextEncoderIo,
    pub unet: UnetIo,
    pub vae_encoder: VaeIo,
    pub vae_decoder: VaeIo,
}

impl Default for ModelIoNames {
    fn default() -> Self {
        Self {
            text_encoder: TextEncoderIo::default(),
            unet: UnetIo::default(),
            vae_encoder: VaeIo::new("sample", "latent_sample"),
            vae_decoder: VaeIo::new("latent_sample", "sample"),
        }
    }
}

/// Everything a context needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub models: ModelPaths,
    pub scheduler_kind: SchedulerKind,
    pub scheduler: SchedulerConfig,
    pub tokenizer: TokenizerConfig,
    pub io_names: ModelIoNames,
    pub inference_steps: usize,
    pub width: usize,
    pub height: usize,
    pub latent_channels: usize,
    /// Classifier-free guidance is used when this is above 1
    pub guidance_scale: f32,
    /// DDIM eta, ignored by other schedulers
    pub random_intensity: f32,
    pub vae_scale_factor: f32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            models: ModelPaths::default(),
            scheduler_kind: SchedulerKind::Euler,
            scheduler: SchedulerConfig::default(),
            tokenizer: TokenizerConfig::default(),
            io_names: ModelIoNames::default(),
            inference_steps: 20,
            width: 512,
            height: 512,
            latent_channels: 4,
            guidance_scale: 7.5,
            random_intensity: 0.0,
            vae_scale_factor: 0.18215,
        }
    }
}

impl ContextConfig {
    /// Read and validate a JSON config file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let roles = [
            ModelRole::TextEncoder,
            ModelRole::Unet,
            ModelRole::VaeEncoder,
            ModelRole::VaeDecoder,
        ];
        for role in roles {
            if self.models.handle(role).path.as_os_str().is_empty() {
                return invalid(format!("{role} model path is empty"));
            }
        }

        if self.inference_steps == 0 {
            return invalid("inference_steps must be greater than zero".to_string());
        }
        if self.width == 0 || self.height == 0 || self.width % 8 != 0 || self.height % 8 != 0 {
            return invalid(format!(
                "image size {}x{} must be a non-zero multiple of 8",
                self.width, self.height
            ));
        }
        if self.latent_channels == 0 {
            return invalid("latent_channels must be greater than zero".to_string());
        }
        if self.vae_scale_factor.is_nan() || self.vae_scale_factor <= 0.0 {
            return invalid(format!(
                "vae_scale_factor must be positive, got {}",
                self.vae_scale_factor
            ));
        }
        if !self.guidance_scale.is_finite() {
            return invalid("guidance_scale must be finite".to_string());
        }
        if !(0.0..=1.0).contains(&self.random_intensity) {
            return invalid(format!(
                "random_intensity must be within [0, 1], got {}",
                self.random_intensity
            ));
        }

        self.tokenizer.validate()?;
        Ok(())
    }

    /// Shape of the latent for the configured image size
    pub fn latent_shape(&self) -> [usize; 4] {
        [1, self.latent_channels, self.height / 8, self.width / 8]
    }

    pub fn guided(&self) -> bool {
        self.guidance_scale > 1.0
    }
}

fn invalid(message: String) -> Result<()> {
    error!(%message, "invalid context config");
    Err(Error::Config(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_models() -> ContextConfig {
        ContextConfig {
            models: ModelPaths {
                text_encoder: "clip.onnx".into(),
                unet: "unet.onnx".into(),
                vae_encoder: "vae_encoder.onnx".into(),
                vae_decoder: "vae_decoder.onnx".into(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = ContextConfig::default();
        assert_eq!(config.inference_steps, 20);
        assert_eq!(config.latent_shape(), [1, 4, 64, 64]);
        assert!(config.guided());
        assert_eq!(config.io_names.unet.out_sample, "out_sample");
        assert_eq!(config.io_names.vae_decoder.input, "latent_sample");
    }

    #[test]
    fn test_empty_model_path_rejected() {
        assert!(matches!(
            ContextConfig::default().validate(),
            Err(Error::Config(_))
        ));
        assert!(with_models().validate().is_ok());
    }

    #[test]
    fn test_size_must_be_multiple_of_eight() {
        let config = ContextConfig {
            width: 500,
            ..with_models()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_steps_rejected() {
        let config = ContextConfig {
            inference_steps: 0,
            ..with_models()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_partial_json() {
        let config: ContextConfig = serde_json::from_str(
            r#"{
                "models": {
                    "text_encoder": "a", "unet": "b",
                    "vae_encoder": "c", "vae_decoder": "d"
                },
                "scheduler_kind": "euler_a",
                "scheduler": { "seed": 42, "prediction_kind": "v_prediction" },
                "tokenizer": { "kind": "word_piece", "vocab_path": "vocab.txt" },
                "io_names": { "unet": { "out_sample": "noise_pred" } },
                "guidance_scale": 1.0
            }"#,
        )
        .unwrap();

        assert_eq!(config.scheduler_kind, SchedulerKind::EulerAncestral);
        assert_eq!(config.scheduler.seed, 42);
        assert_eq!(config.io_names.unet.out_sample, "noise_pred");
        assert_eq!(config.io_names.unet.sample, "sample");
        assert!(!config.guided());
        assert!(config.validate().is_ok());
    }
}
