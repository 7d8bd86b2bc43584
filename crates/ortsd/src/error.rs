//! Errors surfaced by the pipeline and context

use ortsd_clip::TokenizerError;
use ortsd_samplers::SchedulerError;
use thiserror::Error;

use crate::engine::{EngineError, ModelRole};

#[derive(Error, Debug)]
pub enum Error {
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("tokenizer error: {0}")]
    Tokenizer(#[from] TokenizerError),

    #[error("inference engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{model} returned no output named {name:?}")]
    MissingOutput { model: ModelRole, name: String },

    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("context has no conditioning, call prepare() first")]
    NotPrepared,

    #[error("context lock poisoned by a panicked request")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, Error>;
