//! Errors surfaced by the pipeline handles.

use crate::config::ConfigError;
use thiserror::Error;
use tpschain_core::CodecError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline is shut down")]
    Closed,

    #[error("intake queue is full")]
    Full,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("pipeline task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
