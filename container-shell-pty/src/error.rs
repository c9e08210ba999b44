use docker_engine::EngineError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("container engine request failed: {0}")]
    Engine(#[from] EngineError),
    #[error("relay transport failed: {0}")]
    Io(#[from] io::Error),
}
