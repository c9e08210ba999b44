use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to connect to the container engine at {path}: {source}")]
    Connect {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("container engine returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("malformed response from the container engine: {0}")]
    Protocol(String),
    #[error("failed to pull image {image}: {message}")]
    Pull { image: String, message: String },
    #[error("failed to decode engine response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl EngineError {
    /// HTTP status of an API failure, if this error came from the engine.
    pub fn status(&self) -> Option<u16> {
        match self {
            EngineError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }

    /// 404 (already removed) and 409 (already stopped / removal in progress)
    /// are the normal outcome of tearing down a container someone else
    /// already tore down.
    pub fn is_expected_teardown_failure(&self) -> bool {
        self.is_not_found() || self.is_conflict()
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
