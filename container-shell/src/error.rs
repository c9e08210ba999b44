use container_shell_core::{ConfigError, IdentityError};
use container_shell_pty::RelayError;
use docker_engine::EngineError;
use miette::Diagnostic;
use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Diagnostic, Error)]
pub enum SessionError {
    #[error("user {user} was not ready inside the container after {after:?}")]
    #[diagnostic(help("check the [binaries] useradd and id paths for the configured image"))]
    ProvisionTimeout { user: String, after: Duration },

    #[error("File transfers are disabled")]
    FileTransfersDisabled,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error("unable to determine the login user: {0}")]
    Identity(#[from] IdentityError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;
