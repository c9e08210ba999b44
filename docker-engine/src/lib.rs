//! Docker Engine access for container-shell.
//!
//! The session proxy only needs a handful of engine operations; they are
//! collected in the [`Engine`] trait so orchestration logic can be tested
//! against fakes, and implemented for a local engine by [`DockerClient`].

mod client;
mod engine;
mod error;
pub mod frame;
pub mod http;

pub use client::{API_VERSION, DEFAULT_SOCKET, DockerClient};
pub use engine::{
    ContainerConfig, ContainerInfo, ContainerSpec, ContainerState, ContainerSummary, Engine,
    ExecInfo, ExecOutput, ExecSpec, HostConfig, Mount, ProcessConfig, StdStream, ThrottleDevice,
};
pub use error::{EngineError, Result};
