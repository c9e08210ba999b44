//! The capability surface the session proxy needs from a container engine.

use crate::error::Result;
use crate::frame;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::os::unix::net::UnixStream;

/// Bind mount from the host into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Mount {
    #[serde(rename = "Type")]
    pub kind: String,
    pub source: String,
    pub target: String,
}

impl Mount {
    pub fn bind(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: "bind".to_string(),
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Block IO throttle for a single device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ThrottleDevice {
    pub path: String,
    pub rate: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostConfig {
    pub init: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<Mount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_quota: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_period: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<i64>,
    #[serde(rename = "BlkioDeviceReadIOps", skip_serializing_if = "Vec::is_empty")]
    pub blkio_device_read_iops: Vec<ThrottleDevice>,
    #[serde(rename = "BlkioDeviceWriteIOps", skip_serializing_if = "Vec::is_empty")]
    pub blkio_device_write_iops: Vec<ThrottleDevice>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blkio_device_read_bps: Vec<ThrottleDevice>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blkio_device_write_bps: Vec<ThrottleDevice>,
}

/// Body of a container create call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSpec {
    pub image: String,
    pub hostname: String,
    pub tty: bool,
    pub open_stdin: bool,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    /// `None` keeps the image's default command.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    pub host_config: HostConfig,
}

/// One entry of the container listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSummary {
    pub id: String,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub state: String,
}

impl ContainerSummary {
    /// Whether any of the engine's names for this container is `name`.
    ///
    /// The engine reports names with a leading `/`.
    pub fn has_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n.trim_start_matches('/') == name)
    }

    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerState {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub exit_code: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    #[serde(default)]
    pub tty: bool,
    #[serde(default)]
    pub attach_stdin: bool,
    #[serde(default)]
    pub attach_stdout: bool,
    #[serde(default)]
    pub attach_stderr: bool,
}

/// Result of inspecting a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: ContainerState,
    #[serde(default)]
    pub config: ContainerConfig,
    /// Active exec instances. The engine sends `null` when there are none.
    #[serde(rename = "ExecIDs", default)]
    pub exec_ids: Option<Vec<String>>,
}

impl ContainerInfo {
    pub fn exec_ids(&self) -> &[String] {
        self.exec_ids.as_deref().unwrap_or_default()
    }
}

/// Body of an exec create call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecSpec {
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub tty: bool,
    pub cmd: Vec<String>,
}

impl ExecSpec {
    /// A non-interactive command whose output is collected.
    pub fn collect(cmd: &[String]) -> Self {
        Self {
            attach_stdin: false,
            attach_stdout: true,
            attach_stderr: true,
            tty: false,
            cmd: cmd.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProcessConfig {
    #[serde(default)]
    pub tty: bool,
}

/// Result of inspecting an exec instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecInfo {
    #[serde(rename = "ID", default)]
    pub id: String,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub exit_code: Option<i64>,
    /// Host PID of the exec'd process, 0 when not running.
    #[serde(default)]
    pub pid: i64,
    #[serde(default)]
    pub process_config: ProcessConfig,
}

/// Collected result of [`Engine::exec_run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub output: Vec<u8>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn output_lossy(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

/// Which standard stream an attach socket carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdStream {
    Stdin,
    Stdout,
    Stderr,
}

impl StdStream {
    pub fn as_str(self) -> &'static str {
        match self {
            StdStream::Stdin => "stdin",
            StdStream::Stdout => "stdout",
            StdStream::Stderr => "stderr",
        }
    }
}

/// The container engine operations the session proxy relies on.
///
/// Implemented by [`crate::DockerClient`] for a local engine and by
/// recording fakes in tests.
pub trait Engine {
    fn pull_image(&self, image: &str) -> Result<()>;

    /// Create a container and return its id.
    fn create_container(&self, name: &str, spec: &ContainerSpec) -> Result<String>;

    /// List every container, running or not.
    fn list_containers(&self) -> Result<Vec<ContainerSummary>>;

    fn start_container(&self, id: &str) -> Result<()>;

    fn inspect_container(&self, id: &str) -> Result<ContainerInfo>;

    fn resize_container(&self, id: &str, height: u16, width: u16) -> Result<()>;

    /// Open a hijacked connection carrying one standard stream of the
    /// container's primary process.
    fn attach_socket(&self, id: &str, stream: StdStream, logs: bool) -> Result<UnixStream>;

    /// Send `signal` (engine default SIGKILL when `None`) to the container.
    fn kill_container(&self, id: &str, signal: Option<&str>) -> Result<()>;

    fn remove_container(&self, id: &str) -> Result<()>;

    /// Create an exec instance and return its id.
    fn exec_create(&self, container: &str, spec: &ExecSpec) -> Result<String>;

    /// Start an exec instance and return the hijacked connection carrying
    /// its standard streams.
    fn exec_start(&self, exec_id: &str, tty: bool) -> Result<UnixStream>;

    fn exec_inspect(&self, exec_id: &str) -> Result<ExecInfo>;

    fn exec_resize(&self, exec_id: &str, height: u16, width: u16) -> Result<()>;

    /// Run `cmd` inside the container to completion and collect its output
    /// (stdout and stderr merged) and exit code.
    fn exec_run(&self, container: &str, cmd: &[String]) -> Result<ExecOutput> {
        let exec_id = self.exec_create(container, &ExecSpec::collect(cmd))?;
        let mut socket = self.exec_start(&exec_id, false)?;
        let mut raw = Vec::new();
        socket.read_to_end(&mut raw)?;
        let info = self.exec_inspect(&exec_id)?;
        Ok(ExecOutput {
            exit_code: info.exit_code.unwrap_or(-1),
            output: frame::demux_all(&raw),
        })
    }
}
