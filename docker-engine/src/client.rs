use crate::engine::{
    ContainerInfo, ContainerSpec, ContainerSummary, Engine, ExecInfo, ExecSpec, StdStream,
};
use crate::error::{EngineError, Result};
use crate::http::{self, Head};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace};

/// Default location of the engine socket.
pub const DEFAULT_SOCKET: &str = "/var/run/docker.sock";

/// API version every request is pinned to.
pub const API_VERSION: &str = "v1.41";

/// Synchronous client for a Docker engine listening on a unix socket.
///
/// Every API call opens its own connection; hijacked attach/exec
/// connections are handed to the caller as plain `UnixStream`s.
#[derive(Debug, Clone)]
pub struct DockerClient {
    socket_path: PathBuf,
    timeout: Duration,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IdResponse {
    id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ExecStartBody {
    detach: bool,
    tty: bool,
}

impl DockerClient {
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout,
        }
    }

    /// Honour `DOCKER_HOST=unix://...`, otherwise use the default socket.
    pub fn from_env(timeout: Duration) -> Self {
        let socket = std::env::var("DOCKER_HOST")
            .ok()
            .and_then(|host| host.strip_prefix("unix://").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET));
        Self::new(socket, timeout)
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    fn connect(&self) -> Result<UnixStream> {
        let stream =
            UnixStream::connect(&self.socket_path).map_err(|source| EngineError::Connect {
                path: self.socket_path.display().to_string(),
                source,
            })?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        Ok(stream)
    }

    fn url(path: &str) -> String {
        format!("/{API_VERSION}{path}")
    }

    /// Issue a request and return the status and full body.
    fn request(&self, method: &str, path: &str, body: Option<Vec<u8>>) -> Result<(Head, Vec<u8>)> {
        let url = Self::url(path);
        trace!("{} {}", method, url);
        let mut stream = self.connect()?;
        http::write_request(&mut stream, method, &url, body.as_deref(), false)?;
        let mut reader = BufReader::new(stream);
        let head = http::read_head(&mut reader)?;
        let body = http::read_body(&mut reader, &head)?;
        if !head.is_success() && head.status != 304 {
            return Err(http::api_error(&head, &body));
        }
        Ok((head, body))
    }

    fn request_json<T: DeserializeOwned>(
        &self,
        method: &str,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<T> {
        let (_, body) = self.request(method, path, body)?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Issue an upgrade request and return the hijacked connection.
    fn hijack(&self, path: &str, body: Option<Vec<u8>>) -> Result<UnixStream> {
        let url = Self::url(path);
        trace!("POST {} (upgrade)", url);
        let mut stream = self.connect()?;
        http::write_request(&mut stream, "POST", &url, body.as_deref(), true)?;
        let head = http::read_head(&mut stream)?;
        if !head.is_success() && head.status != 101 {
            let mut reader = BufReader::new(&stream);
            let body = http::read_body(&mut reader, &head).unwrap_or_default();
            return Err(http::api_error(&head, &body));
        }
        // The relay owns this connection from here on and polls it.
        stream.set_read_timeout(None)?;
        stream.set_write_timeout(None)?;
        Ok(stream)
    }
}

/// Split `repo[:tag]`, leaving registry ports alone. A digest reference
/// has no separate tag.
fn split_image(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    match image.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, tag),
        _ => (image, "latest"),
    }
}

impl Engine for DockerClient {
    fn pull_image(&self, image: &str) -> Result<()> {
        let (repo, tag) = split_image(image);
        debug!("Pulling image {}", image);
        let mut path = format!("/images/create?fromImage={}", urlencoding::encode(repo));
        if !tag.is_empty() {
            path.push_str(&format!("&tag={}", urlencoding::encode(tag)));
        }
        let (_, body) = self.request("POST", &path, None)?;

        // Progress is streamed as JSON lines; failures show up as an
        // `error` entry even though the status is 200.
        for line in body.as_slice().lines() {
            let line = line?;
            let Ok(progress) = serde_json::from_str::<serde_json::Value>(&line) else {
                continue;
            };
            if let Some(message) = progress.get("error").and_then(|e| e.as_str()) {
                return Err(EngineError::Pull {
                    image: image.to_string(),
                    message: message.to_string(),
                });
            }
        }
        Ok(())
    }

    fn create_container(&self, name: &str, spec: &ContainerSpec) -> Result<String> {
        let body = serde_json::to_vec(spec)?;
        let created: IdResponse =
            self.request_json(
                "POST",
                &format!("/containers/create?name={}", urlencoding::encode(name)),
                Some(body),
            )?;
        debug!("Created container {} ({})", name, created.id);
        Ok(created.id)
    }

    fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        self.request_json("GET", "/containers/json?all=1", None)
    }

    fn start_container(&self, id: &str) -> Result<()> {
        self.request("POST", &format!("/containers/{id}/start"), None)?;
        Ok(())
    }

    fn inspect_container(&self, id: &str) -> Result<ContainerInfo> {
        self.request_json("GET", &format!("/containers/{id}/json"), None)
    }

    fn resize_container(&self, id: &str, height: u16, width: u16) -> Result<()> {
        self.request(
            "POST",
            &format!("/containers/{id}/resize?h={height}&w={width}"),
            None,
        )?;
        Ok(())
    }

    fn attach_socket(&self, id: &str, stream: StdStream, logs: bool) -> Result<UnixStream> {
        let logs = u8::from(logs);
        self.hijack(
            &format!(
                "/containers/{id}/attach?{}=1&stream=1&logs={logs}",
                stream.as_str()
            ),
            None,
        )
    }

    fn kill_container(&self, id: &str, signal: Option<&str>) -> Result<()> {
        let path = match signal {
            Some(signal) => format!("/containers/{id}/kill?signal={signal}"),
            None => format!("/containers/{id}/kill"),
        };
        self.request("POST", &path, None)?;
        Ok(())
    }

    fn remove_container(&self, id: &str) -> Result<()> {
        self.request("DELETE", &format!("/containers/{id}"), None)?;
        Ok(())
    }

    fn exec_create(&self, container: &str, spec: &ExecSpec) -> Result<String> {
        let body = serde_json::to_vec(spec)?;
        let created: IdResponse =
            self.request_json("POST", &format!("/containers/{container}/exec"), Some(body))?;
        Ok(created.id)
    }

    fn exec_start(&self, exec_id: &str, tty: bool) -> Result<UnixStream> {
        let body = serde_json::to_vec(&ExecStartBody { detach: false, tty })?;
        self.hijack(&format!("/exec/{exec_id}/start"), Some(body))
    }

    fn exec_inspect(&self, exec_id: &str) -> Result<ExecInfo> {
        self.request_json("GET", &format!("/exec/{exec_id}/json"), None)
    }

    fn exec_resize(&self, exec_id: &str, height: u16, width: u16) -> Result<()> {
        self.request(
            "POST",
            &format!("/exec/{exec_id}/resize?h={height}&w={width}"),
            None,
        )?;
        Ok(())
    }
}
