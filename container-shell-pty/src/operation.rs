//! What a relay is attached to: a container's primary process, or an exec
//! instance inside an already running container.

use crate::demux::FrameDemuxer;
use crate::error::RelayError;
use crate::io::{SessionIo, Stream};
use crate::pump::{Direction, Pump, Source};
use docker_engine::{ContainerInfo, Engine, ExecInfo, StdStream};
use std::cell::OnceCell;
use std::os::unix::net::UnixStream;
use tracing::debug;

pub trait Operation {
    /// Whether the remote process was allocated a TTY.
    fn remote_tty(&self) -> Result<bool, RelayError>;

    /// Open the remote streams, wire them to `io` and start the remote
    /// process if it is not running yet.
    fn start(&mut self, io: SessionIo, stdin_tty: bool) -> Result<Vec<Pump>, RelayError>;

    fn resize(&self, height: u16, width: u16) -> Result<(), RelayError>;

    /// Whether the remote process is still running.
    fn is_running(&self) -> Result<bool, RelayError>;
}

/// Stream carrying remote output: raw with a TTY, framed without one.
fn output_source(socket: UnixStream, tty: bool) -> Source {
    let stream = Stream::socket(socket);
    if tty {
        Source::Raw(stream)
    } else {
        Source::Framed(FrameDemuxer::new(stream))
    }
}

/// Local input towards the container.
///
/// Without a terminal on stdin the pump only counts as done at end-of-file,
/// which is how file transfer clients end a session.
fn input_pump(stdin: Stream, remote: Stream, stdin_tty: bool) -> Pump {
    Pump::new(stdin, remote, Direction::Input).wait_for_output(!stdin_tty)
}

fn output_pump(remote: Source, local: Stream) -> Pump {
    Pump::new(remote, local, Direction::Output).propagate_close(false)
}

/// Relay attached to the primary process of a container, like `docker run`.
pub struct RunOperation<'a> {
    engine: &'a dyn Engine,
    container: String,
    logs: bool,
}

impl<'a> RunOperation<'a> {
    pub fn new(engine: &'a dyn Engine, container: impl Into<String>) -> Self {
        Self {
            engine,
            container: container.into(),
            logs: true,
        }
    }

    /// Whether output produced before attaching is replayed.
    pub fn logs(mut self, logs: bool) -> Self {
        self.logs = logs;
        self
    }

    fn info(&self) -> Result<ContainerInfo, RelayError> {
        Ok(self.engine.inspect_container(&self.container)?)
    }

    fn attach(&self, info: &ContainerInfo, stream: StdStream) -> Result<Option<UnixStream>, RelayError> {
        let attached = match stream {
            StdStream::Stdin => info.config.attach_stdin,
            StdStream::Stdout => info.config.attach_stdout,
            StdStream::Stderr => info.config.attach_stderr,
        };
        if !attached {
            return Ok(None);
        }
        let socket = self
            .engine
            .attach_socket(&self.container, stream, self.logs)?;
        Ok(Some(socket))
    }
}

impl Operation for RunOperation<'_> {
    fn remote_tty(&self) -> Result<bool, RelayError> {
        Ok(self.info()?.config.tty)
    }

    fn start(&mut self, io: SessionIo, stdin_tty: bool) -> Result<Vec<Pump>, RelayError> {
        let info = self.info()?;
        let tty = info.config.tty;
        let mut pumps = Vec::with_capacity(3);

        if let Some(socket) = self.attach(&info, StdStream::Stdin)? {
            pumps.push(input_pump(io.stdin, Stream::socket(socket), stdin_tty));
        }
        if let Some(socket) = self.attach(&info, StdStream::Stdout)? {
            pumps.push(output_pump(output_source(socket, tty), io.stdout));
        }
        if let Some(socket) = self.attach(&info, StdStream::Stderr)? {
            pumps.push(output_pump(output_source(socket, tty), io.stderr));
        }

        if !info.state.running {
            debug!("Starting container {}", self.container);
            self.engine.start_container(&self.container)?;
        }
        Ok(pumps)
    }

    fn resize(&self, height: u16, width: u16) -> Result<(), RelayError> {
        Ok(self.engine.resize_container(&self.container, height, width)?)
    }

    fn is_running(&self) -> Result<bool, RelayError> {
        match self.engine.inspect_container(&self.container) {
            Ok(info) => Ok(info.state.running),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Relay attached to an exec instance, like `docker exec`.
///
/// Every standard stream travels over the one connection returned when the
/// exec starts.
pub struct ExecOperation<'a> {
    engine: &'a dyn Engine,
    exec_id: String,
    info: OnceCell<ExecInfo>,
}

impl<'a> ExecOperation<'a> {
    pub fn new(engine: &'a dyn Engine, exec_id: impl Into<String>) -> Self {
        Self {
            engine,
            exec_id: exec_id.into(),
            info: OnceCell::new(),
        }
    }

    pub fn exec_id(&self) -> &str {
        &self.exec_id
    }

    /// Exec metadata as first inspected. The TTY setting never changes.
    fn info(&self) -> Result<&ExecInfo, RelayError> {
        if let Some(info) = self.info.get() {
            return Ok(info);
        }
        let info = self.engine.exec_inspect(&self.exec_id)?;
        Ok(self.info.get_or_init(|| info))
    }
}

impl Operation for ExecOperation<'_> {
    fn remote_tty(&self) -> Result<bool, RelayError> {
        Ok(self.info()?.process_config.tty)
    }

    fn start(&mut self, io: SessionIo, stdin_tty: bool) -> Result<Vec<Pump>, RelayError> {
        let tty = self.remote_tty()?;
        let socket = self.engine.exec_start(&self.exec_id, tty)?;
        let input = socket.try_clone()?;

        Ok(vec![
            input_pump(io.stdin, Stream::socket(input), stdin_tty),
            output_pump(output_source(socket, tty), io.stdout),
        ])
    }

    fn resize(&self, height: u16, width: u16) -> Result<(), RelayError> {
        Ok(self.engine.exec_resize(&self.exec_id, height, width)?)
    }

    /// Always asks the engine; only the TTY setting is cached.
    fn is_running(&self) -> Result<bool, RelayError> {
        match self.engine.exec_inspect(&self.exec_id) {
            Ok(info) => Ok(info.running),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
