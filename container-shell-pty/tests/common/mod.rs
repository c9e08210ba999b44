use docker_engine::{
    ContainerInfo, ContainerSpec, ContainerSummary, Engine, EngineError, ExecInfo, ExecSpec,
    Result, StdStream,
};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io::Read;
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

/// Engine fake handing out pre-made sockets for attach and exec start.
#[derive(Default)]
pub struct FakeEngine {
    pub container: RefCell<ContainerInfo>,
    pub exec: RefCell<ExecInfo>,
    pub attach: RefCell<HashMap<&'static str, UnixStream>>,
    pub exec_socket: RefCell<Option<UnixStream>>,
    pub calls: RefCell<Vec<String>>,
    /// Exec inspections left before the exec reports itself stopped.
    pub exec_polls_until_exit: Cell<Option<usize>>,
}

impl FakeEngine {
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.borrow_mut().push(call.into());
    }
}

fn unsupported(what: &str) -> EngineError {
    EngineError::Protocol(format!("{what} is not supported by the fake"))
}

impl Engine for FakeEngine {
    fn pull_image(&self, _image: &str) -> Result<()> {
        Err(unsupported("pull"))
    }

    fn create_container(&self, _name: &str, _spec: &ContainerSpec) -> Result<String> {
        Err(unsupported("create"))
    }

    fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        Err(unsupported("list"))
    }

    fn start_container(&self, id: &str) -> Result<()> {
        self.record(format!("start {id}"));
        self.container.borrow_mut().state.running = true;
        Ok(())
    }

    fn inspect_container(&self, _id: &str) -> Result<ContainerInfo> {
        Ok(self.container.borrow().clone())
    }

    fn resize_container(&self, id: &str, height: u16, width: u16) -> Result<()> {
        self.record(format!("resize {id} {height}x{width}"));
        Ok(())
    }

    fn attach_socket(&self, id: &str, stream: StdStream, _logs: bool) -> Result<UnixStream> {
        self.record(format!("attach {id} {}", stream.as_str()));
        self.attach
            .borrow_mut()
            .remove(stream.as_str())
            .ok_or_else(|| unsupported("attach"))
    }

    fn kill_container(&self, _id: &str, _signal: Option<&str>) -> Result<()> {
        Err(unsupported("kill"))
    }

    fn remove_container(&self, _id: &str) -> Result<()> {
        Err(unsupported("remove"))
    }

    fn exec_create(&self, _container: &str, _spec: &ExecSpec) -> Result<String> {
        Err(unsupported("exec create"))
    }

    fn exec_start(&self, exec_id: &str, tty: bool) -> Result<UnixStream> {
        self.record(format!("exec start {exec_id} tty={tty}"));
        self.exec_socket
            .borrow_mut()
            .take()
            .ok_or_else(|| unsupported("exec start"))
    }

    fn exec_inspect(&self, _exec_id: &str) -> Result<ExecInfo> {
        let mut info = self.exec.borrow().clone();
        if let Some(left) = self.exec_polls_until_exit.get() {
            if left == 0 {
                info.running = false;
            } else {
                self.exec_polls_until_exit.set(Some(left - 1));
            }
        }
        Ok(info)
    }

    fn exec_resize(&self, exec_id: &str, height: u16, width: u16) -> Result<()> {
        self.record(format!("exec resize {exec_id} {height}x{width}"));
        Ok(())
    }
}

/// Read until the peer closes or `deadline` passes.
pub fn read_all(stream: &mut UnixStream, deadline: Duration) -> Vec<u8> {
    stream
        .set_read_timeout(Some(Duration::from_millis(50)))
        .unwrap();
    let start = Instant::now();
    let mut buf = [0u8; 4096];
    let mut collected = Vec::new();
    while start.elapsed() < deadline {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => collected.extend_from_slice(&buf[..n]),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(_) => break,
        }
    }
    collected
}
