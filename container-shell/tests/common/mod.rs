use docker_engine::{
    ContainerInfo, ContainerSpec, ContainerSummary, Engine, EngineError, ExecInfo, ExecOutput,
    ExecSpec, Result, StdStream,
};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill, raise};
use nix::unistd::Pid;
use std::cell::{Cell, RefCell};
use std::io;
use std::os::unix::net::UnixStream;

/// Scriptable engine that records every call it receives.
#[derive(Default)]
pub struct MockEngine {
    pub containers: RefCell<Vec<ContainerSummary>>,
    /// Active execs reported by container inspection.
    pub exec_ids: RefCell<Vec<String>>,
    /// Output of `ps auxwww` inside the container.
    pub ps_output: RefCell<String>,
    /// Identity lookups that fail before one succeeds. `None` never succeeds.
    pub id_ready_after: Cell<Option<usize>>,
    /// Failure statuses for individual operations.
    pub pull_status: Cell<Option<u16>>,
    pub list_status: Cell<Option<u16>>,
    pub create_status: Cell<Option<u16>>,
    pub start_status: Cell<Option<u16>>,
    pub inspect_status: Cell<Option<u16>>,
    pub signal_status: Cell<Option<u16>>,
    pub kill_status: Cell<Option<u16>>,
    pub remove_status: Cell<Option<u16>>,
    /// Container that appears when a create call loses a race.
    pub race_winner: RefCell<Option<ContainerSummary>>,
    /// Host PID reported by exec inspection.
    pub exec_pid: Cell<i64>,
    /// Id handed out by exec creation. Listed among the container's execs
    /// until the process behind `exec_pid` is gone.
    pub session_exec: RefCell<Option<String>>,
    /// Signal delivered to this process when an exec is started, which then
    /// fails with EIO.
    pub start_raises: Cell<Option<Signal>>,
    pub calls: RefCell<Vec<String>>,
    created: Cell<usize>,
}

impl MockEngine {
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.calls.borrow().iter().position(|c| c.starts_with(prefix))
    }

    pub fn called(&self, prefix: &str) -> bool {
        self.position(prefix).is_some()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Add an existing container to the listing.
    pub fn with_container(self, id: &str, name: &str, state: &str) -> Self {
        self.containers.borrow_mut().push(summary(id, name, state));
        self
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.borrow_mut().push(call.into());
    }

    fn session_exec_gone(&self) -> bool {
        let Ok(pid) = i32::try_from(self.exec_pid.get()) else {
            return false;
        };
        pid > 0 && kill(Pid::from_raw(pid), None) == Err(Errno::ESRCH)
    }

    fn fail(&self, status: &Cell<Option<u16>>) -> Result<()> {
        match status.get() {
            Some(status) => Err(api(status)),
            None => Ok(()),
        }
    }
}

pub fn summary(id: &str, name: &str, state: &str) -> ContainerSummary {
    ContainerSummary {
        id: id.to_string(),
        names: vec![format!("/{name}")],
        state: state.to_string(),
    }
}

pub fn api(status: u16) -> EngineError {
    EngineError::Api {
        status,
        message: format!("mock failure {status}"),
    }
}

fn unsupported(what: &str) -> EngineError {
    EngineError::Protocol(format!("{what} is not supported by the mock"))
}

impl Engine for MockEngine {
    fn pull_image(&self, image: &str) -> Result<()> {
        self.record(format!("pull {image}"));
        self.fail(&self.pull_status)
    }

    fn create_container(&self, name: &str, _spec: &ContainerSpec) -> Result<String> {
        self.record(format!("create {name}"));
        if let Some(status) = self.create_status.get() {
            if let Some(winner) = self.race_winner.borrow_mut().take() {
                self.containers.borrow_mut().push(winner);
            }
            return Err(api(status));
        }
        let n = self.created.get() + 1;
        self.created.set(n);
        let id = format!("new-{n}");
        self.containers.borrow_mut().push(summary(&id, name, "created"));
        Ok(id)
    }

    fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        self.record("list");
        self.fail(&self.list_status)?;
        Ok(self.containers.borrow().clone())
    }

    fn start_container(&self, id: &str) -> Result<()> {
        self.record(format!("start {id}"));
        self.fail(&self.start_status)
    }

    fn inspect_container(&self, id: &str) -> Result<ContainerInfo> {
        self.record(format!("inspect {id}"));
        self.fail(&self.inspect_status)?;
        let mut exec_ids = self.exec_ids.borrow().clone();
        if let Some(session) = self.session_exec.borrow().as_ref() {
            if !self.session_exec_gone() {
                exec_ids.push(session.clone());
            }
        }
        Ok(ContainerInfo {
            id: id.to_string(),
            exec_ids: Some(exec_ids),
            ..Default::default()
        })
    }

    fn resize_container(&self, id: &str, height: u16, width: u16) -> Result<()> {
        self.record(format!("resize {id} {height}x{width}"));
        Ok(())
    }

    fn attach_socket(&self, _id: &str, _stream: StdStream, _logs: bool) -> Result<UnixStream> {
        Err(unsupported("attach"))
    }

    fn kill_container(&self, id: &str, _signal: Option<&str>) -> Result<()> {
        self.record(format!("kill {id}"));
        self.fail(&self.kill_status)
    }

    fn remove_container(&self, id: &str) -> Result<()> {
        self.record(format!("remove {id}"));
        self.fail(&self.remove_status)
    }

    fn exec_create(&self, container: &str, _spec: &ExecSpec) -> Result<String> {
        self.record(format!("exec create {container}"));
        self.session_exec
            .borrow()
            .clone()
            .ok_or_else(|| unsupported("exec create"))
    }

    fn exec_start(&self, exec_id: &str, _tty: bool) -> Result<UnixStream> {
        self.record(format!("exec start {exec_id}"));
        if let Some(signal) = self.start_raises.get() {
            raise(signal).map_err(io::Error::from)?;
            return Err(io::Error::from(Errno::EIO).into());
        }
        Err(unsupported("exec start"))
    }

    fn exec_inspect(&self, exec_id: &str) -> Result<ExecInfo> {
        self.record(format!("exec inspect {exec_id}"));
        Ok(ExecInfo {
            id: exec_id.to_string(),
            running: self.exec_pid.get() > 0,
            pid: self.exec_pid.get(),
            ..Default::default()
        })
    }

    fn exec_resize(&self, _exec_id: &str, _height: u16, _width: u16) -> Result<()> {
        Ok(())
    }

    fn exec_run(&self, container: &str, cmd: &[String]) -> Result<ExecOutput> {
        self.record(format!("exec_run {container} {}", cmd.join(" ")));
        let program = cmd.first().map(String::as_str).unwrap_or_default();
        if program.ends_with("/ps") {
            return Ok(ExecOutput {
                exit_code: 0,
                output: self.ps_output.borrow().as_bytes().to_vec(),
            });
        }
        if program.ends_with("/id") {
            let ready = match self.id_ready_after.get() {
                Some(0) => true,
                Some(left) => {
                    self.id_ready_after.set(Some(left - 1));
                    false
                }
                None => false,
            };
            return Ok(ExecOutput {
                exit_code: if ready { 0 } else { 1 },
                output: Vec::new(),
            });
        }
        if program == "kill" {
            self.fail(&self.signal_status)?;
            return Ok(ExecOutput::default());
        }
        Err(unsupported("exec_run"))
    }
}
