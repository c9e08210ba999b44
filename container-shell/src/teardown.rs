//! Deciding whether a container outlives the session, and destroying it
//! when it does not.
//!
//! A shared container may serve several logins that end at nearly the same
//! moment. The process table is sampled *before* the exec list is re-read,
//! so this session's own `ps` exec is never seen as another live login by a
//! concurrent teardown.

use container_shell_core::{Config, persist_enabled};
use container_shell_pty::signals::signal_name;
use docker_engine::{Engine, EngineError};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use regex::Regex;
use std::cell::{Cell, RefCell};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info};

/// How many ticks to wait for a terminated exec to disappear.
pub const EXEC_EXIT_TICKS: u32 = 60;

/// The `[config]` and `[binaries]` values teardown depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownPolicy {
    pub term_signal: String,
    pub persist: String,
    pub persist_egrep: String,
    pub ps: String,
}

impl TeardownPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            term_signal: config.term_signal().to_string(),
            persist: config.persist().to_string(),
            persist_egrep: config.persist_egrep().to_string(),
            ps: config.binary("ps").replace(';', ""),
        }
    }

    /// The signal PID 1 receives when the container is destroyed.
    fn signal_for(&self, trigger: Trigger) -> String {
        match trigger {
            Trigger::Exit => self.term_signal.clone(),
            Trigger::Signal(signal) => signal_name(signal)
                .map(str::to_string)
                .unwrap_or_else(|| signal.to_string()),
        }
    }
}

/// What ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Exit,
    Signal(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Keep,
    Destroy,
}

/// Outcome of the one teardown a session performs.
#[derive(Debug)]
pub struct TeardownReport {
    pub decision: Decision,
    /// Engine failures other than "already stopped" or "already removed".
    /// Each one was logged once.
    pub unexpected: Vec<EngineError>,
}

/// Tears down one container, at most once.
pub struct Teardown<'a> {
    engine: &'a dyn Engine,
    container: String,
    policy: TeardownPolicy,
    done: Cell<bool>,
    exec: RefCell<Option<String>>,
    tick: Duration,
}

impl<'a> Teardown<'a> {
    pub fn new(engine: &'a dyn Engine, container: impl Into<String>, policy: TeardownPolicy) -> Self {
        Self {
            engine,
            container: container.into(),
            policy,
            done: Cell::new(false),
            exec: RefCell::new(None),
            tick: Duration::from_secs(1),
        }
    }

    /// Interval between checks for a terminated exec.
    pub fn tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn is_done(&self) -> bool {
        self.done.get()
    }

    /// Record the exec this session is attached through.
    ///
    /// A signal-triggered [`Teardown::run`] terminates it before deciding,
    /// so it no longer counts as a live login.
    pub fn track_exec(&self, exec_id: impl Into<String>) {
        *self.exec.borrow_mut() = Some(exec_id.into());
    }

    /// Decide and, if nobody else needs the container, destroy it.
    ///
    /// Returns `None` when a previous call already did this.
    pub fn run(&self, trigger: Trigger) -> Option<TeardownReport> {
        if self.done.replace(true) {
            debug!("Teardown of {} already ran", self.container);
            return None;
        }

        if let Trigger::Signal(_) = trigger {
            if let Some(exec_id) = self.exec.borrow().as_deref() {
                self.terminate_exec(exec_id);
            }
        }

        let mut unexpected = Vec::new();
        let decision = self.decide(&mut unexpected);
        if decision == Decision::Destroy {
            self.destroy(trigger, &mut unexpected);
        } else {
            info!("Keeping container {}", self.container);
        }
        Some(TeardownReport {
            decision,
            unexpected,
        })
    }

    fn decide(&self, unexpected: &mut Vec<EngineError>) -> Decision {
        let ps = [self.policy.ps.clone(), "auxwww".to_string()];
        let processes = match self.engine.exec_run(&self.container, &ps) {
            Ok(output) => output.output_lossy(),
            Err(e) if e.is_not_found() => return Decision::Destroy,
            Err(e) => {
                debug!("Unable to list processes in {}: {}", self.container, e);
                String::new()
            }
        };

        let info = match self.engine.inspect_container(&self.container) {
            Ok(info) => info,
            Err(e) if e.is_not_found() => return Decision::Destroy,
            Err(e) => {
                // Without the exec list another login may still be inside.
                error!("Unable to inspect container {}: {}", self.container, e);
                unexpected.push(e);
                return Decision::Keep;
            }
        };

        if !info.exec_ids().is_empty() {
            debug!(
                "Container {} still has {} exec sessions",
                self.container,
                info.exec_ids().len()
            );
            return Decision::Keep;
        }
        if !persist_enabled(&self.policy.persist) {
            return Decision::Destroy;
        }

        match Regex::new(&format!("({})", self.policy.persist_egrep)) {
            Ok(pattern) => {
                let found = pattern.find(&processes);
                debug!("Persistence search results: {:?}", found.map(|m| m.as_str()));
                if found.is_some() {
                    Decision::Keep
                } else {
                    Decision::Destroy
                }
            }
            Err(e) => {
                error!("Invalid persist_egrep pattern '{}': {}", self.policy.persist_egrep, e);
                Decision::Destroy
            }
        }
    }

    fn destroy(&self, trigger: Trigger, unexpected: &mut Vec<EngineError>) {
        debug!("Tearing down container {}", self.container);
        let mut record = |action: &str, result: Result<(), EngineError>| {
            if let Err(e) = result {
                if e.is_expected_teardown_failure() {
                    debug!("{} {}: {}", action, self.container, e);
                } else {
                    error!("Failed to {} container {}: {}", action, self.container, e);
                    unexpected.push(e);
                }
            }
        };

        let signal = self.policy.signal_for(trigger);
        let kill_init = ["kill".to_string(), format!("-{signal}"), "1".to_string()];
        record(
            "signal",
            self.engine.exec_run(&self.container, &kill_init).map(|_| ()),
        );
        record("kill", self.engine.kill_container(&self.container, None));
        record("remove", self.engine.remove_container(&self.container));
    }

    /// SIGTERM the host process behind an exec and wait for it to go away.
    pub fn terminate_exec(&self, exec_id: &str) {
        let pid = match self.engine.exec_inspect(exec_id) {
            Ok(info) if info.pid > 0 => info.pid,
            Ok(_) => return,
            Err(e) => {
                debug!("Unable to inspect exec {}: {}", exec_id, e);
                return;
            }
        };
        let Ok(raw) = i32::try_from(pid) else {
            return;
        };
        let pid = Pid::from_raw(raw);

        match kill(pid, Signal::SIGTERM) {
            Ok(()) => {}
            Err(Errno::ESRCH) => return,
            Err(e) => {
                debug!("Unable to terminate exec process {}: {}", pid, e);
                return;
            }
        }

        for _ in 0..EXEC_EXIT_TICKS {
            if kill(pid, None) == Err(Errno::ESRCH) {
                debug!("Exec process {} exited", pid);
                return;
            }
            thread::sleep(self.tick);
        }
        debug!("Exec process {} still alive after SIGTERM", pid);
    }
}
