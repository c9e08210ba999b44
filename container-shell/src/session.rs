//! One login, from finding its container to handing back an exit code.

use crate::error::{Result, SessionError};
use crate::teardown::{Teardown, TeardownPolicy, Trigger};
use container_shell_core::container_args::{build_args, exec_args, is_file_transfer};
use container_shell_core::{Config, Identity, SessionMode};
use container_shell_pty::{ExecOperation, PseudoTerminal, RunOperation, SessionIo, TerminationSignals};
use docker_engine::{Engine, EngineError};
use std::cell::Cell;
use std::io::{IsTerminal, Write};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// The container a session runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRef {
    pub id: String,
    pub name: String,
    pub mode: SessionMode,
    pub running: bool,
}

impl ContainerRef {
    pub fn is_standalone(&self) -> bool {
        self.mode == SessionMode::Standalone
    }

    /// Shared containers are started here; standalone ones start when the
    /// relay attaches to them.
    pub fn needs_provisioning(&self) -> bool {
        self.mode == SessionMode::Shared && !self.running
    }
}

/// Finds or creates the container for a login and gets it ready.
pub struct Orchestrator<'a> {
    engine: &'a dyn Engine,
    config: &'a Config,
    provision_timeout: Duration,
    provision_interval: Duration,
    exit_poll: Duration,
}

impl<'a> Orchestrator<'a> {
    pub fn new(engine: &'a dyn Engine, config: &'a Config) -> Self {
        Self {
            engine,
            config,
            provision_timeout: config.provision_timeout(),
            provision_interval: Duration::from_millis(100),
            exit_poll: Duration::from_secs(2),
        }
    }

    /// How long the login user may take to appear inside a new container.
    /// Defaults to `[config] provision_timeout`.
    pub fn provision_timeout(mut self, timeout: Duration) -> Self {
        self.provision_timeout = timeout;
        self
    }

    pub fn provision_interval(mut self, interval: Duration) -> Self {
        self.provision_interval = interval;
        self
    }

    /// How long to wait for the remote exit code once the relay is over.
    pub fn exit_poll(mut self, exit_poll: Duration) -> Self {
        self.exit_poll = exit_poll;
        self
    }

    pub fn refresh_image(&self) -> Result<()> {
        debug!("Pulling image {}", self.config.image());
        Ok(self.engine.pull_image(self.config.image())?)
    }

    /// Find the container for this login, creating it when needed.
    ///
    /// A shared login reuses the first container named after the user. When
    /// a concurrent login wins the race to create it, that one is reused.
    pub fn resolve(&self, identity: &Identity, mode: SessionMode, tty: bool) -> Result<ContainerRef> {
        let args = build_args(self.config, identity, mode, tty);
        debug!("Create args: {:?}", args);

        if mode == SessionMode::Standalone {
            let id = self.engine.create_container(&args.name, &args.spec)?;
            return Ok(ContainerRef {
                id,
                name: args.name,
                mode,
                running: false,
            });
        }

        if let Some(found) = self.find(&args.name)? {
            return Ok(found);
        }

        match self.engine.create_container(&args.name, &args.spec) {
            Ok(id) => Ok(ContainerRef {
                id,
                name: args.name,
                mode,
                running: false,
            }),
            Err(e) if e.is_conflict() => {
                debug!("Container {} was created concurrently, reusing it", args.name);
                self.find(&args.name)?.ok_or(SessionError::Engine(e))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn find(&self, name: &str) -> Result<Option<ContainerRef>> {
        let found = self
            .engine
            .list_containers()?
            .into_iter()
            .find(|summary| summary.has_name(name))
            .map(|summary| ContainerRef {
                running: summary.is_running(),
                id: summary.id,
                name: name.to_string(),
                mode: SessionMode::Shared,
            });
        if let Some(container) = &found {
            debug!("Found container {} ({})", container.name, container.id);
        }
        Ok(found)
    }

    /// Start a shared container and wait until the login user exists in it.
    pub fn provision(&self, container: &ContainerRef, identity: &Identity) -> Result<()> {
        if !container.needs_provisioning() {
            return Ok(());
        }
        debug!("Starting container {}", container.id);
        self.engine.start_container(&container.id)?;
        if self.config.create_user() {
            self.block_on_init(&container.id, &identity.name)?;
        }
        Ok(())
    }

    /// Poll the identity lookup until the container's entrypoint has
    /// created `username`.
    pub fn block_on_init(&self, container: &str, username: &str) -> Result<()> {
        let lookup = [self.config.binary("id").to_string(), username.to_string()];
        let started = Instant::now();
        loop {
            match self.engine.exec_run(container, &lookup) {
                Ok(output) if output.success() => {
                    debug!("User {} ready after {:?}", username, started.elapsed());
                    return Ok(());
                }
                Ok(output) => debug!("User {} not ready yet: {}", username, output.output_lossy().trim()),
                Err(e) => debug!("User lookup for {} failed: {}", username, e),
            }
            if started.elapsed() >= self.provision_timeout {
                return Err(SessionError::ProvisionTimeout {
                    user: username.to_string(),
                    after: self.provision_timeout,
                });
            }
            thread::sleep(self.provision_interval);
        }
    }

    /// Exit code of the relayed process, once the engine has one.
    ///
    /// A process still running when the wait runs out counts as success:
    /// the relay itself ended cleanly.
    pub fn exit_code(&self, status: impl Fn() -> Result<(bool, Option<i64>), EngineError>) -> i32 {
        let started = Instant::now();
        loop {
            match status() {
                Ok((false, Some(code))) => {
                    return i32::try_from(code)
                        .ok()
                        .filter(|code| (0..=255).contains(code))
                        .unwrap_or(1);
                }
                Ok((false, None)) => return 0,
                Ok((true, _)) => {}
                Err(e) if e.is_not_found() => return 0,
                Err(e) => {
                    debug!("Unable to read exit code: {}", e);
                    return 1;
                }
            }
            if started.elapsed() >= self.exit_poll {
                debug!("Remote process still running after the relay ended");
                return 0;
            }
            thread::sleep(self.provision_interval);
        }
    }
}

/// Write one operator-facing line to stderr.
pub fn printerr(message: &str) {
    let mut stderr = std::io::stderr().lock();
    let _ = writeln!(stderr, "{message}");
    let _ = stderr.flush();
}

/// Run a whole login and return the process exit code.
pub fn run_session(
    engine: &dyn Engine,
    config: &Config,
    identity: &Identity,
    signals: &TerminationSignals,
) -> i32 {
    run_with(&Orchestrator::new(engine, config), identity, signals)
}

/// [`run_session`] with a preconfigured [`Orchestrator`].
pub fn run_with(orchestrator: &Orchestrator<'_>, identity: &Identity, signals: &TerminationSignals) -> i32 {
    let (engine, config) = (orchestrator.engine, orchestrator.config);
    let command = config.command();
    if is_file_transfer(command) && !config.file_transfers() {
        info!("Refused file transfer for {}: {}", identity.name, command);
        printerr(&SessionError::FileTransfersDisabled.to_string());
        return 1;
    }
    let mode = SessionMode::for_command(command);

    if config.auto_refresh() {
        if let Err(e) = orchestrator.refresh_image() {
            error!("{}", e);
            printerr("Unable to update login environment");
            return 1;
        }
    }

    let tty = std::io::stdout().is_terminal();
    let container = match orchestrator.resolve(identity, mode, tty) {
        Ok(container) => container,
        Err(e) => {
            error!("{}", e);
            printerr("Failed to create login environment");
            return 1;
        }
    };

    let teardown = Teardown::new(engine, container.id.clone(), TeardownPolicy::from_config(config));

    if let Err(e) = orchestrator.provision(&container, identity) {
        error!("{}", e);
        printerr("Failed to create login environment");
        teardown.run(Trigger::Exit);
        return 1;
    }

    if let Some(signal) = signals.take() {
        debug!("Caught signal {} before connecting", signal);
        teardown.run(Trigger::Signal(signal));
        return 128 + signal;
    }

    let caught = Cell::new(None);
    let relayed = relay(orchestrator, identity, &container, tty, signals, &teardown, &caught);

    let code = match relayed {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            printerr("Failed to connect to PTY");
            1
        }
    };

    let caught = caught.get().or_else(|| signals.take());
    match caught {
        Some(signal) => {
            teardown.run(Trigger::Signal(signal));
            128 + signal
        }
        None => {
            teardown.run(Trigger::Exit);
            code
        }
    }
}

fn relay(
    orchestrator: &Orchestrator<'_>,
    identity: &Identity,
    container: &ContainerRef,
    tty: bool,
    signals: &TerminationSignals,
    teardown: &Teardown<'_>,
    caught: &Cell<Option<i32>>,
) -> Result<i32> {
    let (engine, config) = (orchestrator.engine, orchestrator.config);
    if container.is_standalone() {
        debug!("Connecting to standalone container {}", container.name);
        let mut on_signal = |signal: i32| {
            caught.set(Some(signal));
            teardown.run(Trigger::Signal(signal));
        };
        let mut pty = PseudoTerminal::new(RunOperation::new(engine, &container.id));
        pty.start_supervised(SessionIo::std(), signals, &mut on_signal)?;
        if caught.get().is_some() {
            return Ok(1);
        }
        return Ok(orchestrator.exit_code(|| {
            let info = engine.inspect_container(&container.id)?;
            Ok((info.state.running, Some(info.state.exit_code)))
        }));
    }

    debug!("Connecting to shared container {}", container.name);
    let exec_id = engine.exec_create(&container.id, &exec_args(config, identity, tty))?;
    teardown.track_exec(exec_id.as_str());
    let mut on_signal = |signal: i32| {
        caught.set(Some(signal));
        teardown.run(Trigger::Signal(signal));
    };
    let mut pty = PseudoTerminal::new(ExecOperation::new(engine, exec_id.as_str()));
    pty.start_supervised(SessionIo::std(), signals, &mut on_signal)?;
    if caught.get().is_some() {
        return Ok(1);
    }
    let operation = pty.into_operation();
    Ok(orchestrator.exit_code(|| {
        let info = engine.exec_inspect(operation.exec_id())?;
        Ok((info.running, info.exit_code))
    }))
}
