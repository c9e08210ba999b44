//! Takes over the local terminal until the remote session ends.

use crate::error::RelayError;
use crate::io::{SessionIo, select};
use crate::operation::Operation;
use crate::pump::{Direction, Pump, restore_blocking};
use crate::signals::{TerminationSignals, WinchHandler};
use crate::terminal::{self, RawModeGuard};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;
use tracing::debug;

/// Upper bound on one readiness wait, so termination is re-checked even
/// when nothing moves.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(2);

/// Reaction to a termination signal caught during the relay.
pub type SignalHandler<'h> = &'h mut dyn FnMut(i32);

/// Relays between the local terminal and an [`Operation`].
///
/// Raw mode and the blocking mode of every relayed descriptor are restored
/// before [`PseudoTerminal::start`] returns, whichever way it returns.
pub struct PseudoTerminal<O> {
    operation: O,
    raw: bool,
}

/// Facts about the local side, taken before the streams move into pumps.
struct Local {
    stdin_fd: RawFd,
    stdout_fd: RawFd,
    stdin_tty: bool,
}

impl<O: Operation> PseudoTerminal<O> {
    pub fn new(operation: O) -> Self {
        Self {
            operation,
            raw: false,
        }
    }

    pub fn into_operation(self) -> O {
        self.operation
    }

    /// Relay until the session is over.
    pub fn start(&mut self, io: SessionIo) -> Result<(), RelayError> {
        self.run(io, None)
    }

    /// Like [`PseudoTerminal::start`], handing termination signals caught
    /// while relaying to `on_signal` from the relay loop.
    pub fn start_supervised(
        &mut self,
        io: SessionIo,
        signals: &TerminationSignals,
        on_signal: SignalHandler<'_>,
    ) -> Result<(), RelayError> {
        self.run(io, Some((signals, on_signal)))
    }

    fn run(
        &mut self,
        io: SessionIo,
        supervisor: Option<(&TerminationSignals, SignalHandler<'_>)>,
    ) -> Result<(), RelayError> {
        let local = Local {
            stdin_fd: io.stdin.as_raw_fd(),
            stdout_fd: io.stdout.as_raw_fd(),
            stdin_tty: io.stdin_is_tty(),
        };
        self.raw = io.stdout_is_tty() && self.operation.remote_tty()?;
        debug!("Relay starting, raw mode: {}", self.raw);

        let mut pumps = self.operation.start(io, local.stdin_tty)?;

        let mut previous = Vec::new();
        for pump in &pumps {
            match pump.set_blocking(false) {
                Ok(flags) => previous.extend(flags),
                Err(e) => {
                    restore_blocking(&previous);
                    return Err(e.into());
                }
            }
        }

        let result = WinchHandler::register()
            .map_err(RelayError::from)
            .and_then(|winch| self.hijack(&mut pumps, &local, &winch, supervisor));

        restore_blocking(&previous);
        result
    }

    fn hijack(
        &mut self,
        pumps: &mut [Pump],
        local: &Local,
        winch: &WinchHandler,
        mut supervisor: Option<(&TerminationSignals, SignalHandler<'_>)>,
    ) -> Result<(), RelayError> {
        let _terminal = RawModeGuard::new(local.stdin_fd, self.raw)?;
        self.resize(local.stdout_fd);

        let input = pumps.iter().position(|p| p.direction() == Direction::Input);

        loop {
            if winch.take() {
                self.resize(local.stdout_fd);
            }
            if let Some((signals, on_signal)) = supervisor.as_mut() {
                if let Some(signal) = signals.take() {
                    debug!("Caught signal {} while relaying", signal);
                    (*on_signal)(signal);
                }
            }

            let readers: Vec<usize> = (0..pumps.len()).filter(|i| !pumps[*i].is_eof()).collect();
            let writers: Vec<usize> = (0..pumps.len()).filter(|i| pumps[*i].needs_write()).collect();
            let read_fds: Vec<RawFd> = readers.iter().map(|i| pumps[*i].source_fd()).collect();
            let write_fds: Vec<RawFd> = writers.iter().map(|i| pumps[*i].destination_fd()).collect();

            let (read_ready, write_ready) = select(&read_fds, &write_fds, POLL_TIMEOUT)?;

            for idx in write_ready {
                pumps[writers[idx]].flush_pending()?;
            }
            for idx in read_ready {
                pumps[readers[idx]].flush()?;
            }

            let finished = match input {
                Some(input) if !local.stdin_tty => pumps[input].is_done(),
                _ => pumps.iter().all(Pump::is_done),
            };
            if finished {
                debug!("All relayed streams are done");
                return Ok(());
            }

            if !self.operation.is_running()? {
                debug!("Remote process is no longer running");
                return Ok(());
            }
        }
    }

    /// Match the remote terminal to the local one. Only meaningful in raw
    /// mode, and skipped while the local terminal reports no size; failures
    /// mean the remote side already exited.
    fn resize(&self, stdout_fd: RawFd) {
        if !self.raw {
            return;
        }
        let Some((rows, cols)) = terminal::size(stdout_fd) else {
            return;
        };
        if let Err(e) = self.operation.resize(rows, cols) {
            debug!("Failed to resize remote terminal to {}x{}: {}", rows, cols, e);
        }
    }
}
