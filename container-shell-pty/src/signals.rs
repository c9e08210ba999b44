//! Signal interposition for the relay.
//!
//! Handlers only flip atomics; the relay loop notices them once the
//! readiness wait is interrupted and does the real work outside of signal
//! context.

use nix::sys::signal::Signal;
use signal_hook::SigId;
use signal_hook::consts::signal::{SIGABRT, SIGHUP, SIGINT, SIGQUIT, SIGTERM, SIGWINCH};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::debug;

/// Signals that end a session.
pub const TERMINATION_SIGNALS: &[i32] = &[SIGHUP, SIGINT, SIGQUIT, SIGABRT, SIGTERM];

/// Name of a signal as `kill -<name>` accepts it.
pub fn signal_name(signal: i32) -> Option<&'static str> {
    Signal::try_from(signal).ok().map(Signal::as_str)
}

/// Traps SIGWINCH while alive and restores the previous disposition on drop.
pub struct WinchHandler {
    pending: Arc<AtomicBool>,
    id: SigId,
}

impl WinchHandler {
    pub fn register() -> io::Result<Self> {
        let pending = Arc::new(AtomicBool::new(false));
        let id = signal_hook::flag::register(SIGWINCH, Arc::clone(&pending))?;
        Ok(Self { pending, id })
    }

    /// Whether the window changed since the last call.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::SeqCst)
    }
}

impl Drop for WinchHandler {
    fn drop(&mut self) {
        signal_hook::low_level::unregister(self.id);
    }
}

/// Latches the first termination signal delivered to the process.
///
/// Later signals overwrite the latch only until it is taken; the teardown
/// they trigger is guarded separately.
pub struct TerminationSignals {
    last: Arc<AtomicUsize>,
    ids: Vec<SigId>,
}

impl TerminationSignals {
    pub fn register() -> io::Result<Self> {
        Self::register_for(TERMINATION_SIGNALS)
    }

    pub fn register_for(signals: &[i32]) -> io::Result<Self> {
        let last = Arc::new(AtomicUsize::new(0));
        let mut ids = Vec::with_capacity(signals.len());
        for signal in signals {
            ids.push(signal_hook::flag::register_usize(
                *signal,
                Arc::clone(&last),
                *signal as usize,
            )?);
        }
        debug!("Trapping termination signals {:?}", signals);
        Ok(Self { last, ids })
    }

    /// The signal received since the last call, if any.
    pub fn take(&self) -> Option<i32> {
        match self.last.swap(0, Ordering::SeqCst) {
            0 => None,
            signal => Some(signal as i32),
        }
    }
}

impl Drop for TerminationSignals {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signal_hook::consts::signal::SIGUSR1;

    #[test]
    fn test_signal_names() {
        assert_eq!(signal_name(SIGHUP), Some("SIGHUP"));
        assert_eq!(signal_name(SIGTERM), Some("SIGTERM"));
        assert_eq!(signal_name(0), None);
    }

    #[test]
    fn test_latch_records_signal_once() {
        let signals = TerminationSignals::register_for(&[SIGUSR1]).unwrap();
        assert_eq!(signals.take(), None);
        signal_hook::low_level::raise(SIGUSR1).unwrap();
        assert_eq!(signals.take(), Some(SIGUSR1));
        assert_eq!(signals.take(), None);
    }

    #[test]
    fn test_winch_flag() {
        let winch = WinchHandler::register().unwrap();
        assert!(!winch.take());
        signal_hook::low_level::raise(SIGWINCH).unwrap();
        assert!(winch.take());
        assert!(!winch.take());
    }
}
