//! Terminal relay for container-shell.
//!
//! A [`PseudoTerminal`] drives a set of [`Pump`]s built by an [`Operation`]
//! from a single-threaded `poll` loop. Every relayed descriptor is
//! non-blocking while the loop runs, so a stalled peer never stalls the
//! session.

mod demux;
mod error;
pub mod io;
mod operation;
mod pseudo_terminal;
mod pump;
pub mod signals;
pub mod terminal;

pub use demux::FrameDemuxer;
pub use error::RelayError;
pub use io::{Chunk, SessionIo, Stream};
pub use operation::{ExecOperation, Operation, RunOperation};
pub use pseudo_terminal::{POLL_TIMEOUT, PseudoTerminal, SignalHandler};
pub use pump::{CHUNK_SIZE, Direction, Pump, Source};
pub use signals::{TERMINATION_SIGNALS, TerminationSignals, WinchHandler};
