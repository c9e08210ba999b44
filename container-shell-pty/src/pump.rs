use crate::demux::FrameDemuxer;
use crate::io::{Chunk, Stream, set_blocking};
use std::io;
use std::os::fd::{AsRawFd, RawFd};

/// Bytes moved per flush.
pub const CHUNK_SIZE: usize = 4096;

/// Where a pump reads from.
#[derive(Debug)]
pub enum Source {
    Raw(Stream),
    Framed(FrameDemuxer),
}

impl Source {
    fn read(&mut self, n: usize) -> io::Result<Chunk> {
        match self {
            Source::Raw(stream) => stream.read(n),
            Source::Framed(demux) => demux.read(n),
        }
    }
}

impl AsRawFd for Source {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Source::Raw(stream) => stream.as_raw_fd(),
            Source::Framed(demux) => demux.as_raw_fd(),
        }
    }
}

impl From<Stream> for Source {
    fn from(stream: Stream) -> Self {
        Source::Raw(stream)
    }
}

impl From<FrameDemuxer> for Source {
    fn from(demux: FrameDemuxer) -> Self {
        Source::Framed(demux)
    }
}

/// Which way a pump moves bytes relative to the local terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local input towards the container.
    Input,
    /// Container output towards the local terminal.
    Output,
}

/// Relays one source into one destination stream.
#[derive(Debug)]
pub struct Pump {
    from: Source,
    to: Stream,
    direction: Direction,
    eof: bool,
    wait_for_output: bool,
    propagate_close: bool,
}

impl Pump {
    /// A pump that is done once its source ended and everything was written,
    /// and closes its destination when the source ends.
    pub fn new(from: impl Into<Source>, to: Stream, direction: Direction) -> Self {
        Self {
            from: from.into(),
            to,
            direction,
            eof: false,
            wait_for_output: true,
            propagate_close: true,
        }
    }

    /// With `false`, the pump counts as done as soon as its destination has
    /// nothing buffered, whether or not the source ended.
    pub fn wait_for_output(mut self, wait: bool) -> Self {
        self.wait_for_output = wait;
        self
    }

    /// Whether end-of-file on the source closes the destination.
    pub fn propagate_close(mut self, propagate: bool) -> Self {
        self.propagate_close = propagate;
        self
    }

    /// Move one chunk. Returns `None` once the source reached end-of-file.
    pub fn flush(&mut self) -> io::Result<Option<usize>> {
        let result = match self.from.read(CHUNK_SIZE) {
            Ok(Chunk::Data(data)) => self.to.write(&data).map(Some),
            Ok(Chunk::WouldBlock) => Ok(Some(0)),
            Ok(Chunk::Eof) => {
                self.eof = true;
                if self.propagate_close {
                    self.to.close()?;
                }
                return Ok(None);
            }
            Err(e) => Err(e),
        };
        self.ignore_broken_pipe(result.map(|written| written.unwrap_or(0)))
            .map(Some)
    }

    /// Flush bytes still buffered for the destination.
    pub fn flush_pending(&mut self) -> io::Result<usize> {
        let result = self.to.do_write();
        self.ignore_broken_pipe(result)
    }

    /// A destination that went away takes whatever was pending with it.
    fn ignore_broken_pipe(&mut self, result: io::Result<usize>) -> io::Result<usize> {
        match result {
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                self.to.discard();
                Ok(0)
            }
            other => other,
        }
    }

    pub fn is_done(&self) -> bool {
        (!self.wait_for_output || self.eof) && !self.to.needs_write()
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn needs_write(&self) -> bool {
        self.to.needs_write()
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn source_fd(&self) -> RawFd {
        self.from.as_raw_fd()
    }

    pub fn destination_fd(&self) -> RawFd {
        self.to.as_raw_fd()
    }

    /// Set both ends non-blocking or blocking.
    ///
    /// Returns the previous mode of each descriptor, in the order
    /// [`restore_blocking`] expects.
    pub fn set_blocking(&self, blocking: bool) -> io::Result<Vec<(RawFd, bool)>> {
        let mut previous = Vec::with_capacity(2);
        for fd in [self.source_fd(), self.destination_fd()] {
            previous.push((fd, set_blocking(fd, blocking)?));
        }
        Ok(previous)
    }
}

/// Undo [`Pump::set_blocking`]. Later entries are restored first, so a
/// descriptor shared by several pumps ends up in its original mode.
pub fn restore_blocking(previous: &[(RawFd, bool)]) {
    for (fd, blocking) in previous.iter().rev() {
        if let Err(e) = set_blocking(*fd, *blocking) {
            tracing::debug!("Failed to restore blocking mode of fd {}: {}", fd, e);
        }
    }
}
