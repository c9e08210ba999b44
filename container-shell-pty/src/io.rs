//! Non-blocking streams over sockets and local descriptors.

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::unistd;
use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;

/// Errors that mean "no progress right now", never "closed".
const RECOVERABLE: &[i32] = &[libc::EINTR, libc::EDEADLK, libc::EWOULDBLOCK, libc::EAGAIN];

/// Result of a single read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Data(Vec<u8>),
    /// Nothing available; the stream is still open.
    WouldBlock,
    Eof,
}

fn is_recoverable(err: &io::Error) -> bool {
    err.raw_os_error()
        .is_some_and(|code| RECOVERABLE.contains(&code))
}

#[derive(Debug)]
enum Handle {
    Socket(UnixStream),
    /// Descriptor owned by someone else, typically one of the process's
    /// standard streams. It is never closed here.
    Fd(RawFd),
}

/// One readable/writable handle with a pending-write buffer.
#[derive(Debug)]
pub struct Stream {
    handle: Handle,
    buffer: Vec<u8>,
    close_requested: bool,
    closed: bool,
}

impl Stream {
    pub fn socket(socket: UnixStream) -> Self {
        Self::with_handle(Handle::Socket(socket))
    }

    pub fn fd(fd: RawFd) -> Self {
        Self::with_handle(Handle::Fd(fd))
    }

    pub fn stdin() -> Self {
        Self::fd(libc::STDIN_FILENO)
    }

    pub fn stdout() -> Self {
        Self::fd(libc::STDOUT_FILENO)
    }

    pub fn stderr() -> Self {
        Self::fd(libc::STDERR_FILENO)
    }

    fn with_handle(handle: Handle) -> Self {
        Self {
            handle,
            buffer: Vec::new(),
            close_requested: false,
            closed: false,
        }
    }

    /// Read up to `n` bytes.
    pub fn read(&mut self, n: usize) -> io::Result<Chunk> {
        let mut buf = vec![0u8; n];
        let result = match &mut self.handle {
            Handle::Socket(socket) => socket.read(&mut buf),
            Handle::Fd(fd) => {
                // SAFETY: the owner keeps `fd` open for the whole session.
                let fd = unsafe { BorrowedFd::borrow_raw(*fd) };
                unistd::read(fd, &mut buf).map_err(io::Error::from)
            }
        };

        match result {
            Ok(0) => Ok(Chunk::Eof),
            Ok(read) => {
                buf.truncate(read);
                Ok(Chunk::Data(buf))
            }
            Err(e) if is_recoverable(&e) => Ok(Chunk::WouldBlock),
            Err(e) => Err(e),
        }
    }

    /// Queue `data` and try to flush it once. Returns the number of bytes
    /// accepted, which is all of them.
    pub fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        self.buffer.extend_from_slice(data);
        self.do_write()?;
        Ok(data.len())
    }

    /// Flush as much of the pending buffer as the handle takes.
    pub fn do_write(&mut self) -> io::Result<usize> {
        let result = match &mut self.handle {
            Handle::Socket(socket) => socket.write(&self.buffer),
            Handle::Fd(fd) => {
                // SAFETY: the owner keeps `fd` open for the whole session.
                let fd = unsafe { BorrowedFd::borrow_raw(*fd) };
                unistd::write(fd, &self.buffer).map_err(io::Error::from)
            }
        };

        let written = match result {
            Ok(written) => written,
            Err(e) if is_recoverable(&e) => 0,
            Err(e) => return Err(e),
        };
        self.buffer.drain(..written);

        if self.close_requested && self.buffer.is_empty() {
            self.close()?;
        }
        Ok(written)
    }

    pub fn needs_write(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Drop whatever is still pending, for a peer that went away.
    pub fn discard(&mut self) {
        self.buffer.clear();
    }

    /// Close the writing side once the buffer has drained.
    ///
    /// Sockets are shut down for writing so the peer sees end-of-file while
    /// replies can still be read from the same connection.
    pub fn close(&mut self) -> io::Result<()> {
        self.close_requested = true;
        if !self.buffer.is_empty() || self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Handle::Socket(socket) = &self.handle {
            match socket.shutdown(Shutdown::Write) {
                Err(e) if e.kind() != io::ErrorKind::NotConnected => return Err(e),
                _ => {}
            }
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl AsRawFd for Stream {
    fn as_raw_fd(&self) -> RawFd {
        match &self.handle {
            Handle::Socket(socket) => socket.as_raw_fd(),
            Handle::Fd(fd) => *fd,
        }
    }
}

/// The local side of a session: the process's standard streams, or socket
/// pairs standing in for them.
#[derive(Debug)]
pub struct SessionIo {
    pub stdin: Stream,
    pub stdout: Stream,
    pub stderr: Stream,
}

impl SessionIo {
    /// The process's own standard streams.
    pub fn std() -> Self {
        Self {
            stdin: Stream::stdin(),
            stdout: Stream::stdout(),
            stderr: Stream::stderr(),
        }
    }

    pub fn stdin_is_tty(&self) -> bool {
        crate::terminal::is_tty(self.stdin.as_raw_fd())
    }

    pub fn stdout_is_tty(&self) -> bool {
        crate::terminal::is_tty(self.stdout.as_raw_fd())
    }
}

/// Switch `fd` between blocking and non-blocking mode.
///
/// Returns whether it was blocking before, so callers can restore it.
pub fn set_blocking(fd: RawFd, blocking: bool) -> io::Result<bool> {
    // SAFETY: callers only pass descriptors they hold open.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let flags = OFlag::from_bits_truncate(fcntl(borrowed, FcntlArg::F_GETFL)?);
    let was_blocking = !flags.contains(OFlag::O_NONBLOCK);

    let mut new_flags = flags;
    new_flags.set(OFlag::O_NONBLOCK, !blocking);
    if new_flags != flags {
        fcntl(borrowed, FcntlArg::F_SETFL(new_flags))?;
    }
    Ok(was_blocking)
}

/// Wait until any of `read` is readable or any of `write` is writable.
///
/// Returns the positions (within each slice) of the ready descriptors. A
/// signal interrupting the wait reads as "nothing ready". Hung up, failed
/// and invalid descriptors count as ready, so their next read or write
/// reports what happened.
pub fn select(
    read: &[RawFd],
    write: &[RawFd],
    timeout: Duration,
) -> io::Result<(Vec<usize>, Vec<usize>)> {
    // SAFETY: the descriptors stay open until `poll` returns; one that
    // does not comes back as POLLNVAL.
    let mut fds: Vec<PollFd> = read
        .iter()
        .map(|fd| (*fd, PollFlags::POLLIN))
        .chain(write.iter().map(|fd| (*fd, PollFlags::POLLOUT)))
        .map(|(fd, events)| PollFd::new(unsafe { BorrowedFd::borrow_raw(fd) }, events))
        .collect();

    let millis = timeout.as_millis().min(u16::MAX as u128) as u16;
    match poll(&mut fds, PollTimeout::from(millis)) {
        Ok(_) => {}
        Err(Errno::EINTR) => return Ok((Vec::new(), Vec::new())),
        Err(e) => return Err(e.into()),
    }

    let broken = PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL;
    let readable = PollFlags::POLLIN | broken;
    let writable = PollFlags::POLLOUT | broken;
    let ready = |idx: usize, interest: PollFlags| {
        fds[idx]
            .revents()
            .is_some_and(|revents| revents.intersects(interest))
    };

    let read_ready = (0..read.len()).filter(|idx| ready(*idx, readable)).collect();
    let write_ready = (0..write.len())
        .filter(|idx| ready(read.len() + idx, writable))
        .collect();
    Ok((read_ready, write_ready))
}
