//! Terminal utilities.
//!
//! Raw mode handling and size queries for the local terminal.

use std::io;
use std::os::fd::RawFd;

/// Check if `fd` refers to a terminal.
pub fn is_tty(fd: RawFd) -> bool {
    // SAFETY: isatty only inspects the descriptor number.
    unsafe { libc::isatty(fd) == 1 }
}

/// Rows and columns of the terminal behind `fd`, if it is one and has
/// been sized.
pub fn size(fd: RawFd) -> Option<(u16, u16)> {
    if !is_tty(fd) {
        return None;
    }
    // SAFETY: winsize is plain integers, and TIOCGWINSZ writes exactly one.
    let mut winsize: libc::winsize = unsafe { std::mem::zeroed() };
    if unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut winsize) } != 0 {
        return None;
    }
    if winsize.ws_row == 0 || winsize.ws_col == 0 {
        return None;
    }
    Some((winsize.ws_row, winsize.ws_col))
}

/// Raw terminal mode guard that restores terminal state on drop.
///
/// The original settings come back on every exit path, including errors
/// and panics unwinding through the relay.
pub struct RawModeGuard {
    fd: RawFd,
    original: Option<libc::termios>,
}

impl RawModeGuard {
    /// Put `fd` into raw mode when `raw` is set. Returns a guard that
    /// restores settings on drop.
    ///
    /// If `raw` is false or `fd` is not a TTY, this is a no-op.
    pub fn new(fd: RawFd, raw: bool) -> io::Result<Self> {
        if !raw || !is_tty(fd) {
            return Ok(Self { fd, original: None });
        }

        // SAFETY: termios is plain data, filled in by tcgetattr before use.
        let mut termios: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(fd, &mut termios) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let original = termios;

        // SAFETY: `termios` is a valid, initialized termios.
        unsafe { libc::cfmakeraw(&mut termios) };
        if unsafe { libc::tcsetattr(fd, libc::TCSADRAIN, &termios) } != 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            fd,
            original: Some(original),
        })
    }

    pub fn is_raw(&self) -> bool {
        self.original.is_some()
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Some(original) = self.original {
            // SAFETY: `original` came from tcgetattr on the same descriptor.
            unsafe { libc::tcsetattr(self.fd, libc::TCSADRAIN, &original) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::pty::{Winsize, openpty};
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    fn winsize(rows: u16, cols: u16) -> Winsize {
        Winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        }
    }

    #[test]
    fn test_socket_is_not_tty() {
        let (a, _b) = UnixStream::pair().unwrap();
        assert!(!is_tty(a.as_raw_fd()));
        assert_eq!(size(a.as_raw_fd()), None);
    }

    #[test]
    fn test_raw_mode_guard_noop_off_tty() {
        let (a, _b) = UnixStream::pair().unwrap();
        let guard = RawModeGuard::new(a.as_raw_fd(), true).unwrap();
        assert!(!guard.is_raw());
    }

    #[test]
    fn test_raw_mode_guard_not_requested() {
        let guard = RawModeGuard::new(libc::STDIN_FILENO, false).unwrap();
        assert!(!guard.is_raw());
    }

    #[test]
    fn test_size_of_pty() {
        let pty = openpty(&winsize(24, 80), None).unwrap();
        assert!(is_tty(pty.slave.as_raw_fd()));
        assert_eq!(size(pty.slave.as_raw_fd()), Some((24, 80)));
    }

    #[test]
    fn test_unsized_pty_has_no_size() {
        let pty = openpty(&winsize(0, 0), None).unwrap();
        assert_eq!(size(pty.slave.as_raw_fd()), None);

        let pty = openpty(&winsize(24, 0), None).unwrap();
        assert_eq!(size(pty.slave.as_raw_fd()), None);
    }

    #[test]
    fn test_raw_mode_guard_restores_pty() {
        let pty = openpty(&winsize(24, 80), None).unwrap();
        let fd = pty.slave.as_raw_fd();
        let before = nix::sys::termios::tcgetattr(&pty.slave).unwrap();

        {
            let guard = RawModeGuard::new(fd, true).unwrap();
            assert!(guard.is_raw());
            let raw = nix::sys::termios::tcgetattr(&pty.slave).unwrap();
            assert!(!raw.local_flags.contains(nix::sys::termios::LocalFlags::ECHO));
        }

        let after = nix::sys::termios::tcgetattr(&pty.slave).unwrap();
        assert_eq!(after.local_flags, before.local_flags);
        assert!(after.local_flags.contains(nix::sys::termios::LocalFlags::ECHO));
    }
}
