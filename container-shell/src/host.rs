//! Pass-through to the host for users that never get a container.

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::Command;

/// What a skip-listed user asked to run.
///
/// The command the SSH client sent wins, then `-c`, then the login shell.
pub fn host_command(ssh_original: Option<String>, cli_command: &str, shell: Option<String>) -> String {
    ssh_original
        .filter(|cmd| !cmd.trim().is_empty())
        .or_else(|| Some(cli_command.to_string()).filter(|cmd| !cmd.trim().is_empty()))
        .or(shell)
        .unwrap_or_else(|| "/bin/sh".to_string())
}

/// Run `cmdline` split on whitespace, inheriting the terminal.
///
/// A command killed by a signal reports `128 + signal`.
pub fn run_on_host(cmdline: &str) -> io::Result<i32> {
    let mut words = cmdline.split_whitespace();
    let Some(program) = words.next() else {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty command"));
    };
    let status = Command::new(program).args(words).status()?;
    Ok(status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1))
}
