use clap::{Parser, crate_version};
use container_shell_core::CONFIG_LOCATION;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "container_shell",
    version = crate_version!(),
    about = "A mostly transparent proxy to an isolated shell environment."
)]
pub struct Cli {
    #[arg(
        short,
        long,
        default_value = "",
        help = "Execute a specific command, then terminate."
    )]
    pub command: String,

    #[arg(
        long,
        env = "CONTAINER_SHELL_CONFIG",
        default_value = CONFIG_LOCATION,
        help = "Path to the INI configuration file."
    )]
    pub config: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["container_shell"]).unwrap();
        assert_eq!(cli.command, "");
        assert_eq!(cli.config, PathBuf::from(CONFIG_LOCATION));
    }

    #[test]
    fn test_command_as_sshd_passes_it() {
        let cli = Cli::try_parse_from(["container_shell", "-c", "scp -t /tmp"]).unwrap();
        assert_eq!(cli.command, "scp -t /tmp");

        let cli = Cli::try_parse_from(["container_shell", "--command", "ls", "--config", "/tmp/c.ini"])
            .unwrap();
        assert_eq!(cli.command, "ls");
        assert_eq!(cli.config, PathBuf::from("/tmp/c.ini"));
    }
}
