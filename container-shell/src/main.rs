use clap::Parser;
use container_shell::cli::Cli;
use container_shell::host::{host_command, run_on_host};
use container_shell::log::init_tracing;
use container_shell::{SessionError, printerr, run_session};
use container_shell_core::{Config, Identity};
use container_shell_pty::TerminationSignals;
use docker_engine::DockerClient;
use miette::Result;
use std::process;
use tracing::{debug, error, info};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let identity = Identity::current().map_err(SessionError::from)?;
    let loaded = Config::load(&cli.config, &cli.command)?;
    let config = loaded.config;

    init_tracing(&config);
    debug!("CLI Args: {:?}", cli);
    if loaded.using_defaults {
        debug!(
            "No defined config file at {}. Using default values",
            loaded.location.display()
        );
    } else {
        debug!("Custom config:\n{}", config);
    }

    if config.skips_container(&identity.name) {
        info!("User {} accessing host environment", identity.name);
        let cmdline = host_command(
            std::env::var("SSH_ORIGINAL_COMMAND").ok(),
            &cli.command,
            std::env::var("SHELL").ok(),
        );
        let code = match run_on_host(&cmdline) {
            Ok(code) => code,
            Err(e) => {
                error!("Unable to run '{}' on the host: {}", cmdline, e);
                printerr(&format!("{cmdline}: {e}"));
                1
            }
        };
        process::exit(code);
    }

    let signals = TerminationSignals::register().map_err(SessionError::from)?;
    let engine = DockerClient::from_env(config.docker_timeout());
    let code = run_session(&engine, &config, &identity, &signals);
    process::exit(code);
}
