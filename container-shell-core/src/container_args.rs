//! Turn configuration and identity into container and exec create calls.

use crate::config::{Config, ConfigError};
use crate::identity::Identity;
use docker_engine::{ContainerSpec, ExecSpec, HostConfig, Mount, ThrottleDevice};
use std::str::FromStr;
use tracing::error;

/// CFS scheduler period the cpu quota is expressed against.
pub const CPU_PERIOD: i64 = 100_000;

/// Device the block IO limits apply to.
pub const THROTTLED_DEVICE: &str = "/dev/sda";

/// Whether one container serves every login of a user or a login gets its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// One long-lived container named after the user, reused across logins.
    Shared,
    /// A disposable container with a unique name, for file transfers.
    Standalone,
}

impl SessionMode {
    pub fn for_command(command: &str) -> Self {
        if is_file_transfer(command) {
            SessionMode::Standalone
        } else {
            SessionMode::Shared
        }
    }
}

/// `scp` sends its own command line; `sftp` asks for the subsystem binary.
pub fn is_file_transfer(command: &str) -> bool {
    let command = command.trim();
    command.starts_with("scp") || command.ends_with("sftp-server")
}

/// Everything needed to create the session's container.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateArgs {
    pub name: String,
    pub spec: ContainerSpec,
}

pub fn build_args(config: &Config, identity: &Identity, mode: SessionMode, tty: bool) -> CreateArgs {
    let mut host_config = HostConfig {
        init: true,
        dns: dns(config.value("dns", "servers")),
        mounts: mounts(config),
        ..Default::default()
    };
    qos(config, &mut host_config);

    let spec = ContainerSpec {
        image: config.image().to_string(),
        hostname: config.hostname().to_string(),
        tty,
        open_stdin: true,
        attach_stdin: true,
        attach_stdout: true,
        attach_stderr: true,
        cmd: container_command(
            &identity.name,
            identity.uid,
            config.create_user(),
            config.command(),
            config.binary("runuser"),
            config.binary("useradd"),
        ),
        host_config,
    };

    CreateArgs {
        name: container_name(&identity.name, mode),
        spec,
    }
}

/// Exec instance that drops a shared-container login into its shell.
pub fn exec_args(config: &Config, identity: &Identity, tty: bool) -> ExecSpec {
    ExecSpec {
        attach_stdin: true,
        attach_stdout: true,
        attach_stderr: true,
        tty,
        cmd: exec_command(
            &identity.name,
            config.create_user(),
            config.command(),
            config.binary("runuser"),
        ),
    }
}

pub fn container_name(username: &str, mode: SessionMode) -> String {
    match mode {
        SessionMode::Shared => username.to_string(),
        SessionMode::Standalone => generate_name(username),
    }
}

/// `<username>-<6 hex chars>`: readable in `docker ps`, unique per session.
pub fn generate_name(username: &str) -> String {
    let unique = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", username, &unique[..6])
}

/// Comma separated DNS servers, `None` when unset.
pub fn dns(addrs: &str) -> Option<Vec<String>> {
    if addrs.trim().is_empty() {
        return None;
    }
    Some(
        addrs
            .split(',')
            .map(|addr| addr.trim_matches(|c| c == ' ' || c == '\n').to_string())
            .collect(),
    )
}

/// Bind mounts from `[mounts]`, `host_dir = container_dir`.
pub fn mounts(config: &Config) -> Vec<Mount> {
    config
        .section("mounts")
        .map(|(local, container)| Mount::bind(local, container))
        .collect()
}

/// Apply `[qos]` limits. Values that fail to cast are logged and skipped.
pub fn qos(config: &Config, host: &mut HostConfig) {
    if let Some(cpus) = qos_value::<f64>(config, "cpus", "float") {
        host.cpu_quota = Some((cpus * CPU_PERIOD as f64) as i64);
        host.cpu_period = Some(CPU_PERIOD);
    }

    let memory = config.value("qos", "memory");
    if !memory.is_empty() {
        match parse_memory(memory) {
            Some(bytes) => host.memory = Some(bytes),
            None => error!(
                "{}",
                ConfigError::Cast {
                    section: "qos".into(),
                    key: "memory".into(),
                    value: memory.into(),
                    expected: "size",
                }
            ),
        }
    }

    let throttle = |key: &str| -> Vec<ThrottleDevice> {
        qos_value::<u64>(config, key, "int")
            .filter(|rate| *rate > 0)
            .map(|rate| {
                vec![ThrottleDevice {
                    path: THROTTLED_DEVICE.to_string(),
                    rate,
                }]
            })
            .unwrap_or_default()
    };
    host.blkio_device_read_iops = throttle("device_read_iops");
    host.blkio_device_write_iops = throttle("device_write_iops");
    host.blkio_device_read_bps = throttle("device_read_bps");
    host.blkio_device_write_bps = throttle("device_write_bps");
}

fn qos_value<T: FromStr>(config: &Config, key: &str, expected: &'static str) -> Option<T> {
    match config.parse::<T>("qos", key, expected) {
        Ok(value) => value,
        Err(e) => {
            error!("{}", e);
            None
        }
    }
}

/// Parse a memory limit such as `512m`, `2g`, `1024k` or plain bytes.
pub fn parse_memory(value: &str) -> Option<i64> {
    let value = value.trim().to_lowercase();
    let (digits, multiplier) = match value.char_indices().last()? {
        (idx, 'b') => (&value[..idx], 1),
        (idx, 'k') => (&value[..idx], 1 << 10),
        (idx, 'm') => (&value[..idx], 1 << 20),
        (idx, 'g') => (&value[..idx], 1 << 30),
        _ => (value.as_str(), 1),
    };
    digits.parse::<i64>().ok()?.checked_mul(multiplier)
}

/// The container's primary command.
///
/// With `create_user` the login identity is recreated (same name and uid)
/// and the shell or command runs as that user; files written to mounts then
/// keep the right ownership on the host. `None` keeps the image default.
pub fn container_command(
    username: &str,
    uid: u32,
    create_user: bool,
    command: &str,
    runuser: &str,
    useradd: &str,
) -> Option<Vec<String>> {
    if create_user {
        let run_user = if command.is_empty() {
            format!("{runuser} {username} -l")
        } else {
            format!("{runuser} {username} -c {}", quote(command))
        };
        let make_user = format!("{useradd} -m -u {uid} -s /bin/bash {username} 2>/dev/null");
        Some(vec![
            "/bin/bash".to_string(),
            "-c".to_string(),
            format!("{make_user} && {run_user}"),
        ])
    } else if !command.is_empty() {
        Some(vec!["/bin/bash".to_string(), "-c".to_string(), command.to_string()])
    } else {
        None
    }
}

/// The command an exec into a shared container runs.
pub fn exec_command(username: &str, create_user: bool, command: &str, runuser: &str) -> Vec<String> {
    let mut cmd = if create_user {
        vec![runuser.to_string(), username.to_string()]
    } else {
        vec!["/bin/bash".to_string()]
    };
    if command.is_empty() {
        cmd.push("-l".to_string());
    } else {
        cmd.push("-c".to_string());
        cmd.push(command.to_string());
    }
    cmd
}

fn quote(s: &str) -> String {
    shell_escape::unix::escape(s.into()).into_owned()
}
