//! Typed views over the `[config]`, `[logging]` and `[binaries]` sections.
//!
//! Flags keep the string comparisons the config format has always used:
//! most flags are on unless literally `false`, while `persist` is off when it
//! starts with an `f`.

use crate::config::Config;
use std::time::Duration;
use tracing::error;

impl Config {
    pub fn image(&self) -> &str {
        self.value("config", "image")
    }

    pub fn hostname(&self) -> &str {
        self.value("config", "hostname")
    }

    pub fn command(&self) -> &str {
        self.value("config", "command")
    }

    /// Pull the image before every login unless `auto_refresh = false`.
    pub fn auto_refresh(&self) -> bool {
        !self.value("config", "auto_refresh").eq_ignore_ascii_case("false")
    }

    /// Recreate the login identity inside the container unless
    /// `create_user = false`.
    pub fn create_user(&self) -> bool {
        !self.value("config", "create_user").eq_ignore_ascii_case("false")
    }

    pub fn file_transfers(&self) -> bool {
        !self.value("config", "file_transfers").eq_ignore_ascii_case("false")
    }

    /// Raw `persist` value; see [`persist_enabled`].
    pub fn persist(&self) -> &str {
        self.value("config", "persist")
    }

    pub fn persist_egrep(&self) -> &str {
        self.value("config", "persist_egrep")
    }

    pub fn term_signal(&self) -> &str {
        self.value("config", "term_signal")
    }

    /// Users that get the host instead of a container.
    pub fn skips_container(&self, username: &str) -> bool {
        self.value("config", "skip_users")
            .split(',')
            .any(|user| user == username)
    }

    pub fn docker_timeout(&self) -> Duration {
        let secs = self
            .parse::<u64>("config", "docker_timeout", "int")
            .unwrap_or_else(|e| {
                error!("{}", e);
                None
            })
            .unwrap_or(300);
        Duration::from_secs(secs)
    }

    /// How long a new shared container may take to create the login user.
    pub fn provision_timeout(&self) -> Duration {
        let secs = self
            .parse::<u64>("config", "provision_timeout", "int")
            .unwrap_or_else(|e| {
                error!("{}", e);
                None
            })
            .unwrap_or(10);
        Duration::from_secs(secs)
    }

    pub fn binary(&self, name: &str) -> &str {
        self.value("binaries", name)
    }
}

/// Whether a `persist` setting allows keeping containers at all.
pub fn persist_enabled(persist: &str) -> bool {
    !persist.to_lowercase().starts_with('f')
}
