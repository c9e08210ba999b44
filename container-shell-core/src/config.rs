//! Parse the INI configuration into ordered sections of key-value pairs.
//!
//! Follows the subset of `configparser` semantics the config file uses:
//!   - `[section]` headers, `key = value` or `key: value` entries
//!   - full-line `#` and `;` comments (inline text is kept verbatim)
//!   - keys are case-insensitive, except in `[mounts]` where keys are host paths
//!
//! A user file is layered over the built-in defaults, so every lookup of a
//! known key succeeds whether or not the file defines it.

use indexmap::IndexMap;
use miette::Diagnostic;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Where the config file lives unless `--config` says otherwise.
pub const CONFIG_LOCATION: &str = "/etc/container_shell/config.ini";

/// Sections whose keys keep their case.
const CASE_SENSITIVE_SECTIONS: &[&str] = &["mounts"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    sections: IndexMap<String, IndexMap<String, String>>,
}

/// A config read from disk together with how it was obtained.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    /// No file existed at `location`; only defaults apply.
    pub using_defaults: bool,
    pub location: PathBuf,
}

#[derive(Debug, Diagnostic, Error)]
pub enum ConfigError {
    #[error("illegal configuration line {line}: '{text}'")]
    IllegalLine { line: usize, text: String },
    #[error("entry on line {line} appears before any [section] header")]
    MissingSectionHeader { line: usize },
    #[error("invalid value supplied in INI section '{section}' for key {key}: '{value}', expected {expected}")]
    Cast {
        section: String,
        key: String,
        value: String,
        expected: &'static str,
    },
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl Config {
    /// An empty config with no sections.
    pub fn empty() -> Self {
        Self {
            sections: IndexMap::new(),
        }
    }

    /// The built-in defaults every deployment starts from.
    pub fn defaults() -> Self {
        let mut config = Self::empty();
        for section in ["config", "logging", "dns", "mounts", "qos", "binaries"] {
            config.add_section(section);
        }

        config.set("config", "image", "debian:latest");
        config.set("config", "hostname", "someserver");
        config.set("config", "auto_refresh", "");
        config.set("config", "skip_users", "");
        config.set("config", "create_user", "true");
        config.set("config", "command", "");
        config.set("config", "term_signal", "SIGHUP");
        config.set("config", "persist", "false");
        config.set("config", "persist_egrep", "tmux|screen");
        config.set("config", "docker_timeout", "300");
        config.set("config", "provision_timeout", "10");
        config.set("config", "file_transfers", "true");
        config.set("logging", "location", "/var/log/container_shell/messages.log");
        config.set("logging", "max_size", "1024000");
        config.set("logging", "max_count", "3");
        config.set("logging", "level", "INFO");
        config.set("dns", "servers", "");
        config.set("binaries", "runuser", "/sbin/runuser");
        config.set("binaries", "useradd", "/usr/sbin/useradd");
        config.set("binaries", "ps", "/bin/ps");
        config.set("binaries", "id", "/usr/bin/id");

        config
    }

    /// Read `location` over the defaults. A missing file is not an error.
    ///
    /// A non-empty `shell_command` replaces `[config] command`.
    pub fn load(location: &Path, shell_command: &str) -> Result<LoadedConfig, ConfigError> {
        let mut config = Self::defaults();
        let using_defaults = match std::fs::read_to_string(location) {
            Ok(text) => {
                config.merge(Self::parse_str(&text)?);
                false
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(source) => {
                return Err(ConfigError::Read {
                    path: location.display().to_string(),
                    source,
                });
            }
        };

        if !shell_command.is_empty() {
            config.set("config", "command", shell_command);
        }

        Ok(LoadedConfig {
            config,
            using_defaults,
            location: location.to_path_buf(),
        })
    }

    /// Parse INI text without applying defaults.
    pub fn parse_str(input: &str) -> Result<Self, ConfigError> {
        let mut config = Self::empty();
        let mut current: Option<String> = None;

        for (idx, raw) in input.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(rest) = line.strip_prefix('[') {
                let Some(name) = rest.strip_suffix(']') else {
                    return Err(ConfigError::IllegalLine {
                        line: line_no,
                        text: raw.to_string(),
                    });
                };
                let name = name.trim().to_string();
                config.add_section(&name);
                current = Some(name);
                continue;
            }

            let Some(section) = current.as_deref() else {
                return Err(ConfigError::MissingSectionHeader { line: line_no });
            };

            let Some(split_at) = line.find(['=', ':']) else {
                return Err(ConfigError::IllegalLine {
                    line: line_no,
                    text: raw.to_string(),
                });
            };
            let key = line[..split_at].trim();
            let value = line[split_at + 1..].trim();
            if key.is_empty() {
                return Err(ConfigError::IllegalLine {
                    line: line_no,
                    text: raw.to_string(),
                });
            }

            config.set(section, key, value);
        }

        Ok(config)
    }

    /// Overlay every entry of `other` onto `self`.
    pub fn merge(&mut self, other: Config) {
        for (section, entries) in other.sections {
            for (key, value) in entries {
                self.set(&section, &key, &value);
            }
        }
    }

    pub fn add_section(&mut self, name: &str) {
        self.sections.entry(name.to_string()).or_default();
    }

    pub fn set(&mut self, section: &str, key: &str, value: &str) {
        let key = normalize_key(section, key);
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key, value.to_string());
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)?
            .get(&normalize_key(section, key))
            .map(String::as_str)
    }

    /// Like [`Config::get`], with a missing key reading as empty.
    pub fn value(&self, section: &str, key: &str) -> &str {
        self.get(section, key).unwrap_or_default()
    }

    /// Entries of a section in file order.
    pub fn section(&self, name: &str) -> impl Iterator<Item = (&str, &str)> {
        self.sections
            .get(name)
            .into_iter()
            .flat_map(|entries| entries.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    /// Cast a value. Missing or empty values are `Ok(None)`.
    pub fn parse<T: FromStr>(
        &self,
        section: &str,
        key: &str,
        expected: &'static str,
    ) -> Result<Option<T>, ConfigError> {
        let value = self.value(section, key);
        if value.is_empty() {
            return Ok(None);
        }
        value.parse::<T>().map(Some).map_err(|_| ConfigError::Cast {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            expected,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults()
    }
}

impl std::fmt::Display for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (section, entries) in &self.sections {
            writeln!(f, "[{section}]")?;
            for (key, value) in entries {
                writeln!(f, "{key} = {value}")?;
            }
        }
        Ok(())
    }
}

fn normalize_key(section: &str, key: &str) -> String {
    if CASE_SENSITIVE_SECTIONS.contains(&section) {
        key.to_string()
    } else {
        key.to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_parse() {
        let input = r#"
            # a comment
            ; another comment
            [config]
            Image = alpine:3.19
            persist_egrep = tmux|screen # kept verbatim
            command:   ls -la

            [mounts]
            /home/Bob = /mnt/bob
        "#;
        let config = Config::parse_str(input).unwrap();
        assert_eq!(config.get("config", "image"), Some("alpine:3.19"));
        assert_eq!(config.get("config", "IMAGE"), Some("alpine:3.19"));
        assert_eq!(
            config.get("config", "persist_egrep"),
            Some("tmux|screen # kept verbatim")
        );
        assert_eq!(config.get("config", "command"), Some("ls -la"));
        let mounts: Vec<_> = config.section("mounts").collect();
        assert_eq!(mounts, vec![("/home/Bob", "/mnt/bob")]);
    }

    #[test]
    fn test_parse_empty_value() {
        let config = Config::parse_str("[dns]\nservers =\n").unwrap();
        assert_eq!(config.get("dns", "servers"), Some(""));
    }

    #[test]
    fn test_parse_rejects_entry_without_section() {
        let err = Config::parse_str("image = debian\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingSectionHeader { line: 1 }));
    }

    #[test]
    fn test_parse_rejects_garbage_line() {
        let err = Config::parse_str("[config]\njust words\n").unwrap_err();
        assert!(matches!(err, ConfigError::IllegalLine { line: 2, .. }));
    }

    #[test]
    fn test_defaults_present() {
        let config = Config::defaults();
        assert_eq!(config.value("config", "image"), "debian:latest");
        assert_eq!(config.value("config", "term_signal"), "SIGHUP");
        assert_eq!(config.value("binaries", "runuser"), "/sbin/runuser");
        assert_eq!(config.value("qos", "cpus"), "");
        assert_eq!(config.section("mounts").count(), 0);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Config::load(&dir.path().join("config.ini"), "").unwrap();
        assert!(loaded.using_defaults);
        assert_eq!(loaded.config, Config::defaults());
    }

    #[test]
    fn test_load_overlays_file_and_command() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[config]\nimage = centos:7\ncommand = top\n[qos]\ncpus = 2").unwrap();

        let loaded = Config::load(file.path(), "scp -t /tmp").unwrap();
        assert!(!loaded.using_defaults);
        assert_eq!(loaded.config.value("config", "image"), "centos:7");
        assert_eq!(loaded.config.value("config", "command"), "scp -t /tmp");
        assert_eq!(loaded.config.value("config", "hostname"), "someserver");
        assert_eq!(loaded.config.value("qos", "cpus"), "2");
    }

    #[test]
    fn test_load_keeps_file_command_without_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[config]\ncommand = top").unwrap();
        let loaded = Config::load(file.path(), "").unwrap();
        assert_eq!(loaded.config.value("config", "command"), "top");
    }

    #[test]
    fn test_parse_value_cast() {
        let mut config = Config::defaults();
        config.set("qos", "cpus", "1.5");
        config.set("qos", "device_read_iops", "lots");
        assert_eq!(config.parse::<f64>("qos", "cpus", "float").unwrap(), Some(1.5));
        assert_eq!(config.parse::<u64>("qos", "memory", "int").unwrap(), None);
        let err = config
            .parse::<u64>("qos", "device_read_iops", "int")
            .unwrap_err();
        assert!(err.to_string().contains("device_read_iops"));
    }
}
