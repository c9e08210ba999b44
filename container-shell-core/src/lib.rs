//! Configuration, login identity and container arguments for container-shell.

mod config;
pub mod container_args;
mod identity;
mod settings;

pub use config::{CONFIG_LOCATION, Config, ConfigError, LoadedConfig};
pub use container_args::{CreateArgs, SessionMode};
pub use identity::{Identity, IdentityError};
pub use settings::persist_enabled;
