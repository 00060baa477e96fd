//! Configuration loading, env substitution and validation.
//!
//! Config files: `relaybot.toml`, `relaybot.yaml`, `relaybot.yml` or
//! `relaybot.json`, searched in `./` then `~/.config/relaybot/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-default}` substitution in the raw
//! file before parsing.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{config_dir, find_config_file, load_config, load_config_value},
    schema::{RelayConfig, RelaySettings},
    validate::{Diagnostic, Severity, ValidationResult},
};
