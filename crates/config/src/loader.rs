use std::path::{Path, PathBuf};

use {anyhow::Context, tracing::debug};

use crate::{env_subst::substitute_env, schema::RelayConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "relaybot.toml",
    "relaybot.yaml",
    "relaybot.yml",
    "relaybot.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<RelayConfig> {
    let value = load_config_value(path)?;
    serde_json::from_value(value).with_context(|| format!("invalid config in {}", path.display()))
}

/// Read, env-substitute and parse `path` into an untyped value.
pub fn load_config_value(path: &Path) -> anyhow::Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    debug!(path = %path.display(), "loading config");
    parse_config_value(&substitute_env(&raw), path)
}

/// Find the first config file in standard locations.
///
/// Search order:
/// 1. `./relaybot.{toml,yaml,yml,json}`
/// 2. `~/.config/relaybot/relaybot.{toml,yaml,yml,json}`
pub fn find_config_file() -> Option<PathBuf> {
    let local = CONFIG_FILENAMES.iter().map(PathBuf::from);
    let global = config_dir()
        .into_iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)));
    local.chain(global).find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/relaybot/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "relaybot").map(|d| d.config_dir().to_path_buf())
}

pub(crate) fn parse_config_value(raw: &str, path: &Path) -> anyhow::Result<serde_json::Value> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => {
            let v: toml::Value = toml::from_str(raw)
                .with_context(|| format!("TOML syntax error in {}", path.display()))?;
            Ok(serde_json::to_value(v)?)
        },
        "yaml" | "yml" => {
            let v: serde_yaml::Value = serde_yaml::from_str(raw)
                .with_context(|| format!("YAML syntax error in {}", path.display()))?;
            Ok(serde_json::to_value(v)?)
        },
        "json" => serde_json::from_str(raw)
            .with_context(|| format!("JSON syntax error in {}", path.display())),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
