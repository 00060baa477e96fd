//! Configuration validation.
//!
//! Runs before the relay starts and backs the `check` subcommand. Flags
//! unknown keys, type errors, backends defined twice, and routes pointing at
//! backends that do not exist.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use crate::{loader::parse_config_value, schema::RelayConfig};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// "syntax", "unknown-field", "type-error", "unknown-backend-type",
    /// "duplicate-backend", "route", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. `mappings[2].to`.
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{} [{}] {}", self.severity, self.category, self.message)
        } else {
            write!(
                f,
                "{} [{}] {}: {}",
                self.severity, self.category, self.path, self.message
            )
        }
    }
}

/// Result of validating a configuration file.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(
        &mut self,
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.diagnostics.push(Diagnostic {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        });
    }
}

const TOP_LEVEL_KEYS: &[&str] = &["debug", "relay", "servers", "mappings"];
const RELAY_KEYS: &[&str] = &["queue_capacity"];
const ROUTE_KEYS: &[&str] = &["from", "to"];
const TARGET_KEYS: &[&str] = &["server", "name"];

/// Validate the config file at `path`. `backend_types` lists the backend
/// types the binary can build (e.g. `["irc", "matrix"]`).
#[must_use]
pub fn validate(path: &Path, backend_types: &[&str]) -> ValidationResult {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => crate::env_subst::substitute_env(&raw),
        Err(e) => {
            let mut result = ValidationResult {
                config_path: Some(path.to_path_buf()),
                ..Default::default()
            };
            result.push(
                Severity::Error,
                "file-ref",
                "",
                format!("failed to read config file: {e}"),
            );
            return result;
        },
    };

    let mut result = match parse_config_value(&raw, path) {
        Ok(value) => validate_value(&value, backend_types),
        Err(e) => {
            let mut result = ValidationResult::default();
            result.push(Severity::Error, "syntax", "", format!("{e:#}"));
            result
        },
    };
    result.config_path = Some(path.to_path_buf());
    result
}

/// Validate an already-parsed config value.
#[must_use]
pub fn validate_value(value: &serde_json::Value, backend_types: &[&str]) -> ValidationResult {
    let mut result = ValidationResult::default();

    check_unknown_fields(value, &mut result);

    let config: RelayConfig = match serde_json::from_value(value.clone()) {
        Ok(config) => config,
        Err(e) => {
            result.push(Severity::Error, "type-error", "", format!("type error: {e}"));
            return result;
        },
    };

    check_servers(&config, backend_types, &mut result);
    check_routes(&config, &mut result);

    if config.relay.queue_capacity == 0 {
        result.push(
            Severity::Error,
            "type-error",
            "relay.queue_capacity",
            "queue capacity must be at least 1",
        );
    }

    result
}

fn check_unknown_fields(value: &serde_json::Value, result: &mut ValidationResult) {
    check_keys(value, TOP_LEVEL_KEYS, "", result);
    if let Some(relay) = value.get("relay") {
        check_keys(relay, RELAY_KEYS, "relay", result);
    }
    if let Some(routes) = value.get("mappings").and_then(|v| v.as_array()) {
        for (i, route) in routes.iter().enumerate() {
            let path = format!("mappings[{i}]");
            check_keys(route, ROUTE_KEYS, &path, result);
            for end in ROUTE_KEYS {
                if let Some(target) = route.get(*end) {
                    check_keys(target, TARGET_KEYS, &format!("{path}.{end}"), result);
                }
            }
        }
    }
}

fn check_keys(
    value: &serde_json::Value,
    known: &[&str],
    prefix: &str,
    result: &mut ValidationResult,
) {
    let Some(table) = value.as_object() else {
        return;
    };
    for key in table.keys() {
        if known.contains(&key.as_str()) {
            continue;
        }
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        let message = match suggest(key, known) {
            Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
            None => "unknown field".to_string(),
        };
        result.push(Severity::Error, "unknown-field", path, message);
    }
}

fn check_servers(config: &RelayConfig, backend_types: &[&str], result: &mut ValidationResult) {
    let mut seen: BTreeMap<&str, &str> = BTreeMap::new();
    for (backend_type, instances) in &config.servers {
        if !backend_types.contains(&backend_type.as_str()) {
            let message = match suggest(backend_type, backend_types) {
                Some(s) => format!("unknown backend type (did you mean \"{s}\"?)"),
                None => format!("unknown backend type; expected one of: {}", backend_types.join(", ")),
            };
            result.push(
                Severity::Error,
                "unknown-backend-type",
                format!("servers.{backend_type}"),
                message,
            );
        }
        for (name, fields) in instances {
            let path = format!("servers.{backend_type}.{name}");
            if !fields.is_object() {
                result.push(Severity::Error, "type-error", &path, "expected a table");
            }
            if let Some(previous) = seen.insert(name, backend_type) {
                result.push(
                    Severity::Error,
                    "duplicate-backend",
                    path,
                    format!("backend name also defined under servers.{previous}"),
                );
            }
        }
    }
}

fn check_routes(config: &RelayConfig, result: &mut ValidationResult) {
    if config.mappings.is_empty() {
        result.push(
            Severity::Warning,
            "route",
            "mappings",
            "no routes configured; nothing will be relayed",
        );
    }

    let known: BTreeSet<&str> = config.backend_names().collect();
    let mut referenced: BTreeSet<&str> = BTreeSet::new();

    for (i, edge) in config.mappings.iter().enumerate() {
        for (end, target) in [("from", &edge.from), ("to", &edge.to)] {
            let path = format!("mappings[{i}].{end}");
            if target.backend.is_empty() || target.room.is_empty() {
                result.push(Severity::Error, "route", path, "server and name are required");
                continue;
            }
            referenced.insert(target.backend.as_str());
            if !known.contains(target.backend.as_str()) {
                let candidates: Vec<&str> = known.iter().copied().collect();
                let message = match suggest(&target.backend, &candidates) {
                    Some(s) => format!(
                        "unknown backend \"{}\" (did you mean \"{s}\"?)",
                        target.backend
                    ),
                    None => format!("unknown backend \"{}\"", target.backend),
                };
                result.push(Severity::Error, "route", path, message);
            }
        }
        if edge.is_self_loop() {
            result.push(
                Severity::Warning,
                "route",
                format!("mappings[{i}]"),
                format!("route relays {} back into itself", edge.from),
            );
        }
    }

    for name in known.difference(&referenced) {
        result.push(
            Severity::Info,
            "route",
            "servers",
            format!("backend \"{name}\" is not used by any route"),
        );
    }
}

/// Closest candidate within edit distance 2.
fn suggest<'a>(needle: &str, candidates: &[&'a str]) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, edit_distance(needle, c)))
        .filter(|(_, d)| (1..=2).contains(d))
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut diag = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = (diag + usize::from(ca != *cb))
                .min(above + 1)
                .min(row[j] + 1);
            diag = above;
        }
    }
    row[b.len()]
}
