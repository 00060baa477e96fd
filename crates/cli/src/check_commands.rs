use std::{
    io::{IsTerminal, Write},
    path::Path,
};

use {
    anyhow::Result,
    relaybot_config::{Severity, ValidationResult, validate},
};

use crate::run_commands::backend_registry;

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

pub fn check(path: &Path, verbose: bool) -> Result<()> {
    let registry = backend_registry();
    let result = validate::validate(path, &registry.types());

    let stderr = std::io::stderr();
    let color = stderr.is_terminal();
    let mut out = stderr.lock();
    writeln!(out, "Checking {}\n", path.display())?;
    print_report(&mut out, &result, verbose, color)?;

    let errors = result.count(Severity::Error);
    if errors > 0 {
        anyhow::bail!("{} has {errors} error(s)", path.display());
    }
    Ok(())
}

/// One line per diagnostic (info only when `verbose`), then a summary.
fn print_report(
    out: &mut impl Write,
    result: &ValidationResult,
    verbose: bool,
    color: bool,
) -> std::io::Result<()> {
    let shown: Vec<_> = result
        .diagnostics
        .iter()
        .filter(|d| verbose || d.severity != Severity::Info)
        .collect();

    for d in &shown {
        if color {
            let code = match d.severity {
                Severity::Error => RED,
                Severity::Warning => YELLOW,
                Severity::Info => CYAN,
            };
            writeln!(out, "  {code}{d}{RESET}")?;
        } else {
            writeln!(out, "  {d}")?;
        }
    }
    if !shown.is_empty() {
        writeln!(out)?;
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);
    if errors == 0 && warnings == 0 {
        writeln!(out, "No issues found.")
    } else {
        writeln!(out, "{errors} error(s), {warnings} warning(s)")
    }
}
