mod check_commands;
mod run_commands;

use std::path::{Path, PathBuf};

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "relaybot", version, about = "relaybot: relay chat between IRC and Matrix")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (default: ./relaybot.toml, then ~/.config/relaybot/).
    #[arg(long, short, global = true, env = "RELAYBOT_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Connect every backend and relay messages (default).
    Run,
    /// Validate the configuration file and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
}

/// `debug = true` in the config forces trace level; `RUST_LOG` still wins.
fn init_telemetry(cli: &Cli, debug: bool) {
    let level = if debug { "trace" } else { cli.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn resolve_config_path(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => relaybot_config::find_config_file().context(
            "no config file found; create relaybot.toml or pass --config <PATH>",
        ),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let path = resolve_config_path(cli.config.as_deref())?;

    match cli.command {
        None | Some(Commands::Run) => {
            let config = relaybot_config::load_config(&path)?;
            init_telemetry(&cli, config.debug);
            run_commands::run(&path, config).await
        },
        Some(Commands::Check { verbose }) => {
            init_telemetry(&cli, false);
            check_commands::check(&path, verbose)
        },
    }
}
