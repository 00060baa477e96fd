use std::path::Path;

use {
    anyhow::{Context, Result},
    relaybot_channels::{BackendOptions, BackendRegistry},
    relaybot_config::{RelayConfig, Severity, validate},
    relaybot_supervisor::{Supervisor, SupervisorOptions},
    tokio_util::sync::CancellationToken,
    tracing::{error, info, warn},
};

/// Every backend type this binary can build.
pub fn backend_registry() -> BackendRegistry {
    BackendRegistry::new()
        .with(relaybot_irc::BACKEND_TYPE, relaybot_irc::factory())
        .with(relaybot_matrix::BACKEND_TYPE, relaybot_matrix::factory())
}

/// Build the relay from `config` and run it until shutdown.
pub async fn run(path: &Path, config: RelayConfig) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %path.display(),
        "relaybot starting"
    );

    let supervisor = build_supervisor(path, &config)?;

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    match supervisor.start(cancel).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_cancelled() => {
            info!("relaybot stopped");
            Ok(())
        },
        Err(e) => Err(anyhow::Error::new(e).context("relay stopped")),
    }
}

fn build_supervisor(path: &Path, config: &RelayConfig) -> Result<Supervisor> {
    let registry = backend_registry();

    let report = validate::validate(path, &registry.types());
    for d in &report.diagnostics {
        match d.severity {
            Severity::Error => error!(diagnostic = %d, "config error"),
            Severity::Warning => warn!(diagnostic = %d, "config warning"),
            Severity::Info => info!(diagnostic = %d, "config note"),
        }
    }
    if report.has_errors() {
        anyhow::bail!(
            "{} has {} error(s); run `relaybot check` for details",
            path.display(),
            report.count(Severity::Error)
        );
    }

    let table = config.routing_table().context("invalid mappings")?;
    let options = BackendOptions {
        debug: config.debug,
    };
    let backends = registry
        .build_all(&config.servers, &options)
        .context("failed to build backends")?;

    Supervisor::new(backends, table, SupervisorOptions {
        queue_capacity: config.relay.queue_capacity,
    })
    .context("invalid relay setup")
}

/// Cancel `cancel` on Ctrl-C or SIGTERM.
async fn shutdown_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown requested");
    cancel.cancel();
}
