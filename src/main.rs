use clap::Parser;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use shellgram::cli::{self, Cli, Command};
use shellgram::config::{self, GatewayConfig};
use shellgram::gateway;
use shellgram::logging;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        // No subcommand or explicit `start` both launch the gateway.
        None | Some(Command::Start) => run_gateway().await,

        Some(Command::Check) => {
            config::load_dotenv()?;
            cli::handle_check()
        }

        Some(Command::Exec { line, timeout }) => cli::handle_exec(&line, timeout).await,

        Some(Command::Version) => {
            cli::handle_version();
            Ok(())
        }
    }
}

async fn run_gateway() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env before logging so SHELLGRAM_LOG set there takes effect.
    let dotenv = config::load_dotenv();
    logging::init_logging(&logging::LogConfig::from_env())?;

    match dotenv {
        Ok(Some(path)) => info!("Loaded environment from {}", path.display()),
        Ok(None) => debug!("No .env file found, using process environment"),
        Err(e) => {
            error!("Failed to load .env: {}", e);
            return Err(e.into());
        }
    }

    let cfg = GatewayConfig::from_env().map_err(|e| {
        error!("Invalid configuration: {}", e);
        e
    })?;
    info!(config = ?cfg, "Configuration loaded");

    let registry = gateway::load_registry(&cfg).map_err(|e| {
        error!("Failed to load command registry: {}", e);
        e
    })?;
    info!(
        "Loaded {} commands from {}",
        registry.len(),
        cfg.commands_file.display()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let reason = await_shutdown_trigger().await;
        info!("Shutdown signal received ({})", reason);
        let _ = shutdown_tx.send(true);
    });

    if let Err(e) = gateway::run(cfg, registry, shutdown_rx).await {
        error!("Gateway failed: {}", e);
        return Err(e.into());
    }

    info!("Gateway shut down");
    Ok(())
}

/// Wait for either Ctrl+C or SIGTERM (Unix only) and return a label for logging.
#[cfg(unix)]
async fn await_shutdown_trigger() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => "ctrl-c",
                _ = sigterm.recv() => "SIGTERM",
            }
        }
        Err(e) => {
            warn!(
                "Failed to install SIGTERM handler: {}; falling back to Ctrl+C only",
                e
            );
            wait_for_ctrl_c().await
        }
    }
}

/// On non-Unix platforms, only Ctrl+C is available.
#[cfg(not(unix))]
async fn await_shutdown_trigger() -> &'static str {
    wait_for_ctrl_c().await
}

async fn wait_for_ctrl_c() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "ctrl-c",
        Err(e) => {
            // Without a handler the process can only be killed; keep serving.
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending().await
        }
    }
}
