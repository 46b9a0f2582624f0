//! masterstore - lock-guarded master state
//!
//! CLI entry point: acquire the master lock, then save, load or hold it.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use masterstore::cli::{Cli, Command};
use masterstore::config::Config;
use masterstore::{StateStore, create_service};

fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("masterstore")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // stdout carries state payloads, so logs go to a file
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(log_dir.join("masterstore.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

/// Cancel `token` on SIGINT or SIGTERM
fn spawn_signal_handler(token: CancellationToken) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::spawn(async move {
            tokio::select! {
                _ = sigint.recv() => warn!("SIGINT received"),
                _ = sigterm.recv() => warn!("SIGTERM received"),
            }
            token.cancel();
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl+C received");
            }
            token.cancel();
        });
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        "masterstore loaded config: backend={}, lock-path={}, state-path={}",
        config.backend, config.lock_path, config.state_path
    );

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone())?;

    // Read the payload first so a slow pipe never holds the lock
    let payload = match &cli.command {
        Command::Save { file } => Some(read_payload(file.as_deref())?),
        _ => None,
    };

    let service = create_service(&config)
        .await
        .context("Failed to connect to coordination service")?;

    eprintln!("Waiting for lock at {}...", config.lock_path.cyan());
    let store = StateStore::open(service, config.store_config(), shutdown.clone())
        .await
        .context("Failed to acquire lock")?;

    let result = match cli.command {
        Command::Save { .. } => cmd_save(&store, &config, payload.unwrap_or_default()).await,
        Command::Load { output } => cmd_load(&store, output).await,
        Command::Hold => cmd_hold(&store, &config, &shutdown).await,
    };

    // Release the lock on every path, including failures
    if let Err(e) = store.shutdown().await {
        warn!(error = %e, "Failed to shut down store");
    }

    result
}

/// Read the payload to save from a file, or stdin when none is given
fn read_payload(file: Option<&Path>) -> Result<Vec<u8>> {
    match file {
        Some(path) => fs::read(path).context(format!("Failed to read {}", path.display())),
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("Failed to read stdin")?;
            Ok(buf)
        }
    }
}

/// Save `payload` as the state
async fn cmd_save(store: &StateStore, config: &Config, payload: Vec<u8>) -> Result<()> {
    let len = payload.len();
    store.save(payload).await.context("Failed to save state")?;
    eprintln!("{} Saved {} bytes to {}", "✓".green(), len, config.state_path.cyan());
    Ok(())
}

/// Write the state to stdout or a file
async fn cmd_load(store: &StateStore, output: Option<PathBuf>) -> Result<()> {
    let Some(state) = store.load().await.context("Failed to load state")? else {
        eprintln!("{}", "no state saved".yellow());
        return Ok(());
    };

    match output {
        Some(path) => {
            fs::write(&path, &state).context(format!("Failed to write {}", path.display()))?;
            eprintln!("{} Wrote {} bytes to {}", "✓".green(), state.len(), path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&state)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

/// Hold the lock until a termination signal arrives
async fn cmd_hold(store: &StateStore, config: &Config, shutdown: &CancellationToken) -> Result<()> {
    let lock = store.current_lock().await?;
    if let Some(lock) = lock {
        eprintln!(
            "{} Holding {} (session {}). Press Ctrl+C to release.",
            "✓".green(),
            config.lock_path.cyan(),
            lock.session()
        );
    }

    let mut ownership = store.subscribe_ownership();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = ownership.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *ownership.borrow_and_update();
                info!(?state, "Ownership changed");
            }
        }
    }

    info!("Releasing lock at {}", config.lock_path);
    Ok(())
}
