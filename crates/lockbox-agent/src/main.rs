//! `lockbox-agent` — keeps a client's server configuration in sync.
//!
//! `watch` runs the config service until interrupted and prints every
//! configuration it publishes as one JSON line. `show`, `flag`, and `flags`
//! fetch once (falling back to the stored copy) and print the result.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use lockbox_agent::config::{AgentConfig, StorageKind};
use lockbox_agent::state::AgentState;
use lockbox_agent::telemetry;
use lockbox_core::auth::AuthStatus;
use lockbox_core::model::{FeatureFlag, FlagValue, ServerConfig};
use lockbox_core::service::ConfigService;

/// Lockbox agent.
#[derive(Parser)]
#[command(
    name = "lockbox-agent",
    version,
    about = "Lockbox agent — keeps server configuration and feature flags in sync",
    long_about = None,
    after_help = "Environment variables:\n  \
         LOCKBOX_BASE_URL          Server base URL\n  \
         LOCKBOX_API_URL           API URL (default: <base>/api)\n  \
         LOCKBOX_STORAGE           memory | file (default: file)\n  \
         LOCKBOX_STATE_PATH        State file (default: ./data/state.json)\n  \
         LOCKBOX_REFRESH_INTERVAL  Seconds between refreshes (default: 3600)\n  \
         LOCKBOX_AUTH_STATUS       logged_out | locked | unlocked\n  \
         LOCKBOX_LOG_LEVEL         Log filter (default: info)\n  \
         LOCKBOX_LOG_FORMAT        json | pretty (default: json)\n  \
         LOCKBOX_HTTP_TIMEOUT      Request timeout in seconds (default: 10)"
)]
struct Cli {
    /// API URL, overrides `LOCKBOX_API_URL`.
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// State file path; implies file storage.
    #[arg(long, global = true)]
    state_path: Option<PathBuf>,

    /// Session state, overrides `LOCKBOX_AUTH_STATUS`.
    #[arg(long, global = true)]
    auth_status: Option<AuthStatus>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Keep the configuration fresh and print every update.
    Watch,
    /// Print the current server configuration as JSON.
    Show,
    /// Print one feature flag.
    Flag {
        /// Flag key, e.g. `autofill-v2`.
        key: String,
        /// Printed when the flag is unset. JSON scalars keep their type.
        #[arg(long)]
        default: Option<String>,
    },
    /// Print every known feature flag.
    Flags,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = AgentConfig::from_env();
    if let Some(api_url) = cli.api_url {
        config.environment.api = Some(api_url);
    }
    if let Some(path) = cli.state_path {
        config.storage = StorageKind::File { path };
    }
    if let Some(status) = cli.auth_status {
        config.auth_status = status;
    }

    telemetry::init(&config.log_level, config.log_json);

    let state = AgentState::build(&config).context("failed to initialize agent")?;

    match cli.command {
        Command::Watch => watch_config(&state).await,
        Command::Show => show(&state).await,
        Command::Flag { key, default } => flag(&state, &key, default.as_deref()).await,
        Command::Flags => flags(&state).await,
    }
}

async fn watch_config(state: &AgentState) -> Result<ExitCode> {
    let service = state.start_service();
    let mut updates = service.subscribe();

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(shutdown_signal(shutdown_tx));

    info!(api = %state.environment.urls().api_url(), "watching server config");

    loop {
        tokio::select! {
            update = updates.next() => {
                let Some(config) = update else { break };
                let line = serde_json::to_string(&config.to_data())
                    .context("failed to encode server config")?;
                println!("{line}");
            }
            _ = shutdown_rx.changed() => break,
        }
    }

    drop(updates);
    service.shutdown().await;
    Ok(ExitCode::SUCCESS)
}

/// Refresh once and return whatever is current afterwards.
///
/// On a failed fetch the stored configuration (if any) is used.
async fn fetch_once(service: &ConfigService) -> Option<std::sync::Arc<ServerConfig>> {
    match service.refresh_now().await {
        Ok(Some(config)) => Some(config),
        Ok(None) => service.current(),
        Err(e) => {
            warn!(error = %e, "could not refresh server config, using stored copy");
            service.current()
        }
    }
}

async fn show(state: &AgentState) -> Result<ExitCode> {
    let service = state.start_oneshot();
    let config = fetch_once(&service).await;
    service.shutdown().await;

    let Some(config) = config else {
        eprintln!("no server configuration available");
        return Ok(ExitCode::FAILURE);
    };

    let json = serde_json::to_string_pretty(&config.to_data())
        .context("failed to encode server config")?;
    println!("{json}");
    Ok(ExitCode::SUCCESS)
}

async fn flag(state: &AgentState, key: &str, default: Option<&str>) -> Result<ExitCode> {
    let service = state.start_oneshot();
    fetch_once(&service).await;

    let value = match default {
        Some(default) => Some(service.get_feature_flag(key, parse_flag_value(default))),
        None => service
            .current()
            .and_then(|config| config.feature_state(key).cloned()),
    };
    service.shutdown().await;

    match value {
        Some(value) => {
            println!("{value}");
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!("feature flag '{key}' is not set");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn flags(state: &AgentState) -> Result<ExitCode> {
    let service = state.start_oneshot();
    let config = fetch_once(&service).await;
    service.shutdown().await;

    let width = FeatureFlag::ALL
        .iter()
        .map(|flag| flag.as_str().len())
        .max()
        .unwrap_or_default();
    for flag in FeatureFlag::ALL {
        let value = config
            .as_deref()
            .and_then(|c| c.feature_state(flag))
            .map_or_else(|| "unset".to_owned(), ToString::to_string);
        println!("{:<width$}  {value}", flag.as_str());
    }
    Ok(ExitCode::SUCCESS)
}

/// Read a `--default` argument. JSON scalars (`true`, `3`, `"x"`) keep
/// their type; anything else is taken as a plain string.
fn parse_flag_value(raw: &str) -> FlagValue {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|value| FlagValue::from_json(&value))
        .unwrap_or_else(|| FlagValue::String(raw.to_owned()))
}

/// Wait for SIGINT or SIGTERM, then notify via the watch channel.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping agent");
    let _ = shutdown_tx.send(true);
}
