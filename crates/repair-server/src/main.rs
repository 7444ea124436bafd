//! Task Server entrypoint: loads configuration, wires the store,
//! workspace manager, fixer adapter, and notifier, spawns the worker
//! pool, and serves the HTTP API.

mod api;
mod preflight;
mod runner;
mod state;
mod webhook;

use std::sync::Arc;

use repair_config::ServerConfig;
use repair_fixer::{CliFixerAdapter, FixerAdapter};
use repair_notify::{Notifier, SmtpConfig};
use repair_store::TraceStore;
use repair_workspace::WorkspaceManager;
use state::AppState;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = ServerConfig::from_env()?;
    config.require_ready()?;

    let store = TraceStore::open(&config.trace_db_path)?;
    let workspaces = WorkspaceManager::new(&config.workspaces_dir)?;

    let mut fixer_command = vec![config.claude_command.clone()];
    fixer_command.extend(config.claude_args.clone());
    let fixer: Arc<dyn FixerAdapter> = Arc::new(CliFixerAdapter::new(fixer_command));

    let notifier = if config.email_enabled {
        let smtp = SmtpConfig {
            host: config.smtp_host.clone().unwrap_or_default(),
            port: config.smtp_port,
            user: config.smtp_user.clone().unwrap_or_default(),
            password: config.smtp_password.clone().unwrap_or_default(),
            receiver: config.receiver_email.clone().unwrap_or_default(),
        };
        Notifier::from_config(&smtp)?
    } else {
        Notifier::disabled()
    };

    let pool_size = config.max_concurrent_tasks;
    let addr = format!("{}:{}", config.http_host, config.http_port);
    let state = AppState::new(config, store, workspaces, fixer, notifier);

    let shutdown = CancellationToken::new();
    runner::spawn_workers(state.clone(), pool_size, shutdown.clone());

    let app = api::build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, pool_size, "repair-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
    shutdown.cancel();
}
