use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::Duration;
use telemon_common::shutdown::shutdown_signal;
use telemon_server::config::ServerConfig;
use telemon_server::dump::{self, DumpScheduler};
use telemon_server::state::AppState;
use telemon_server::{app, grpc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::server::TcpIncoming;
use tonic::transport::Server as TonicServer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("telemon=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/server.toml".to_string());

    let mut config = ServerConfig::load(&config_path)?;
    config.apply_env(|name| std::env::var(name).ok())?;
    config.validate()?;

    run_server(config).await
}

async fn run_server(config: ServerConfig) -> Result<()> {
    tracing::info!(
        http = %config.http_address,
        grpc = %config.grpc_address,
        db = ?config.redacted_database_url(),
        signed = config.signing_key.is_some(),
        "telemon-server starting"
    );

    let cancel = CancellationToken::new();
    let state = AppState::from_config(&config, cancel.clone()).await?;

    // gRPC server
    let grpc_listener = tokio::net::TcpListener::bind(&config.grpc_address)
        .await
        .with_context(|| format!("failed to bind gRPC listener on {}", config.grpc_address))?;
    let grpc_addr = grpc_listener.local_addr()?;
    let grpc_incoming = TcpIncoming::from_listener(grpc_listener, true, None)
        .map_err(|e| anyhow::anyhow!("failed to configure gRPC listener: {e}"))?;
    let grpc_server = TonicServer::builder()
        .add_service(grpc::metric_service(state.clone()))
        .serve_with_incoming_shutdown(grpc_incoming, cancel.clone().cancelled_owned());

    // HTTP server
    let http_listener = tokio::net::TcpListener::bind(&config.http_address)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {}", config.http_address))?;
    let http_addr = http_listener.local_addr()?;
    let http_server = axum::serve(
        http_listener,
        app::build_http_app(state.clone()).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(cancel.clone().cancelled_owned());

    // A listener that dies takes the whole process down with it.
    let grpc_cancel = cancel.clone();
    let grpc_task = tokio::spawn(async move {
        if let Err(e) = grpc_server.await {
            tracing::error!(error = %e, "gRPC server error");
        }
        grpc_cancel.cancel();
    });
    let http_cancel = cancel.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.await {
            tracing::error!(error = %e, "HTTP server error");
        }
        http_cancel.cancel();
    });

    let dump_task = match (&state.dump, state.sync_dump) {
        (Some(store), false) => {
            let scheduler = DumpScheduler::new(
                store.clone(),
                Duration::from_secs(config.storage.store_interval_secs),
            );
            Some(tokio::spawn(scheduler.run(cancel.clone())))
        }
        _ => None,
    };

    tracing::info!(grpc = %grpc_addr, http = %http_addr, "Server started");

    tokio::select! {
        _ = shutdown_signal() => tracing::info!("Shutting down gracefully"),
        _ = cancel.cancelled() => tracing::warn!("A listener stopped, shutting down"),
    }
    cancel.cancel();

    drain(
        vec![("http", http_task), ("grpc", grpc_task)],
        config.shutdown_timeout(),
    )
    .await;
    if let Some(task) = dump_task {
        task.await?;
    }

    if let Some(store) = &state.dump {
        dump::save(store).await;
    }
    tracing::info!("Server stopped");
    Ok(())
}

/// Waits for the listeners to finish in-flight requests, aborting whatever
/// is still running once `timeout` has elapsed.
async fn drain(tasks: Vec<(&'static str, JoinHandle<()>)>, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    for (name, mut task) in tasks {
        match tokio::time::timeout_at(deadline, &mut task).await {
            Ok(Ok(())) => tracing::debug!(listener = name, "Listener drained"),
            Ok(Err(e)) => tracing::error!(listener = name, error = %e, "Listener task failed"),
            Err(_) => {
                tracing::warn!(
                    listener = name,
                    timeout_secs = timeout.as_secs(),
                    "Shutdown timeout reached, closing remaining connections"
                );
                task.abort();
            }
        }
    }
}
