mod config;
mod sender;
mod transport;

use anyhow::Result;
use config::{AgentConfig, TransportKind};
use sender::Sender;
use std::sync::Arc;
use telemon_collector::{Collector, MetricMap, SystemStats};
use telemon_common::shutdown::shutdown_signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use transport::{GrpcTransport, HttpTransport, Transport};

/// Everything the agent's tasks share, built once in `main`.
struct AgentContext {
    config: AgentConfig,
    metrics: MetricMap,
    cancel: CancellationToken,
}

impl AgentContext {
    fn new(config: AgentConfig) -> Self {
        Self {
            config,
            metrics: MetricMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    fn spawn_sender<T: Transport>(&self, transport: T) -> tokio::task::JoinHandle<()> {
        let sender = Sender::new(
            Arc::new(transport),
            self.metrics.clone(),
            self.config.send_mode,
            self.config.rate_limit,
            self.config.report_interval(),
        );
        tokio::spawn(sender.run(self.cancel.clone()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("telemon=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/agent.toml".to_string());

    let mut config = AgentConfig::load(&config_path)?;
    config.apply_env(|name| std::env::var(name).ok())?;
    config.validate()?;

    tracing::info!(
        server = %config.server_url(),
        transport = ?config.transport,
        mode = ?config.send_mode,
        workers = config.rate_limit,
        signed = config.signing_key().is_some(),
        encrypted = config.public_key_path.is_some(),
        "telemon-agent starting"
    );

    let ctx = AgentContext::new(config);

    let collector = Collector::new(
        SystemStats::new(),
        ctx.metrics.clone(),
        ctx.config.poll_interval(),
    );
    let collector_task = tokio::spawn(collector.run(ctx.cancel.clone()));

    let sender_task = match ctx.config.transport {
        TransportKind::Http => ctx.spawn_sender(HttpTransport::new(&ctx.config)?),
        TransportKind::Grpc => ctx.spawn_sender(GrpcTransport::new(&ctx.config)?),
    };

    shutdown_signal().await;
    tracing::info!("Shutting down gracefully");
    ctx.cancel.cancel();

    collector_task.await?;
    sender_task.await?;
    tracing::info!("telemon-agent stopped");
    Ok(())
}
