use envconfig::Envconfig;
use eyre::{Result, WrapErr};
use tokio::signal;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use aggregator::config::Config;
use aggregator::server::serve;

async fn shutdown() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    tracing::info!("Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout with a level configured by the RUST_LOG envvar (default=INFO)
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
    );
    tracing_subscriber::registry().with(log_layer).init();

    let config = Config::init_from_env().wrap_err("invalid configuration")?;

    let listener = tokio::net::TcpListener::bind(config.bind())
        .await
        .wrap_err_with(|| format!("could not bind {}", config.bind()))?;

    let summary = serve(config, listener, shutdown()).await?;
    if !summary.drained() {
        tracing::warn!(
            abandoned = summary.abandoned,
            "stopped before the queue was drained"
        );
    }

    Ok(())
}
