use std::future::Future;

use eyre::{Result, WrapErr};
use tokio::net::TcpListener;
use tracing::{error, info};

use aggregator_common::metrics::setup_metrics_recorder;
use aggregator_worker::worker::ShutdownSummary;

use crate::config::Config;
use crate::pipeline::Pipeline;
use crate::router;

/// Run the service on `listener` until `shutdown` resolves.
///
/// In-flight requests finish first, then the pipeline is drained and the store closed.
pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F) -> Result<ShutdownSummary>
where
    F: Future<Output = ()> + Send + 'static,
{
    // Don't install metrics unless asked to
    // Installing a global recorder when the service is used as a library (during tests etc)
    // does not work well.
    // Installed before the pipeline starts, so a failure leaves no workers running.
    let recorder_handle = if config.export_prometheus {
        Some(setup_metrics_recorder().wrap_err("failed to install metrics recorder")?)
    } else {
        None
    };

    let pipeline = Pipeline::start(&config).await?;

    let app = router::router(pipeline.state(), recorder_handle, config.max_body_size);

    info!(
        "listening on {}",
        listener
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| config.bind())
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;
    if let Err(err) = &served {
        error!("http server failed: {}", err);
    }

    info!("http server stopped, draining pipeline");
    let summary = pipeline
        .shutdown(config.shutdown_drain_timeout_ms.0)
        .await;

    served.wrap_err("http server failed")?;
    Ok(summary)
}
