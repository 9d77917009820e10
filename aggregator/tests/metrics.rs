use std::future::pending;
use std::time::Duration;

use anyhow::Result;
use reqwest::StatusCode;
use tempfile::TempDir;
use tokio::net::TcpListener;

use aggregator::server::serve;

use crate::common::*;
mod common;

// The Prometheus recorder is process global, so everything touching it lives in this one test.
#[tokio::test]
async fn it_exports_metrics_and_refuses_a_second_recorder() -> Result<()> {
    setup_tracing();
    let dir = TempDir::new()?;

    let mut config = config_for(&dir.path().join("first.db"));
    config.export_prometheus = true;
    let server = ServerHandle::for_config(config).await;

    let res = server.publish(&event("metered", "1")).await;
    assert_eq!(StatusCode::OK, res.status());
    server
        .wait_for_stats(Duration::from_secs(30), |s| s.unique_processed == 1)
        .await;

    let res = server.get("/metrics").await;
    assert_eq!(StatusCode::OK, res.status());
    let body = res.text().await?;
    assert!(body.contains("aggregator_events_received_total"), "{}", body);
    assert!(body.contains("aggregator_events_persisted_total"), "{}", body);

    server.stop().await;

    let second_db = dir.path().join("second").join("store.db");
    let mut config = config_for(&second_db);
    config.export_prometheus = true;
    let listener = TcpListener::bind("127.0.0.1:0").await?;

    let result = serve(config, listener, pending()).await;
    assert!(result.is_err());
    // Nothing was opened, so nothing is left running or holding the store.
    assert!(!second_db.parent().unwrap().exists());

    Ok(())
}
