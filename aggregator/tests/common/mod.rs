#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Once};
use std::time::Duration;

use envconfig::Envconfig;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use aggregator::config::Config;
use aggregator::handlers::query::StatsResponse;
use aggregator::server::serve;
use aggregator_worker::worker::ShutdownSummary;

static TRACING_INIT: Once = Once::new();
pub fn setup_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_writer(tracing_subscriber::fmt::TestWriter::new())
            .init()
    });
}

pub fn config_for(db_path: &Path) -> Config {
    let vars = HashMap::from([
        ("BIND_HOST".to_owned(), "127.0.0.1".to_owned()),
        ("BIND_PORT".to_owned(), "0".to_owned()),
        ("DB_PATH".to_owned(), db_path.display().to_string()),
        ("EXPORT_PROMETHEUS".to_owned(), "false".to_owned()),
        ("SHUTDOWN_DRAIN_TIMEOUT_MS".to_owned(), "30000".to_owned()),
    ]);
    Config::init_from_hashmap(&vars).expect("invalid test configuration")
}

pub fn event(topic: &str, event_id: &str) -> Value {
    json!({
        "topic": topic,
        "event_id": event_id,
        "timestamp": "2024-03-01T12:00:00Z",
        "source": "integration",
        "payload": {"event_id": event_id, "nested": {"n": 1}}
    })
}

pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<Notify>,
    task: JoinHandle<eyre::Result<ShutdownSummary>>,
    client: reqwest::Client,
}

impl ServerHandle {
    pub async fn for_db(db_path: &Path) -> Self {
        Self::for_config(config_for(db_path)).await
    }

    pub async fn for_config(config: Config) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let notify = Arc::new(Notify::new());
        let shutdown = notify.clone();

        let task = tokio::spawn(async move {
            serve(config, listener, async move { notify.notified().await }).await
        });

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap();

        Self {
            addr,
            shutdown,
            task,
            client,
        }
    }

    pub async fn publish(&self, body: &Value) -> reqwest::Response {
        self.publish_raw(body.to_string()).await
    }

    pub async fn publish_raw<T: Into<reqwest::Body>>(&self, body: T) -> reqwest::Response {
        self.client
            .post(format!("http://{}/publish", self.addr))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .expect("failed to send request")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("http://{}{}", self.addr, path))
            .send()
            .await
            .expect("failed to send request")
    }

    pub async fn stats(&self) -> StatsResponse {
        self.get("/stats")
            .await
            .json()
            .await
            .expect("failed to decode stats")
    }

    pub async fn events(&self, topic: Option<&str>) -> Vec<Value> {
        let path = match topic {
            Some(topic) => format!("/events?topic={}", topic),
            None => "/events".to_owned(),
        };
        self.get(&path)
            .await
            .json()
            .await
            .expect("failed to decode events")
    }

    /// Poll `/stats` until `check` passes, failing the test after `timeout`.
    pub async fn wait_for_stats<F>(&self, timeout: Duration, check: F) -> StatsResponse
    where
        F: Fn(&StatsResponse) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let stats = self.stats().await;
            if check(&stats) {
                return stats;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("condition not met before timeout, last stats: {:?}", stats);
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Trigger a graceful shutdown and wait for the pipeline to finish draining.
    pub async fn stop(self) -> ShutdownSummary {
        self.shutdown.notify_one();
        self.task
            .await
            .expect("server task panicked")
            .expect("server failed")
    }
}
