use std::future::ready;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::DefaultBodyLimit;
use axum::{
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

use aggregator_common::counters::Counters;
use aggregator_common::metrics::track_metrics;
use aggregator_common::queue::IngestQueue;
use aggregator_common::store::EventStore;

use crate::api::LivenessResponse;
use crate::handlers::{publish, query};

#[derive(Clone)]
pub struct State {
    pub queue: Arc<IngestQueue>,
    pub store: Arc<dyn EventStore + Send + Sync>,
    pub counters: Arc<Counters>,
    pub started_at: Instant,
    pub workers: usize,
    pub db_path: String,
}

async fn index() -> &'static str {
    "aggregator"
}

async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse { ok: true })
}

pub fn router(state: State, metrics: Option<PrometheusHandle>, max_body_size: usize) -> Router {
    let router = Router::new()
        .route("/", get(index))
        .route("/healthz", get(liveness))
        .route("/publish", post(publish::publish))
        .route("/events", get(query::events))
        .route("/stats", get(query::stats))
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    // The recorder is process global, it is only installed by the binary.
    match metrics {
        Some(recorder_handle) => {
            router.route("/metrics", get(move || ready(recorder_handle.render())))
        }
        None => router,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use aggregator_common::store::SqliteStore;
    use axum::body::Body;
    use axum::http::{Method, Request, Response};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    /// Router state over a fresh store, with nothing consuming the queue.
    pub async fn state(dir: &TempDir) -> State {
        let path = dir.path().join("store.db");
        let store = SqliteStore::open(&path).await.expect("failed to open store");
        State {
            queue: Arc::new(IngestQueue::unbounded()),
            store: Arc::new(store),
            counters: Arc::new(Counters::new()),
            started_at: Instant::now(),
            workers: 0,
            db_path: path.display().to_string(),
        }
    }

    pub async fn send(
        state: &State,
        method: Method,
        uri: &str,
        body: impl Into<Body>,
    ) -> Response<Body> {
        router(state.clone(), None, 1024 * 1024)
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(body.into())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    pub async fn json_body(response: Response<Body>) -> Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }
}
