use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use aggregator_common::event::PersistedRecord;

use crate::api::AggregatorError;
use crate::router;

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    pub topic: Option<String>,
}

#[derive(Debug, PartialEq, Deserialize, Serialize)]
pub struct StatsResponse {
    pub received: u64,
    pub unique_processed: u64,
    pub duplicate_dropped: u64,
    pub topics: Vec<String>,
    pub uptime_seconds: f64,
    pub queue_depth: usize,
    pub workers: usize,
    pub db_path: String,
}

/// Persisted events in the order they were stored, optionally for one topic.
/// An empty `topic` parameter is the same as none.
pub async fn events(
    state: State<router::State>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<PersistedRecord>>, AggregatorError> {
    let topic = query.topic.as_deref().filter(|topic| !topic.is_empty());
    let events = state.store.list_events(topic).await?;

    Ok(Json(events))
}

pub async fn stats(state: State<router::State>) -> Result<Json<StatsResponse>, AggregatorError> {
    let counters = state.counters.snapshot();
    let unique_processed = state.store.count_unique().await?;
    let topics = state.store.list_topics().await?;

    Ok(Json(StatsResponse {
        received: counters.received,
        unique_processed,
        duplicate_dropped: counters.duplicate_dropped,
        topics,
        uptime_seconds: round_millis(state.started_at.elapsed().as_secs_f64()),
        queue_depth: state.queue.depth(),
        workers: state.workers,
        db_path: state.db_path.clone(),
    }))
}

fn round_millis(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::test_support::{json_body, send, state};
    use aggregator_common::event::EventRecord;
    use axum::body::Body;
    use axum::http::{Method, StatusCode};
    use chrono::DateTime;
    use serde_json::{json, Map};
    use tempfile::TempDir;

    fn event(topic: &str, event_id: &str) -> EventRecord {
        EventRecord {
            topic: topic.to_owned(),
            event_id: event_id.to_owned(),
            timestamp: DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap(),
            source: "test".to_owned(),
            payload: Map::new(),
        }
    }

    #[test]
    fn uptime_is_rounded_to_milliseconds() {
        assert_eq!(round_millis(1.23456), 1.235);
        assert_eq!(round_millis(0.0004), 0.0);
        assert_eq!(round_millis(12.0), 12.0);
    }

    #[tokio::test]
    async fn events_lists_in_persistence_order_and_filters_by_topic() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir).await;
        for (topic, id) in [("b", "1"), ("a", "1"), ("b", "2")] {
            assert!(state.store.insert_if_absent(&event(topic, id)).await.unwrap());
        }

        let all = json_body(send(&state, Method::GET, "/events", Body::empty()).await).await;
        let keys: Vec<(String, String)> = all
            .as_array()
            .unwrap()
            .iter()
            .map(|e| (e["topic"].to_string(), e["event_id"].to_string()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("\"b\"".to_owned(), "\"1\"".to_owned()),
                ("\"a\"".to_owned(), "\"1\"".to_owned()),
                ("\"b\"".to_owned(), "\"2\"".to_owned()),
            ]
        );
        assert!(all[0]["processed_at"].is_string());

        let only_b = json_body(send(&state, Method::GET, "/events?topic=b", Body::empty()).await).await;
        assert_eq!(only_b.as_array().unwrap().len(), 2);
        assert!(only_b
            .as_array()
            .unwrap()
            .iter()
            .all(|e| e["topic"] == json!("b")));

        let empty_filter =
            json_body(send(&state, Method::GET, "/events?topic=", Body::empty()).await).await;
        assert_eq!(empty_filter, all);

        let unknown =
            json_body(send(&state, Method::GET, "/events?topic=missing", Body::empty()).await).await;
        assert_eq!(unknown, json!([]));
    }

    #[tokio::test]
    async fn stats_reports_counters_store_and_pipeline_shape() {
        let dir = TempDir::new().unwrap();
        let mut state = state(&dir).await;
        state.workers = 3;

        state.store.insert_if_absent(&event("z", "1")).await.unwrap();
        state.store.insert_if_absent(&event("a", "1")).await.unwrap();
        state.counters.record_received(3);
        state.counters.record_duplicate();
        state.queue.enqueue(event("a", "2")).await.unwrap();

        let response = send(&state, Method::GET, "/stats", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let stats: StatsResponse = serde_json::from_value(json_body(response).await).unwrap();

        assert_eq!(stats.received, 3);
        assert_eq!(stats.unique_processed, 2);
        assert_eq!(stats.duplicate_dropped, 1);
        assert_eq!(stats.topics, vec!["a".to_owned(), "z".to_owned()]);
        assert!(stats.uptime_seconds >= 0.0);
        assert_eq!(stats.queue_depth, 1);
        assert_eq!(stats.workers, 3);
        assert_eq!(stats.db_path, state.db_path);
    }

    #[tokio::test]
    async fn store_read_failures_are_server_errors() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir).await;
        state.store.close().await;

        let response = send(&state, Method::GET, "/stats", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert!(body["error"].is_string());
    }
}
