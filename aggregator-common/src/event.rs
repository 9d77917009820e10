use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Enumeration of errors raised while decoding a submitted batch.
/// Nothing from a batch is enqueued when any of these is returned.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum EventError {
    #[error("invalid JSON body: {0}")]
    MalformedBody(String),
    #[error("body must be a JSON object or array")]
    UnexpectedBodyType,
    #[error("invalid event at index {index}: {reason}")]
    InvalidEvent { index: usize, reason: String },
}

/// An event as submitted by a publisher.
///
/// Identity is the (`topic`, `event_id`) pair. Every field is required and
/// unknown fields are rejected, so a record that deserializes is complete.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EventRecord {
    pub topic: String,
    pub event_id: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<FixedOffset>,
    pub source: String,
    pub payload: Map<String, Value>,
}

/// Numbers above this are read as epoch milliseconds rather than seconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 2e10;

/// Accepts ISO 8601 date-times with an offset, naive ones (read as UTC), and epoch
/// seconds or milliseconds given as a number or a numeric string.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<FixedOffset>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let parsed = match Value::deserialize(deserializer)? {
        Value::String(value) => parse_timestamp_str(&value),
        Value::Number(value) => value.as_f64().and_then(timestamp_from_epoch),
        _ => None,
    };

    parsed.ok_or_else(|| {
        D::Error::custom("timestamp must be an ISO 8601 date-time or epoch seconds")
    })
}

fn parse_timestamp_str(value: &str) -> Option<DateTime<FixedOffset>> {
    let value = value.trim();
    if let Ok(at) = value.parse::<DateTime<FixedOffset>>() {
        return Some(at);
    }

    let naive = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok());
    if let Some(naive) = naive {
        return Some(Utc.from_utc_datetime(&naive).into());
    }

    value.parse::<f64>().ok().and_then(timestamp_from_epoch)
}

fn timestamp_from_epoch(value: f64) -> Option<DateTime<FixedOffset>> {
    if !value.is_finite() {
        return None;
    }
    let seconds = if value.abs() > EPOCH_MILLIS_THRESHOLD {
        value / 1000.0
    } else {
        value
    };

    let whole = seconds.floor();
    let nanos = (((seconds - whole) * 1e9).round() as u32).min(999_999_999);
    Utc.timestamp_opt(whole as i64, nanos)
        .single()
        .map(DateTime::<FixedOffset>::from)
}

impl EventRecord {
    /// Decode and validate a single record out of an already parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, String> {
        let record: EventRecord = serde_json::from_value(value).map_err(|e| e.to_string())?;
        record.validate()?;
        Ok(record)
    }

    fn validate(&self) -> Result<(), String> {
        if self.topic.is_empty() {
            return Err("topic must not be empty".to_owned());
        }
        Ok(())
    }

    /// Human readable form of the dedup key, used in logs.
    pub fn key(&self) -> String {
        format!("{}/{}", self.topic, self.event_id)
    }
}

/// An event that made it into the store, stamped with the time it was persisted.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PersistedRecord {
    pub topic: String,
    pub event_id: String,
    pub timestamp: DateTime<FixedOffset>,
    pub source: String,
    pub payload: Map<String, Value>,
    pub processed_at: DateTime<Utc>,
}

/// Parse a request body holding either one event object or an array of them.
///
/// Validation is all-or-nothing: the first invalid record fails the whole batch.
pub fn parse_batch(body: &[u8]) -> Result<Vec<EventRecord>, EventError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| EventError::MalformedBody(e.to_string()))?;

    let items = match value {
        Value::Object(object) => vec![Value::Object(object)],
        Value::Array(items) => items,
        _ => return Err(EventError::UnexpectedBodyType),
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            EventRecord::from_value(item).map_err(|reason| EventError::InvalidEvent { index, reason })
        })
        .collect()
}
