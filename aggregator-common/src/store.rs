use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::event::{EventRecord, PersistedRecord};

pub const DEFAULT_MAX_CONNECTIONS: u32 = 4;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Enumeration of errors for operations with an EventStore.
/// Errors can originate from sqlx and are wrapped by us to provide additional context.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to prepare storage directory: {0}")]
    IoError(#[from] std::io::Error),
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("schema migration failed with: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
    #[error("failed to serialize event payload: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("stored row {key} could not be decoded: {reason}")]
    CorruptRowError { key: String, reason: String },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable record of every unique (topic, event_id) seen by the service.
///
/// `insert_if_absent` is the only write path and must be atomic with respect to the
/// existence check: concurrent callers racing on the same key never both get `true`.
#[async_trait]
pub trait EventStore {
    /// Persist `record` unless its key is already present. Returns whether a row was created.
    /// The first writer wins: a duplicate never replaces the stored payload, timestamp or source.
    async fn insert_if_absent(&self, record: &EventRecord) -> StoreResult<bool>;

    async fn contains(&self, topic: &str, event_id: &str) -> StoreResult<bool>;

    /// Number of persisted records across all topics.
    async fn count_unique(&self) -> StoreResult<u64>;

    /// Distinct topics in ascending order.
    async fn list_topics(&self) -> StoreResult<Vec<String>>;

    /// Persisted records, optionally restricted to one topic, in persistence order.
    async fn list_events(&self, topic: Option<&str>) -> StoreResult<Vec<PersistedRecord>>;

    async fn close(&self);
}

#[derive(sqlx::FromRow)]
struct EventRow {
    topic: String,
    event_id: String,
    timestamp: String,
    source: String,
    payload: String,
    processed_at: String,
}

impl TryFrom<EventRow> for PersistedRecord {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StoreError::CorruptRowError {
            key: format!("{}/{}", row.topic, row.event_id),
            reason,
        };

        let timestamp = DateTime::parse_from_rfc3339(&row.timestamp)
            .map_err(|e| corrupt(format!("timestamp: {}", e)))?;
        let processed_at =
            parse_processed_at(&row.processed_at).map_err(|e| corrupt(format!("processed_at: {}", e)))?;
        let payload =
            serde_json::from_str(&row.payload).map_err(|e| corrupt(format!("payload: {}", e)))?;

        Ok(PersistedRecord {
            topic: row.topic,
            event_id: row.event_id,
            timestamp,
            source: row.source,
            payload,
            processed_at,
        })
    }
}

/// Fixed width UTC rendering, so that lexicographic order in SQLite matches time order.
fn format_processed_at(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

fn parse_processed_at(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|at| at.with_timezone(&Utc))
}

/// An EventStore backed by a single SQLite file.
///
/// Writes go through one lock, which also hands out `processed_at` values so they never
/// decrease in insertion order. Reads use the connection pool and run against WAL
/// snapshots, so they do not wait for the writer.
pub struct SqliteStore {
    path: PathBuf,
    pool: SqlitePool,
    /// The last `processed_at` assigned; holding it is what serializes writers.
    writer: Mutex<Option<DateTime<Utc>>>,
}

impl SqliteStore {
    /// Open (creating if needed) the store at `path`.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_with_connections(path, DEFAULT_MAX_CONNECTIONS).await
    }

    pub async fn open_with_connections(
        path: impl AsRef<Path>,
        max_connections: u32,
    ) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        info!("opening event store at {}", path.display());

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|error| StoreError::ConnectionError { error })?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        let last: Option<String> = sqlx::query_scalar("SELECT MAX(processed_at) FROM events")
            .fetch_one(&pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })?;
        let last = match last {
            Some(value) => Some(parse_processed_at(&value).map_err(|e| {
                StoreError::CorruptRowError {
                    key: "MAX(processed_at)".to_owned(),
                    reason: e.to_string(),
                }
            })?),
            None => None,
        };

        Ok(Self {
            path,
            pool,
            writer: Mutex::new(last),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn insert_if_absent(&self, record: &EventRecord) -> StoreResult<bool> {
        let payload = serde_json::to_string(&record.payload)?;

        let mut last = self.writer.lock().await;
        let start = Instant::now();

        let now = Utc::now();
        let processed_at = match *last {
            Some(previous) if previous > now => previous,
            _ => now,
        };

        let result = sqlx::query(
            r#"
INSERT OR IGNORE INTO events
    (topic, event_id, timestamp, source, payload, processed_at)
VALUES
    (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.topic)
        .bind(&record.event_id)
        .bind(record.timestamp.to_rfc3339())
        .bind(&record.source)
        .bind(payload)
        .bind(format_processed_at(processed_at))
        .execute(&self.pool)
        .await
        .map_err(|error| StoreError::QueryError {
            command: "INSERT".to_owned(),
            error,
        })?;

        let inserted = result.rows_affected() == 1;
        if inserted {
            *last = Some(processed_at);
        }

        metrics::histogram!("aggregator_store_insert_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        Ok(inserted)
    }

    async fn contains(&self, topic: &str, event_id: &str) -> StoreResult<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM events WHERE topic = ? AND event_id = ? LIMIT 1")
                .bind(topic)
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|error| StoreError::QueryError {
                    command: "SELECT".to_owned(),
                    error,
                })?;

        Ok(found.is_some())
    }

    async fn count_unique(&self) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "COUNT".to_owned(),
                error,
            })?;

        Ok(count.max(0) as u64)
    }

    async fn list_topics(&self) -> StoreResult<Vec<String>> {
        sqlx::query_scalar::<_, String>("SELECT DISTINCT topic FROM events ORDER BY topic ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })
    }

    async fn list_events(&self, topic: Option<&str>) -> StoreResult<Vec<PersistedRecord>> {
        let rows: Vec<EventRow> = match topic {
            Some(topic) => {
                sqlx::query_as(
                    r#"
SELECT topic, event_id, timestamp, source, payload, processed_at
FROM events
WHERE topic = ?
ORDER BY processed_at ASC, rowid ASC
                    "#,
                )
                .bind(topic)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as(
                    r#"
SELECT topic, event_id, timestamp, source, payload, processed_at
FROM events
ORDER BY processed_at ASC, rowid ASC
                    "#,
                )
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|error| StoreError::QueryError {
            command: "SELECT".to_owned(),
            error,
        })?;

        rows.into_iter().map(PersistedRecord::try_from).collect()
    }

    async fn close(&self) {
        info!("closing event store at {}", self.path.display());
        self.pool.close().await;
    }
}
