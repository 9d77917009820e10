use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

pub const DEFAULT_DB_PATH: &str = "./data/store.db";

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "8080")]
    pub port: u16,

    #[envconfig(from = "DB_PATH")]
    pub db_path: Option<String>,

    #[envconfig(from = "DEDUP_DB_PATH")]
    pub dedup_db_path: Option<String>,

    #[envconfig(from = "CONSUMER_WORKERS", default = "2")]
    pub consumer_workers: NonZeroUsize,

    #[envconfig(default = "0")]
    pub queue_capacity: usize,

    #[envconfig(default = "4")]
    pub max_store_connections: u32,

    #[envconfig(default = "5000")]
    pub shutdown_drain_timeout_ms: EnvMsDuration,

    #[envconfig(default = "10485760")]
    pub max_body_size: usize,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `DB_PATH` wins over `DEDUP_DB_PATH`; empty values count as unset.
    pub fn resolved_db_path(&self) -> PathBuf {
        [&self.db_path, &self.dedup_db_path]
            .into_iter()
            .flatten()
            .find(|path| !path.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH))
    }

    /// `None` means unbounded.
    pub fn queue_capacity(&self) -> Option<usize> {
        match self.queue_capacity {
            0 => None,
            capacity => Some(capacity),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}
