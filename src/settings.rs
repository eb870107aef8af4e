//! idc-hashtree settings, which are configurable using environment variables.
use camino::Utf8PathBuf;
use serde::Deserialize;
use std::num::{NonZeroU32, NonZeroUsize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct HashTreeSettings {
    #[serde(default)]
    pub db: DbSettings,
    /// Directory receiving the per-table exports.
    #[serde(default = "default_export_dir")]
    pub export_dir: Utf8PathBuf,
    #[serde(default)]
    pub rehash: RehashSettings,
}

/// Connection to the database holding the catalog tables.
#[derive(Debug, Clone, Deserialize)]
pub struct DbSettings {
    /// SQLite connection URL, e.g. `sqlite://idc_hashtree.sqlite`.
    #[serde(default = "default_db_connection")]
    pub connection: String,
    /// Maximum number of pooled connections. Every rehash worker holds one while hashing a shard.
    #[serde(default = "default_db_pool")]
    pub pool: NonZeroU32,
    /// How long a writer waits for another connection's write lock.
    #[serde(with = "humantime_serde", default = "default_busy_timeout")]
    pub busy_timeout: Duration,
}

impl Default for DbSettings {
    fn default() -> Self {
        Self {
            connection: default_db_connection(),
            pool: default_db_pool(),
            busy_timeout: default_busy_timeout(),
        }
    }
}

/// Settings of the hash recomputation engine.
#[derive(Debug, Clone, Deserialize)]
pub struct RehashSettings {
    /// Number of concurrent shard workers.
    #[serde(default = "default_workers")]
    pub workers: NonZeroUsize,
    /// Number of leading hex digits of a node's UUID which select its shard.
    /// 0 puts every node of a level in the same shard. At most 32.
    #[serde(default = "default_shard_prefix_len")]
    pub shard_prefix_len: usize,
    /// Number of shards waiting for a worker before submission blocks.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: NonZeroUsize,
    /// Completion log of the current run. When set, nodes committed by an interrupted
    /// run of the same version are not recomputed, and the log is removed on success.
    #[serde(default)]
    pub dones_log: Option<Utf8PathBuf>,
    /// Minimum time between progress messages.
    #[serde(with = "humantime_serde", default = "default_progress_interval")]
    pub progress_interval: Duration,
}

impl Default for RehashSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            shard_prefix_len: default_shard_prefix_len(),
            queue_capacity: default_queue_capacity(),
            dones_log: None,
            progress_interval: default_progress_interval(),
        }
    }
}

fn default_db_connection() -> String {
    "sqlite://idc_hashtree.sqlite".to_string()
}

fn default_db_pool() -> NonZeroU32 {
    NonZeroU32::new(8).unwrap()
}

fn default_busy_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_export_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("export")
}

fn default_workers() -> NonZeroUsize {
    std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
}

fn default_shard_prefix_len() -> usize {
    1
}

fn default_queue_capacity() -> NonZeroUsize {
    NonZeroUsize::new(64).unwrap()
}

fn default_progress_interval() -> Duration {
    Duration::from_secs(10)
}
