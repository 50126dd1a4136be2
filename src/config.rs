//! Configuration for bgsave
//!
//! CLI arguments and environment variable handling using clap.

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;

use crate::engine::EngineConfig;

/// bgsave - flushes dirty cache records into durable storage
#[derive(Parser, Debug, Clone)]
#[command(name = "bgsave")]
#[command(about = "Write-back of dirty Redis records into MongoDB")]
pub struct Args {
    /// Address the ingestion endpoint listens on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:50004")]
    pub listen: SocketAddr,

    /// Redis holding the live records (host:port or redis:// URL)
    #[arg(long, env = "REDIS_HOST", default_value = "127.0.0.1:6379")]
    pub redis_host: String,

    /// MongoDB connection URL
    #[arg(long, env = "MONGODB_URL", default_value = "mongodb://127.0.0.1")]
    pub mongodb_url: String,

    /// MongoDB database name; defaults to the database in MONGODB_URL
    #[arg(long, env = "MONGODB_DB")]
    pub mongodb_db: Option<String>,

    /// Milliseconds between flush cycles.
    /// Trades durability lag against write volume on MongoDB.
    #[arg(long, env = "SAVE_DELAY_MS", default_value = "100")]
    pub save_delay_ms: u64,

    /// Keys per MGET round trip
    #[arg(long, env = "BATCH_SIZE", default_value = "1024")]
    pub batch_size: usize,

    /// Capacity of the notification queue
    #[arg(long, env = "QUEUE_CAPACITY", default_value = "4096")]
    pub queue_capacity: usize,

    /// How long a notification waits on a full queue before being dropped
    #[arg(long, env = "ENQUEUE_TIMEOUT_MS", default_value = "5000")]
    pub enqueue_timeout_ms: u64,

    /// Timeout for each Redis or MongoDB round trip during a flush
    #[arg(long, env = "IO_TIMEOUT_MS", default_value = "30000")]
    pub io_timeout_ms: u64,

    /// Largest request body the ingestion endpoint accepts, in bytes
    #[arg(long, env = "MAX_BODY_BYTES", default_value = "1048576")]
    pub max_body_bytes: usize,

    /// Document field matched against the id part of each key
    #[arg(long, env = "ID_FIELD", default_value = "id")]
    pub id_field: String,

    /// Create a unique index on the id field of each collection written
    #[arg(long, env = "ENSURE_INDEXES", default_value = "true", action = clap::ArgAction::Set)]
    pub ensure_indexes: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.save_delay_ms == 0 {
            return Err("SAVE_DELAY_MS must be greater than zero".to_string());
        }
        if self.batch_size == 0 {
            return Err("BATCH_SIZE must be greater than zero".to_string());
        }
        if self.queue_capacity == 0 {
            return Err("QUEUE_CAPACITY must be greater than zero".to_string());
        }
        if self.max_body_bytes == 0 {
            return Err("MAX_BODY_BYTES must be greater than zero".to_string());
        }
        if self.io_timeout_ms == 0 {
            return Err("IO_TIMEOUT_MS must be greater than zero".to_string());
        }
        if self.id_field.trim().is_empty() || self.id_field.starts_with('$') {
            return Err("ID_FIELD must be a plain field name".to_string());
        }
        Ok(())
    }

    /// Engine settings derived from the arguments
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            flush_interval: Duration::from_millis(self.save_delay_ms),
            batch_size: self.batch_size,
            queue_capacity: self.queue_capacity,
            enqueue_timeout: Duration::from_millis(self.enqueue_timeout_ms),
            io_timeout: Duration::from_millis(self.io_timeout_ms),
            id_field: self.id_field.clone(),
        }
    }
}
