//! bgsave - write-back of dirty cache records
//!
//! Services mark Redis keys of the form `collection:id` as dirty whenever they
//! mutate the cached record. bgsave coalesces those notifications and, on a
//! fixed interval, copies the current value of every dirty key into the
//! MongoDB collection named by the key prefix.
//!
//! ```text
//! ┌──────────────┐   bounded    ┌─────────────────┐  timer  ┌──────────────┐
//! │ DirtyNotifier│───queue─────▶│   Coalescer     │────────▶│   Flusher    │
//! │ (HTTP / lib) │              │   (DirtySet)    │         │ MGET → decode│
//! └──────────────┘              └─────────────────┘         │ parse→ upsert│
//!                                                           └──────┬───────┘
//!                                            Redis ◀───────────────┤
//!                                            MongoDB ◀─────────────┘
//! ```

pub mod cache;
pub mod codec;
pub mod config;
pub mod db;
pub mod engine;
pub mod keys;
pub mod server;
pub mod types;

pub use config::Args;
pub use engine::{spawn_engine, Ack, DirtyNotifier, EngineConfig, EngineHandle};
pub use server::{run, AppState};
pub use types::{BgSaveError, Result};
