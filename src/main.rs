//! bgsave - write-back of dirty Redis records into MongoDB

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bgsave::{
    cache::RedisCache,
    config::{Args, LogFormat},
    db::MongoStore,
    server::{self, AppState},
    spawn_engine,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("bgsave={},info", args.log_level).into());
    match args.log_format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  bgsave - cache write-back");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Redis: {}", args.redis_host);
    info!("MongoDB: {}", args.mongodb_url);
    info!("Save delay: {} ms", args.save_delay_ms);
    info!("Batch size: {}", args.batch_size);
    info!("Queue capacity: {}", args.queue_capacity);
    info!("Id field: {}", args.id_field);
    info!("======================================");

    // Both connections are opened once and reused by every flush cycle
    let cache = match RedisCache::connect(&args.redis_host).await {
        Ok(cache) => cache,
        Err(e) => {
            error!("Redis connection failed: {}", e);
            std::process::exit(1);
        }
    };

    let store = match MongoStore::connect(
        &args.mongodb_url,
        args.mongodb_db.as_deref(),
        args.ensure_indexes,
    )
    .await
    {
        Ok(store) => store,
        Err(e) => {
            error!("MongoDB connection failed: {}", e);
            std::process::exit(1);
        }
    };

    let (notifier, engine) = spawn_engine(args.engine_config(), Arc::new(cache), Arc::new(store));

    let state = Arc::new(AppState {
        listen: args.listen,
        max_body_bytes: args.max_body_bytes,
        notifier,
        stats: engine.stats(),
    });

    tokio::select! {
        result = server::run(state) => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    // Final flush of everything already marked
    if let Err(e) = engine.shutdown().await {
        warn!("Engine did not stop cleanly: {}", e);
    }

    info!("bgsave stopped");
    Ok(())
}
