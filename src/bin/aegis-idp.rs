// ABOUTME: Server entry point: logging, config, database, keys, and HTTP serve
// ABOUTME: Falls back to the in-memory blacklist when redis is unavailable
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.

use aegis_idp::blacklist::{MemoryBlacklist, RedisBlacklist, TokenBlacklist};
use aegis_idp::config::ServerConfig;
use aegis_idp::database::Database;
use aegis_idp::logging;
use aegis_idp::server::{router, ServerResources};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_from_env()?;

    let config = ServerConfig::from_env()?;

    let database = if config.database_url.is_memory() {
        Database::new_in_memory().await
    } else {
        Database::new(&config.database_url.to_connection_string()).await
    }
    .context("Failed to connect to the database")?;
    info!(database = %config.database_url.to_connection_string(), "Database ready");

    let blacklist: Arc<dyn TokenBlacklist> = match &config.redis_url {
        Some(url) => match RedisBlacklist::connect(url).await {
            Ok(redis) => {
                info!("Connected to redis for the access-token blacklist");
                Arc::new(redis)
            }
            Err(e) => {
                warn!(error = %e, "Redis unavailable, falling back to the in-memory blacklist");
                Arc::new(MemoryBlacklist::new())
            }
        },
        None => Arc::new(MemoryBlacklist::new()),
    };

    let http_port = config.http_port;
    let resources = Arc::new(ServerResources::new(database, blacklist, config));

    // Ensure at least one signing key exists before serving
    let active = resources.key_manager.bootstrap().await?;
    info!(kid = %active.kid(), "Active signing key");

    let app = router(resources);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", http_port))
        .await
        .with_context(|| format!("Failed to bind port {http_port}"))?;
    info!(port = http_port, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutting down");
}
