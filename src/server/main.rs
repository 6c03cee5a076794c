// src/server/main.rs
// Entry point for the coinquilini household server
use std::sync::Arc;

use coinquilini::server::chat::ChatFeed;
use coinquilini::server::config::ServerConfig;
use coinquilini::server::connection::Server;
use coinquilini::server::database::Database;
use coinquilini::server::feed;
use log::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    std::env::set_var("RUST_LOG", &log_level);
    env_logger::init();

    let config = ServerConfig::from_env();

    let database = Arc::new(Database::connect(&config.database_url).await?);

    info!("Running database migrations...");
    database.migrate().await.map_err(|e| {
        error!("Database migration failed: {}", e);
        e
    })?;
    info!("Database migrations completed");

    let feed_hub = Arc::new(ChatFeed::new(config.feed_channel_capacity));

    // Chat change feed on port + 1, commands on the main port
    let feed_addr = format!("{}:{}", config.host, config.port + 1);
    let feed_clone = feed_hub.clone();
    let database_clone = database.clone();
    tokio::spawn(async move {
        if let Err(e) = feed::run_feed_listener(&feed_addr, feed_clone, database_clone).await {
            error!("Chat feed listener error: {}", e);
        }
    });
    info!("Chat feed started on {}:{}", config.host, config.port + 1);

    let server = Server {
        db: database,
        config: config.clone(),
        feed: feed_hub,
    };
    server.run(&format!("{}:{}", config.host, config.port)).await?;
    Ok(())
}
