use std::env;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub max_clients: usize,
    pub log_level: String,
    pub max_message_length: usize,
    pub feed_channel_capacity: usize,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(5000),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:data/coinquilini.db".to_string()),
            max_clients: env::var("MAX_CLIENTS").ok().and_then(|v| v.parse().ok()).unwrap_or(100),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            max_message_length: env::var("MAX_MESSAGE_LENGTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2048),
            feed_channel_capacity: env::var("FEED_CHANNEL_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(256),
        }
    }
}
