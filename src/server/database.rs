use log::{debug, info};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::common::models::Appliance;

#[derive(Debug, Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        info!("[DB] Connecting to database: {}", database_url);

        // Extract the file path from the URL so the parent directory can be
        // created before SQLite tries to open the file
        let file_path = if let Some(rest) = database_url.strip_prefix("sqlite://") {
            rest.split('?').next().unwrap_or(rest)
        } else if let Some(rest) = database_url.strip_prefix("sqlite:") {
            rest.split('?').next().unwrap_or(rest)
        } else {
            database_url
        };

        if file_path != ":memory:" {
            if let Some(parent) = std::path::Path::new(file_path).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    debug!("[DB] Creating database directory {:?}", parent);
                    std::fs::create_dir_all(parent)
                        .map_err(|e| sqlx::Error::Configuration(Box::new(e)))?;
                }
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        info!("[DB] Database connection successful");
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        // Household members, one row per claimed role
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS members (
                id TEXT PRIMARY KEY,
                external_id TEXT UNIQUE NOT NULL,
                role_name TEXT UNIQUE NOT NULL,
                created_at INTEGER NOT NULL
            );
        "#,
        )
        .execute(&self.pool)
        .await?;

        // Appliance reservations, one row per appliance
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS resource_slots (
                appliance TEXT PRIMARY KEY,
                occupant_id TEXT,
                start_time INTEGER,
                end_time INTEGER,
                active INTEGER NOT NULL DEFAULT 0
            );
        "#,
        )
        .execute(&self.pool)
        .await?;

        // Parking spots, fixed set of four
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS parking_spots (
                spot_number INTEGER PRIMARY KEY,
                occupant_id TEXT,
                vehicle_info TEXT,
                occupied INTEGER NOT NULL DEFAULT 0
            );
        "#,
        )
        .execute(&self.pool)
        .await?;

        // Expenses pending group ratification
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS expenses (
                id TEXT PRIMARY KEY,
                description TEXT NOT NULL,
                amount REAL NOT NULL,
                category TEXT NOT NULL,
                payer_id TEXT NOT NULL,
                receipt_ref TEXT,
                created_at INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending'
            );
        "#,
        )
        .execute(&self.pool)
        .await?;

        // One vote per (expense, voter); the composite primary key is the
        // storage-level duplicate-vote guard
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS expense_votes (
                expense_id TEXT NOT NULL,
                voter_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (expense_id, voter_id)
            );
        "#,
        )
        .execute(&self.pool)
        .await?;

        // Chat log
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_messages (
                id TEXT PRIMARY KEY,
                author_id TEXT NOT NULL,
                text TEXT,
                image_ref TEXT,
                created_at INTEGER NOT NULL,
                edited INTEGER NOT NULL DEFAULT 0
            );
        "#,
        )
        .execute(&self.pool)
        .await?;

        self.seed().await?;

        Ok(())
    }

    // Pre-seed the fixed resources: the two appliance slots in the idle
    // state and the four parking spots free
    async fn seed(&self) -> Result<(), sqlx::Error> {
        for appliance in Appliance::ALL {
            sqlx::query("INSERT OR IGNORE INTO resource_slots (appliance, active) VALUES (?, 0)")
                .bind(appliance.as_str())
                .execute(&self.pool)
                .await?;
        }

        for spot_number in 1..=4i64 {
            sqlx::query("INSERT OR IGNORE INTO parking_spots (spot_number, occupied) VALUES (?, 0)")
                .bind(spot_number)
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }
}
