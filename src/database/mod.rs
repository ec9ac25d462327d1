use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

use crate::types::{Prediction, PredictionDocument};

/// Destination for persisted predictions.
#[async_trait]
pub trait PredictionSink: Send + Sync {
    /// Verifies the store accepts writes.
    async fn ping(&self) -> Result<()>;

    async fn store_prediction(
        &self,
        prediction: &Prediction,
        document: &PredictionDocument,
    ) -> Result<()>;
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if missing) the database and its schema
    pub async fn new(db_url: &str) -> Result<Self> {
        info!("Initializing SQLite database at: {}", db_url);

        let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);

        // Every connection to an in-memory database sees its own empty
        // database, so keep exactly one alive.
        let pool_options = if db_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options.connect_with(options).await?;

        let db = Self { pool };
        db.create_schema().await?;

        info!("Database initialized successfully");
        Ok(db)
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS predictions (
                id TEXT PRIMARY KEY,
                destination TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                symbol TEXT NOT NULL,
                signal TEXT NOT NULL,
                document TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_predictions_destination ON predictions(destination)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_predictions_symbol_ts ON predictions(symbol, timestamp)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert_prediction(
        &self,
        id: &str,
        destination: &str,
        document: &PredictionDocument,
    ) -> Result<()> {
        let body = serde_json::to_string(document)?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO predictions (id, destination, timestamp, symbol, signal, document)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(destination)
        .bind(document.timestamp.to_rfc3339())
        .bind(&document.symbol)
        .bind(document.trading_signal.as_str())
        .bind(body)
        .execute(&self.pool)
        .await?;

        debug!("Stored prediction {} in {}", id, destination);
        Ok(())
    }

    pub async fn count_in(&self, destination: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM predictions WHERE destination = ?")
            .bind(destination)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n"))
    }

    /// Most recent documents for a symbol, newest first.
    pub async fn recent_predictions(
        &self,
        symbol: &str,
        limit: i64,
    ) -> Result<Vec<PredictionDocument>> {
        let rows = sqlx::query(
            r#"
            SELECT document FROM predictions
            WHERE symbol = ?
            ORDER BY timestamp DESC
            LIMIT ?
            "#,
        )
        .bind(symbol)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let body: String = row.get("document");
                Ok(serde_json::from_str(&body)?)
            })
            .collect()
    }
}

#[async_trait]
impl PredictionSink for Database {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn store_prediction(
        &self,
        prediction: &Prediction,
        document: &PredictionDocument,
    ) -> Result<()> {
        self.insert_prediction(&prediction.id, &prediction.destination(), document)
            .await
    }
}
