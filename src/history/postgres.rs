//! Postgres-backed history, one JSONB document per session

use super::HistoryStore;
use crate::error::Result;
use crate::session::ConversationTurn;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::time::Duration;
use tracing::info;

pub struct PgHistoryStore {
    pool: PgPool,
}

impl PgHistoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and create the history table if missing.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await?;

        let store = Self::new(pool);
        store.ensure_schema().await?;
        info!("🗄️  History stored in Postgres");
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_history (
                session_id TEXT PRIMARY KEY,
                history JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for PgHistoryStore {
    async fn save(&self, session_id: &str, turns: &[ConversationTurn]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chat_history (session_id, history, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (session_id)
            DO UPDATE SET history = EXCLUDED.history, updated_at = NOW()
            "#,
        )
        .bind(session_id)
        .bind(Json(turns))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<Vec<ConversationTurn>>> {
        let row: Option<(Json<Vec<ConversationTurn>>,)> =
            sqlx::query_as("SELECT history FROM chat_history WHERE session_id = $1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(Json(turns),)| turns))
    }
}
