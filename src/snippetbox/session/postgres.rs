//! `PostgreSQL` session store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use tracing::{info_span, Instrument};

use super::{
    store::{SessionRecord, SessionStore},
    SessionData,
};

#[derive(Clone, Debug)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn find(&self, token_hash: &[u8]) -> Result<Option<SessionRecord>> {
        let query = r"
            SELECT data, expires_at
            FROM sessions
            WHERE token_hash = $1 AND expires_at > NOW()
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup session")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let data = match row.get::<Value, _>("data") {
            Value::Object(map) => map,
            // A non-object payload is unusable; treat it as an empty session.
            _ => SessionData::new(),
        };

        Ok(Some(SessionRecord {
            data,
            expires_at: row.get("expires_at"),
        }))
    }

    async fn commit(
        &self,
        token_hash: &[u8],
        data: &SessionData,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let query = r"
            INSERT INTO sessions (token_hash, data, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (token_hash)
            DO UPDATE SET data = EXCLUDED.data, expires_at = EXCLUDED.expires_at
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(token_hash)
            .bind(Value::Object(data.clone()))
            .bind(expires_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to commit session")?;

        Ok(())
    }

    async fn delete(&self, token_hash: &[u8]) -> Result<()> {
        let query = "DELETE FROM sessions WHERE token_hash = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete session")?;

        Ok(())
    }

    async fn delete_expired(&self) -> Result<u64> {
        let query = "DELETE FROM sessions WHERE expires_at <= NOW()";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete expired sessions")?;

        Ok(result.rows_affected())
    }
}
