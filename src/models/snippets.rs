use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{info_span, Instrument};

use super::{ModelError, SnippetStore};

#[derive(Clone, Debug, Serialize)]
pub struct Snippet {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

impl Snippet {
    fn from_row(row: &PgRow) -> Self {
        Self {
            id: row.get("id"),
            title: row.get("title"),
            content: row.get("content"),
            created: row.get("created"),
            expires: row.get("expires"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PgSnippetStore {
    pool: PgPool,
}

impl PgSnippetStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnippetStore for PgSnippetStore {
    async fn insert(&self, title: &str, content: &str, expires_days: i32) -> Result<i64, ModelError> {
        let query = r"
            INSERT INTO snippets (title, content, created, expires)
            VALUES ($1, $2, NOW(), NOW() + ($3 * INTERVAL '1 day'))
            RETURNING id
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let id: i64 = sqlx::query_scalar(query)
            .bind(title)
            .bind(content)
            .bind(expires_days)
            .fetch_one(&self.pool)
            .instrument(span)
            .await?;

        Ok(id)
    }

    async fn get(&self, id: i64) -> Result<Snippet, ModelError> {
        let query = r"
            SELECT id, title, content, created, expires
            FROM snippets
            WHERE expires > NOW() AND id = $1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?
            .ok_or(ModelError::NoRecord)?;

        Ok(Snippet::from_row(&row))
    }

    async fn latest(&self) -> Result<Vec<Snippet>, ModelError> {
        let query = r"
            SELECT id, title, content, created, expires
            FROM snippets
            WHERE expires > NOW()
            ORDER BY id DESC
            LIMIT 10
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(span)
            .await?;

        Ok(rows.iter().map(Snippet::from_row).collect())
    }
}
