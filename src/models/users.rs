//! Credential store backed by the `users` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Row};
use tracing::{info_span, Instrument};

use super::{is_unique_violation, ModelError, UserId, UserStore};

const EMAIL_CONSTRAINT: &str = "users_uc_email";

#[derive(Clone, Debug, Serialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub created: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct PgUserStore {
    pool: PgPool,
    bcrypt_cost: u32,
}

impl PgUserStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }

    #[must_use]
    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }
}

/// Hash off the async runtime; bcrypt is deliberately slow.
pub(crate) async fn hash_password(password: &str, cost: u32) -> Result<String, ModelError> {
    let password = password.to_string();
    let hashed = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost)).await??;
    Ok(hashed)
}

pub(crate) async fn verify_password(password: &str, hashed: &str) -> Result<bool, ModelError> {
    let password = password.to_string();
    let hashed = hashed.to_string();
    let matches = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hashed)).await??;
    Ok(matches)
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn insert(&self, name: &str, email: &str, password: &str) -> Result<(), ModelError> {
        let hashed_password = hash_password(password, self.bcrypt_cost).await?;

        let query = r"
            INSERT INTO users (name, email, hashed_password, created)
            VALUES ($1, $2, $3, NOW())
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(name)
            .bind(email)
            .bind(hashed_password)
            .execute(&self.pool)
            .instrument(span)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err, EMAIL_CONSTRAINT) => {
                Err(ModelError::DuplicateEmail)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<UserId, ModelError> {
        let query = "SELECT id, hashed_password FROM users WHERE email = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;

        let Some(row) = row else {
            return Err(ModelError::InvalidCredentials);
        };

        let id: UserId = row.get("id");
        let hashed_password: String = row.get("hashed_password");

        if verify_password(password, hashed_password.trim_end()).await? {
            Ok(id)
        } else {
            Err(ModelError::InvalidCredentials)
        }
    }

    async fn exists(&self, id: UserId) -> Result<bool, ModelError> {
        let query = "SELECT EXISTS(SELECT true FROM users WHERE id = $1)";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let exists: bool = sqlx::query_scalar(query)
            .bind(id)
            .fetch_one(&self.pool)
            .instrument(span)
            .await?;

        Ok(exists)
    }

    async fn get(&self, id: UserId) -> Result<User, ModelError> {
        let query = "SELECT id, name, email, created FROM users WHERE id = $1";
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

        Ok(User {
            id: row.get("id"),
            name: row.get("name"),
            email: row.get("email"),
            created: row.get("created"),
        })
    }
}
