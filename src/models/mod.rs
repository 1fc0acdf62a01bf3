//! Persistence for users and snippets.
//!
//! Handlers talk to the [`UserStore`] and [`SnippetStore`] traits; the
//! `PostgreSQL` implementations live next to them and the test doubles in
//! `mocks`. Every failure crosses this boundary as a [`ModelError`], so callers
//! match on the kind instead of comparing error values.

use async_trait::async_trait;
use thiserror::Error;

pub mod snippets;
pub mod users;

#[cfg(test)]
pub(crate) mod mocks;

pub use snippets::{PgSnippetStore, Snippet};
pub use users::{PgUserStore, User};

pub type UserId = i64;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("no matching record found")]
    NoRecord,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("duplicate email")]
    DuplicateEmail,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Hash the password and create the user.
    ///
    /// Returns [`ModelError::DuplicateEmail`] when the email is already taken.
    async fn insert(&self, name: &str, email: &str, password: &str) -> Result<(), ModelError>;

    /// Verify an email/password pair.
    ///
    /// Unknown emails and wrong passwords both return
    /// [`ModelError::InvalidCredentials`].
    async fn authenticate(&self, email: &str, password: &str) -> Result<UserId, ModelError>;

    async fn exists(&self, id: UserId) -> Result<bool, ModelError>;

    async fn get(&self, id: UserId) -> Result<User, ModelError>;
}

#[async_trait]
pub trait SnippetStore: Send + Sync {
    /// Insert a snippet that expires `expires_days` from now and return its id.
    async fn insert(&self, title: &str, content: &str, expires_days: i32) -> Result<i64, ModelError>;

    /// Fetch an unexpired snippet.
    async fn get(&self, id: i64) -> Result<Snippet, ModelError>;

    /// The ten most recently created unexpired snippets.
    async fn latest(&self) -> Result<Vec<Snippet>, ModelError>;
}

/// `SQLSTATE` for `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

pub(crate) fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err
                .code()
                .is_some_and(|code| code.as_ref() == UNIQUE_VIOLATION)
                && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}
