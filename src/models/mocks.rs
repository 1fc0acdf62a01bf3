//! In-memory stores used by handler tests.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;

use super::users::{hash_password, verify_password};
use super::{ModelError, Snippet, SnippetStore, User, UserId, UserStore};

// Lowest cost bcrypt accepts.
const MOCK_BCRYPT_COST: u32 = 4;

struct StoredUser {
    user: User,
    hashed_password: String,
}

/// Keeps users in memory but hashes and verifies passwords for real.
#[derive(Default)]
pub(crate) struct MockUserStore {
    users: Mutex<Vec<StoredUser>>,
}

impl MockUserStore {
    /// Remove a user, simulating an account deleted while a session is live.
    pub(crate) fn delete(&self, id: UserId) {
        self.users.lock().retain(|stored| stored.user.id != id);
    }
}

#[async_trait]
impl UserStore for MockUserStore {
    async fn insert(&self, name: &str, email: &str, password: &str) -> Result<(), ModelError> {
        let hashed_password = hash_password(password, MOCK_BCRYPT_COST).await?;

        let mut users = self.users.lock();
        if users.iter().any(|stored| stored.user.email == email) {
            return Err(ModelError::DuplicateEmail);
        }
        let id = users.iter().map(|stored| stored.user.id).max().unwrap_or(0) + 1;
        users.push(StoredUser {
            user: User {
                id,
                name: name.to_string(),
                email: email.to_string(),
                created: Utc::now(),
            },
            hashed_password,
        });
        Ok(())
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<UserId, ModelError> {
        let found = self
            .users
            .lock()
            .iter()
            .find(|stored| stored.user.email == email)
            .map(|stored| (stored.user.id, stored.hashed_password.clone()));

        let Some((id, hashed_password)) = found else {
            return Err(ModelError::InvalidCredentials);
        };
        if verify_password(password, &hashed_password).await? {
            Ok(id)
        } else {
            Err(ModelError::InvalidCredentials)
        }
    }

    async fn exists(&self, id: UserId) -> Result<bool, ModelError> {
        Ok(self.users.lock().iter().any(|stored| stored.user.id == id))
    }

    async fn get(&self, id: UserId) -> Result<User, ModelError> {
        self.users
            .lock()
            .iter()
            .find(|stored| stored.user.id == id)
            .map(|stored| stored.user.clone())
            .ok_or(ModelError::NoRecord)
    }
}

pub(crate) fn mock_snippet() -> Snippet {
    let now = Utc::now();
    Snippet {
        id: 1,
        title: "An old silent pond".to_string(),
        content: "An old silent pond...".to_string(),
        created: now,
        expires: now + Duration::days(365),
    }
}

/// Serves a single fixed snippet with id 1.
#[derive(Default)]
pub(crate) struct MockSnippetStore;

#[async_trait]
impl SnippetStore for MockSnippetStore {
    async fn insert(&self, _title: &str, _content: &str, _expires_days: i32) -> Result<i64, ModelError> {
        Ok(2)
    }

    async fn get(&self, id: i64) -> Result<Snippet, ModelError> {
        match id {
            1 => Ok(mock_snippet()),
            _ => Err(ModelError::NoRecord),
        }
    }

    async fn latest(&self) -> Result<Vec<Snippet>, ModelError> {
        Ok(vec![mock_snippet()])
    }
}
