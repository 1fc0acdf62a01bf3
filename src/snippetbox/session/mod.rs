//! Server-side sessions.
//!
//! Flow Overview:
//! - [`load_and_save`] reads the session cookie, loads the matching record
//!   from the [`SessionStore`] and places a [`Session`] handle in the request
//!   extensions.
//! - Handlers and inner middleware read and write keys through the handle.
//! - After the handler returns, modified sessions are written back and the
//!   cookie is (re)issued; destroyed sessions are deleted and the cookie is
//!   cleared. Untouched sessions cost nothing and never set a cookie.
//!
//! Security boundaries: tokens are 32 random bytes from the OS RNG. Only the
//! SHA-256 hash of a token reaches the store. [`Session::renew`] swaps the
//! token while keeping the data, and the superseded token is deleted at commit
//! so it can never be replayed.

pub mod postgres;
pub mod store;

use anyhow::{Context, Result};
use axum::{
    async_trait,
    extract::{Extension, FromRequestParts, Request},
    http::{
        header::{CACHE_CONTROL, COOKIE, SET_COOKIE, VARY},
        request::Parts,
        HeaderMap, HeaderValue, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::{rngs::OsRng, RngCore};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::{fmt, sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{debug, error};

pub use self::postgres::PgSessionStore;
pub use self::store::{MemoryStore, SessionRecord, SessionStore};

/// Key/value bag persisted with each session.
pub type SessionData = serde_json::Map<String, Value>;

const DEFAULT_COOKIE_NAME: &str = "session";
const DEFAULT_LIFETIME: Duration = Duration::from_secs(12 * 60 * 60);

#[derive(Clone, Debug)]
pub struct SessionConfig {
    cookie_name: String,
    cookie_secure: bool,
    lifetime: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            cookie_secure: false,
            lifetime: DEFAULT_LIFETIME,
        }
    }

    #[must_use]
    pub fn with_cookie_name(mut self, name: String) -> Self {
        self.cookie_name = name;
        self
    }

    #[must_use]
    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    #[must_use]
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    fn chrono_lifetime(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.lifetime).unwrap_or_else(|_| chrono::Duration::hours(12))
    }
}

/// Create a new random session token for the cookie.
///
/// # Errors
/// Returns an error if the OS random number generator fails.
pub fn generate_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a session token so raw values never touch the store.
#[must_use]
pub fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Status {
    Unmodified,
    Modified,
    Destroyed,
}

struct Inner {
    token: Option<String>,
    // Persisted token that must be deleted at commit (after renew or destroy).
    superseded: Option<String>,
    data: SessionData,
    expires_at: DateTime<Utc>,
    lifetime: chrono::Duration,
    status: Status,
}

/// Per-request handle to the current session.
///
/// Cloning is cheap; all clones share the same state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Mutex<Inner>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Session")
            .field("token", &inner.token.as_ref().map(|_| "***"))
            .field("keys", &inner.data.keys().collect::<Vec<_>>())
            .field("expires_at", &inner.expires_at)
            .field("status", &inner.status)
            .finish()
    }
}

struct Snapshot {
    token: Option<String>,
    superseded: Option<String>,
    data: SessionData,
    expires_at: DateTime<Utc>,
    status: Status,
}

impl Session {
    fn new(lifetime: chrono::Duration) -> Self {
        Self::from_inner(Inner {
            token: None,
            superseded: None,
            data: SessionData::new(),
            expires_at: Utc::now() + lifetime,
            lifetime,
            status: Status::Unmodified,
        })
    }

    fn loaded(token: String, record: SessionRecord, lifetime: chrono::Duration) -> Self {
        Self::from_inner(Inner {
            token: Some(token),
            superseded: None,
            data: record.data,
            expires_at: record.expires_at,
            lifetime,
            status: Status::Unmodified,
        })
    }

    fn from_inner(inner: Inner) -> Self {
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Current token, `None` for a session that was never persisted.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.inner.lock().token.clone()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().data.get(key).cloned()
    }

    #[must_use]
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key)
            .and_then(|value| value.as_str().map(ToString::to_string))
    }

    #[must_use]
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|value| value.as_i64())
    }

    #[must_use]
    pub fn exists(&self, key: &str) -> bool {
        self.inner.lock().data.contains_key(key)
    }

    pub fn put(&self, key: &str, value: impl Into<Value>) {
        let mut inner = self.inner.lock();
        inner.data.insert(key.to_string(), value.into());
        inner.status = Status::Modified;
    }

    /// Read a string and remove it in one step (flash messages).
    pub fn pop_string(&self, key: &str) -> Option<String> {
        let mut inner = self.inner.lock();
        let value = inner.data.remove(key)?;
        inner.status = Status::Modified;
        value.as_str().map(ToString::to_string)
    }

    pub fn remove(&self, key: &str) {
        let mut inner = self.inner.lock();
        if inner.data.remove(key).is_some() {
            inner.status = Status::Modified;
        }
    }

    /// Replace the session token, keeping the data and restarting the lifetime.
    ///
    /// Call on every privilege change to defeat session fixation.
    ///
    /// # Errors
    /// Returns an error if a new token cannot be generated.
    pub fn renew(&self) -> Result<()> {
        let token = generate_token()?;
        let mut inner = self.inner.lock();
        if let Some(previous) = inner.token.replace(token) {
            if inner.superseded.is_none() {
                inner.superseded = Some(previous);
            }
        }
        inner.expires_at = Utc::now() + inner.lifetime;
        inner.status = Status::Modified;
        Ok(())
    }

    /// Drop all data and delete the session from the store at commit.
    pub fn destroy(&self) {
        let mut inner = self.inner.lock();
        if let Some(previous) = inner.token.take() {
            if inner.superseded.is_none() {
                inner.superseded = Some(previous);
            }
        }
        inner.data.clear();
        inner.expires_at = Utc::now() + inner.lifetime;
        inner.status = Status::Destroyed;
    }

    fn snapshot(&self) -> Snapshot {
        let inner = self.inner.lock();
        Snapshot {
            token: inner.token.clone(),
            superseded: inner.superseded.clone(),
            data: inner.data.clone(),
            expires_at: inner.expires_at,
            status: inner.status,
        }
    }

    fn committed(&self, token: String) {
        let mut inner = self.inner.lock();
        inner.token = Some(token);
        inner.superseded = None;
        inner.status = Status::Unmodified;
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<Self>().cloned().ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            "Session layer is not installed",
        ))
    }
}

/// Loads and commits sessions around each request.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
}

impl SessionManager {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, config: SessionConfig) -> Self {
        Self { store, config }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Resolve the session cookie into a session, or start a fresh one.
    ///
    /// # Errors
    /// Returns an error if the store lookup fails.
    pub async fn load(&self, headers: &HeaderMap) -> Result<Session> {
        let lifetime = self.config.chrono_lifetime();
        let Some(token) = extract_session_token(headers, self.config.cookie_name()) else {
            return Ok(Session::new(lifetime));
        };

        match self.store.find(&hash_token(&token)).await? {
            Some(record) => Ok(Session::loaded(token, record, lifetime)),
            // Unknown or expired tokens are never adopted; a new one is issued on write.
            None => Ok(Session::new(lifetime)),
        }
    }

    /// Persist pending changes and return the `Set-Cookie` value to send, if any.
    ///
    /// # Errors
    /// Returns an error if the store write fails or a token cannot be generated.
    pub async fn commit(&self, session: &Session) -> Result<Option<HeaderValue>> {
        let snapshot = session.snapshot();

        if snapshot.status == Status::Unmodified {
            return Ok(None);
        }

        if let Some(superseded) = &snapshot.superseded {
            self.store.delete(&hash_token(superseded)).await?;
        }

        if snapshot.status == Status::Destroyed {
            debug!("session destroyed");
            return self.clear_cookie().map(Some);
        }

        let token = match snapshot.token {
            Some(token) => token,
            None => generate_token()?,
        };
        self.store
            .commit(&hash_token(&token), &snapshot.data, snapshot.expires_at)
            .await?;

        let max_age = (snapshot.expires_at - Utc::now()).num_seconds().max(0);
        let cookie = self.cookie(&token, max_age)?;
        session.committed(token);

        Ok(Some(cookie))
    }

    fn cookie(&self, token: &str, max_age: i64) -> Result<HeaderValue> {
        let mut cookie = format!(
            "{}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}",
            self.config.cookie_name
        );
        if self.config.cookie_secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie).context("failed to build session cookie")
    }

    fn clear_cookie(&self) -> Result<HeaderValue> {
        self.cookie("", 0)
    }
}

/// Middleware: load the session before the handler and commit it afterwards.
pub async fn load_and_save(
    Extension(manager): Extension<SessionManager>,
    mut request: Request,
    next: Next,
) -> Response {
    let session = match manager.load(request.headers()).await {
        Ok(session) => session,
        Err(err) => {
            error!("Failed to load session: {err:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    request.extensions_mut().insert(session.clone());

    let mut response = next.run(request).await;

    match manager.commit(&session).await {
        Ok(Some(cookie)) => {
            let headers = response.headers_mut();
            headers.append(SET_COOKIE, cookie);
            headers.append(VARY, HeaderValue::from_static("Cookie"));
            headers.append(CACHE_CONTROL, HeaderValue::from_static("no-cache=\"Set-Cookie\""));
            response
        }
        Ok(None) => response,
        Err(err) => {
            error!("Failed to commit session: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Periodically purge expired sessions from the store.
pub fn spawn_cleanup(
    store: Arc<dyn SessionStore>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            sleep(interval).await;

            match store.delete_expired().await {
                Ok(0) => {}
                Ok(removed) => debug!("Removed {removed} expired sessions"),
                Err(err) => error!("Expired session cleanup failed: {err:#}"),
            }
        }
    })
}

fn extract_session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
                continue;
            };
            let val = val.trim();
            if key.trim() == cookie_name && !val.is_empty() {
                return Some(val.to_string());
            }
        }
    }
    None
}
