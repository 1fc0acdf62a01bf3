use axum::{
    async_trait,
    extract::{Extension, FromRequestParts, Request},
    http::{
        header::{CACHE_CONTROL, CONNECTION},
        request::Parts,
        HeaderValue, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use std::any::Any;
use tracing::{debug, error};

use super::{
    session::Session,
    Application, AUTHENTICATED_USER_ID, USER_NAME,
};
use crate::models::UserId;

/// Authentication state of the current request.
#[derive(Clone, Copy, Debug, Default)]
pub struct AuthContext {
    pub user_id: Option<UserId>,
}

impl AuthContext {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<Self>().copied().unwrap_or_default())
    }
}

/// Resolve `authenticatedUserID` from the session into an [`AuthContext`].
///
/// An id whose user no longer exists is dropped from the session.
pub async fn authenticate(
    Extension(app): Extension<Application>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(session) = request.extensions().get::<Session>().cloned() else {
        error!("authenticate installed without a session layer");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let mut context = AuthContext::default();

    if let Some(id) = session.get_i64(AUTHENTICATED_USER_ID) {
        match app.users.exists(id).await {
            Ok(true) => context.user_id = Some(id),
            Ok(false) => {
                debug!(user_id = id, "Session refers to a missing user");
                session.remove(AUTHENTICATED_USER_ID);
                session.remove(USER_NAME);
            }
            Err(err) => {
                error!("Failed to check user: {err}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    }

    request.extensions_mut().insert(context);
    next.run(request).await
}

/// Redirect anonymous users to the login page; never cache protected pages.
pub async fn require_authentication(auth: AuthContext, request: Request, next: Next) -> Response {
    if !auth.is_authenticated() {
        return Redirect::to("/user/login").into_response();
    }

    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

/// Turn a handler panic into a `500` and close the connection.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!("Handler panicked: {detail}");

    let mut response = (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
    response
        .headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));
    response
}
