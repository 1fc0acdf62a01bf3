//! CSRF protection bound to the session.
//!
//! Every session carries a random token under the `csrfToken` key. Forms echo
//! it back in a hidden `csrf_token` field (scripts may use the
//! `X-CSRF-Token` header instead). Requests with an unsafe method are rejected
//! with `400` before the handler runs unless the submitted token matches.

use axum::{
    async_trait,
    body::{to_bytes, Body},
    extract::{FromRequestParts, Request},
    http::{
        header::{CONTENT_LENGTH, CONTENT_TYPE},
        request::Parts,
        Method, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tracing::{error, warn};

use super::session::{generate_token, Session};

pub const SESSION_KEY: &str = "csrfToken";
pub const FORM_FIELD: &str = "csrf_token";
pub const HEADER: &str = "x-csrf-token";

// Upper bound for buffering a form body while looking for the token.
const MAX_FORM_BYTES: usize = 1024 * 1024;

/// Per-route cap on the form body the guard buffers. Must be layered outside
/// the guard; routes without it fall back to 1 MiB.
#[derive(Clone, Copy, Debug)]
pub struct FormLimit(pub usize);

/// Token for the current session, made available to handlers and templates.
#[derive(Clone, Debug)]
pub struct CsrfToken(pub String);

impl CsrfToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CsrfToken
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<Self>().cloned().ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            "CSRF layer is not installed",
        ))
    }
}

/// Middleware: must run inside the session layer.
pub async fn guard(request: Request, next: Next) -> Response {
    let Some(session) = request.extensions().get::<Session>().cloned() else {
        error!("CSRF guard installed without a session layer");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let expected = match session.get_string(SESSION_KEY) {
        Some(token) => token,
        None => match generate_token() {
            Ok(token) => {
                session.put(SESSION_KEY, token.clone());
                token
            }
            Err(err) => {
                error!("Failed to generate CSRF token: {err:#}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        },
    };

    let mut request = if is_safe(request.method()) {
        request
    } else {
        match verify(request, &expected).await {
            Ok(request) => request,
            Err(response) => return response,
        }
    };

    request.extensions_mut().insert(CsrfToken(expected));
    next.run(request).await
}

fn is_safe(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

async fn verify(request: Request, expected: &str) -> Result<Request, Response> {
    if let Some(header) = request.headers().get(HEADER) {
        let provided = header.to_str().unwrap_or_default();
        if tokens_match(provided, expected) {
            return Ok(request);
        }
        warn!("CSRF header token mismatch");
        return Err(bad_request());
    }

    let is_form = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"));
    if !is_form {
        warn!("Unsafe request without a CSRF token");
        return Err(bad_request());
    }

    let limit = request
        .extensions()
        .get::<FormLimit>()
        .map_or(MAX_FORM_BYTES, |limit| limit.0);
    if let Some(length) = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|length| *length > limit)
    {
        warn!("Form body of {length} bytes exceeds {limit}");
        return Err(bad_request());
    }

    let (parts, body) = request.into_parts();
    let Ok(bytes) = to_bytes(body, limit).await else {
        warn!("Form body unreadable or too large for CSRF check");
        return Err(bad_request());
    };

    let provided = url::form_urlencoded::parse(&bytes)
        .find(|(key, _)| key == FORM_FIELD)
        .map(|(_, value)| value.into_owned());

    match provided {
        Some(provided) if tokens_match(&provided, expected) => {
            Ok(Request::from_parts(parts, Body::from(bytes)))
        }
        _ => {
            warn!("CSRF form token missing or mismatched");
            Err(bad_request())
        }
    }
}

fn bad_request() -> Response {
    (StatusCode::BAD_REQUEST, "Bad Request").into_response()
}

fn tokens_match(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}
