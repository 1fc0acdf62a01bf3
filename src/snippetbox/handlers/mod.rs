use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{Html, IntoResponse, Response},
};
use chrono::{Datelike, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::error;

use super::{
    csrf::CsrfToken,
    middleware::AuthContext,
    session::Session,
    templates::TemplateData,
    validator::Validator,
    Application, FLASH, USER_NAME,
};

pub mod health;
pub mod snippets;
pub mod users;

#[cfg(test)]
mod tests;

pub use health::health;

/// Request state every page render needs.
#[derive(Clone, Debug)]
pub struct Page {
    pub session: Session,
    pub auth: AuthContext,
    pub csrf: CsrfToken,
}

#[async_trait]
impl<S> FromRequestParts<S> for Page
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;
        let csrf = CsrfToken::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;
        let auth = parts
            .extensions
            .get::<AuthContext>()
            .copied()
            .unwrap_or_default();

        Ok(Self {
            session,
            auth,
            csrf,
        })
    }
}

impl Page {
    /// Defaults for a page render; consumes any pending flash message.
    #[must_use]
    pub fn template_data(&self) -> TemplateData {
        let is_authenticated = self.auth.is_authenticated();
        TemplateData {
            current_year: Utc::now().year(),
            flash: self.session.pop_string(FLASH),
            is_authenticated,
            csrf_token: self.csrf.as_str().to_string(),
            user_name: if is_authenticated {
                self.session.get_string(USER_NAME)
            } else {
                None
            },
            ..TemplateData::default()
        }
    }
}

#[derive(Serialize)]
struct FormView<'a, T> {
    #[serde(flatten)]
    values: &'a T,
    #[serde(flatten)]
    validator: &'a Validator,
}

/// Combine submitted values and their errors for re-rendering a form.
pub(crate) fn form_value<T: Serialize>(values: &T, validator: &Validator) -> Option<Value> {
    serde_json::to_value(FormView { values, validator })
        .map_err(|err| error!("Failed to serialize form: {err}"))
        .ok()
}

pub(crate) fn render(
    app: &Application,
    status: StatusCode,
    page: &str,
    data: &TemplateData,
) -> Response {
    match app.templates.render(page, data) {
        Ok(html) => (status, Html(html)).into_response(),
        Err(err) => server_error(err),
    }
}

/// Log the cause and answer with an opaque `500`.
pub(crate) fn server_error(err: impl Into<anyhow::Error>) -> Response {
    let err = err.into();
    error!("{err:#}");
    client_error(StatusCode::INTERNAL_SERVER_ERROR)
}

pub(crate) fn client_error(status: StatusCode) -> Response {
    (status, status.canonical_reason().unwrap_or_default()).into_response()
}

pub(crate) fn not_found() -> Response {
    client_error(StatusCode::NOT_FOUND)
}

pub async fn fallback() -> Response {
    not_found()
}
