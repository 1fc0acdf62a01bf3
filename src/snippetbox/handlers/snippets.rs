use axum::{
    extract::{rejection::FormRejection, Extension, Form, Path},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};

use super::{client_error, form_value, not_found, render, server_error, Page};
use crate::{
    models::ModelError,
    snippetbox::{
        validator::{self, Validator},
        Application, FLASH,
    },
};

const PERMITTED_EXPIRES: [i32; 3] = [1, 7, 365];
const DEFAULT_EXPIRES: i32 = 365;

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SnippetCreateForm {
    pub title: String,
    pub content: String,
    pub expires: i32,
}

impl SnippetCreateForm {
    fn validate(&self) -> Validator {
        let mut v = Validator::default();
        v.check_field(validator::not_blank(&self.title), "title", validator::BLANK);
        v.check_field(
            validator::max_chars(&self.title, 100),
            "title",
            validator::TOO_LONG,
        );
        v.check_field(
            validator::not_blank(&self.content),
            "content",
            validator::BLANK,
        );
        v.check_field(
            validator::permitted_value(&self.expires, &PERMITTED_EXPIRES),
            "expires",
            validator::NOT_PERMITTED,
        );
        v
    }
}

// axum handler for GET /
pub async fn home(Extension(app): Extension<Application>, page: Page) -> Response {
    match app.snippets.latest().await {
        Ok(snippets) => {
            let mut data = page.template_data();
            data.snippets = snippets;
            render(&app, StatusCode::OK, "home", &data)
        }
        Err(err) => server_error(err),
    }
}

// axum handler for GET /snippet/view/:id
pub async fn view(
    Extension(app): Extension<Application>,
    page: Page,
    Path(id): Path<String>,
) -> Response {
    let id = match id.parse::<i64>() {
        Ok(id) if id >= 1 => id,
        _ => return client_error(StatusCode::BAD_REQUEST),
    };

    match app.snippets.get(id).await {
        Ok(snippet) => {
            let mut data = page.template_data();
            data.snippet = Some(snippet);
            render(&app, StatusCode::OK, "view", &data)
        }
        Err(ModelError::NoRecord) => not_found(),
        Err(err) => server_error(err),
    }
}

// axum handler for GET /snippet/create
pub async fn create(Extension(app): Extension<Application>, page: Page) -> Response {
    let form = SnippetCreateForm {
        expires: DEFAULT_EXPIRES,
        ..SnippetCreateForm::default()
    };
    let mut data = page.template_data();
    data.form = form_value(&form, &Validator::default());
    render(&app, StatusCode::OK, "create", &data)
}

// axum handler for POST /snippet/create
pub async fn create_post(
    Extension(app): Extension<Application>,
    page: Page,
    form: Result<Form<SnippetCreateForm>, FormRejection>,
) -> Response {
    let Ok(Form(form)) = form else {
        return client_error(StatusCode::BAD_REQUEST);
    };

    let v = form.validate();
    if !v.valid() {
        let mut data = page.template_data();
        data.form = form_value(&form, &v);
        return render(&app, StatusCode::UNPROCESSABLE_ENTITY, "create", &data);
    }

    match app
        .snippets
        .insert(&form.title, &form.content, form.expires)
        .await
    {
        Ok(id) => {
            page.session.put(FLASH, "Snippet successfully created!");
            Redirect::to(&format!("/snippet/view/{id}")).into_response()
        }
        Err(err) => server_error(err),
    }
}
