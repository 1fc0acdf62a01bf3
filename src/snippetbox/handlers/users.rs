//! Signup, login and logout.
//!
//! Login and logout renew the session token before touching the
//! authentication keys.

use axum::{
    extract::{rejection::FormRejection, Extension, Form},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{client_error, form_value, render, server_error, Page};
use crate::{
    models::ModelError,
    snippetbox::{
        validator::{self, Validator},
        Application, AUTHENTICATED_USER_ID, FLASH, USER_NAME,
    },
};

const MIN_PASSWORD_CHARS: usize = 8;
const MAX_FIELD_CHARS: usize = 100;

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SignupForm {
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
}

impl SignupForm {
    fn validate(&self) -> Validator {
        let mut v = Validator::default();
        v.check_field(validator::not_blank(&self.name), "name", validator::BLANK);
        v.check_field(
            validator::max_chars(&self.name, MAX_FIELD_CHARS),
            "name",
            validator::TOO_LONG,
        );
        check_email(&mut v, &self.email);
        v.check_field(
            validator::not_blank(&self.password),
            "password",
            validator::BLANK,
        );
        v.check_field(
            validator::max_chars(&self.password, MAX_FIELD_CHARS),
            "password",
            validator::TOO_LONG,
        );
        v.check_field(
            validator::min_chars(&self.password, MIN_PASSWORD_CHARS),
            "password",
            validator::TOO_SHORT,
        );
        v
    }
}

fn check_email(v: &mut Validator, email: &str) {
    v.check_field(validator::not_blank(email), "email", validator::BLANK);
    v.check_field(
        validator::max_chars(email, MAX_FIELD_CHARS),
        "email",
        validator::TOO_LONG,
    );
    v.check_field(
        validator::matches_email(email),
        "email",
        validator::INVALID_EMAIL,
    );
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LoginForm {
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
}

impl LoginForm {
    fn validate(&self) -> Validator {
        let mut v = Validator::default();
        check_email(&mut v, &self.email);
        v.check_field(
            validator::not_blank(&self.password),
            "password",
            validator::BLANK,
        );
        v.check_field(
            validator::max_chars(&self.password, MAX_FIELD_CHARS),
            "password",
            validator::TOO_LONG,
        );
        v
    }
}

fn render_signup(
    app: &Application,
    page: &Page,
    status: StatusCode,
    form: &SignupForm,
    v: &Validator,
) -> Response {
    let mut data = page.template_data();
    data.form = form_value(form, v);
    render(app, status, "signup", &data)
}

fn render_login(
    app: &Application,
    page: &Page,
    status: StatusCode,
    form: &LoginForm,
    v: &Validator,
) -> Response {
    let mut data = page.template_data();
    data.form = form_value(form, v);
    render(app, status, "login", &data)
}

// axum handler for GET /user/signup
pub async fn signup(Extension(app): Extension<Application>, page: Page) -> Response {
    render_signup(
        &app,
        &page,
        StatusCode::OK,
        &SignupForm::default(),
        &Validator::default(),
    )
}

// axum handler for POST /user/signup
pub async fn signup_post(
    Extension(app): Extension<Application>,
    page: Page,
    form: Result<Form<SignupForm>, FormRejection>,
) -> Response {
    let Ok(Form(mut form)) = form else {
        return client_error(StatusCode::BAD_REQUEST);
    };
    form.name = form.name.trim().to_string();
    form.email = validator::normalize_email(&form.email);

    let mut v = form.validate();
    if !v.valid() {
        return render_signup(&app, &page, StatusCode::UNPROCESSABLE_ENTITY, &form, &v);
    }

    match app.users.insert(&form.name, &form.email, &form.password).await {
        Ok(()) => {
            info!("New user signed up");
            page.session.put(FLASH, "Your signup was successful. Please log in.");
            Redirect::to("/user/login").into_response()
        }
        Err(ModelError::DuplicateEmail) => {
            v.add_field_error("email", validator::DUPLICATE_EMAIL);
            render_signup(&app, &page, StatusCode::UNPROCESSABLE_ENTITY, &form, &v)
        }
        Err(err) => server_error(err),
    }
}

// axum handler for GET /user/login
pub async fn login(Extension(app): Extension<Application>, page: Page) -> Response {
    render_login(
        &app,
        &page,
        StatusCode::OK,
        &LoginForm::default(),
        &Validator::default(),
    )
}

// axum handler for POST /user/login
pub async fn login_post(
    Extension(app): Extension<Application>,
    page: Page,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Response {
    let Ok(Form(mut form)) = form else {
        return client_error(StatusCode::BAD_REQUEST);
    };
    form.email = validator::normalize_email(&form.email);

    let mut v = form.validate();
    if !v.valid() {
        return render_login(&app, &page, StatusCode::UNPROCESSABLE_ENTITY, &form, &v);
    }

    let id = match app.users.authenticate(&form.email, &form.password).await {
        Ok(id) => id,
        Err(ModelError::InvalidCredentials) => {
            debug!("Login rejected");
            v.add_non_field_error(validator::INVALID_CREDENTIALS);
            return render_login(&app, &page, StatusCode::UNPROCESSABLE_ENTITY, &form, &v);
        }
        Err(err) => return server_error(err),
    };

    let user = match app.users.get(id).await {
        Ok(user) => user,
        Err(err) => return server_error(err),
    };

    if let Err(err) = page.session.renew() {
        return server_error(err);
    }
    page.session.put(AUTHENTICATED_USER_ID, id);
    page.session.put(USER_NAME, user.name);

    Redirect::to("/snippet/create").into_response()
}

// axum handler for POST /user/logout
pub async fn logout_post(page: Page) -> Response {
    if let Err(err) = page.session.renew() {
        return server_error(err);
    }
    page.session.remove(AUTHENTICATED_USER_ID);
    page.session.remove(USER_NAME);
    page.session.put(FLASH, "You've been logged out successfully!");

    Redirect::to("/").into_response()
}
