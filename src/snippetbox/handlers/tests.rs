//! End-to-end handler tests against the real router, mock stores and the
//! in-memory session store.

use axum::{
    body::{to_bytes, Body},
    http::{
        header::{CACHE_CONTROL, CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE},
        HeaderMap, Method, Request, StatusCode,
    },
    Router,
};
use futures::{stream, StreamExt};
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tower::ServiceExt;

use crate::{
    models::mocks::{MockSnippetStore, MockUserStore},
    models::UserStore,
    snippetbox::{
        router,
        session::{hash_token, MemoryStore, SessionConfig, SessionManager, SessionStore},
        templates::Templates,
        validator, Application, USER_NAME,
    },
};

struct TestResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
}

impl TestResponse {
    fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }
}

struct TestApp {
    router: Router,
    users: Arc<MockUserStore>,
    sessions: Arc<MemoryStore>,
    cookie: Option<String>,
}

impl TestApp {
    fn new() -> Self {
        let users = Arc::new(MockUserStore::default());
        let sessions = Arc::new(MemoryStore::new());
        let app = Application {
            users: users.clone(),
            snippets: Arc::new(MockSnippetStore),
            templates: Templates::new().expect("templates compile"),
        };
        let manager = SessionManager::new(sessions.clone(), SessionConfig::new());
        let static_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("ui/static");

        Self {
            router: router(app, manager, &static_dir),
            users,
            sessions,
            cookie: None,
        }
    }

    async fn send(&mut self, builder: axum::http::request::Builder, body: Body) -> TestResponse {
        let builder = match &self.cookie {
            Some(token) => builder.header(COOKIE, format!("session={token}")),
            None => builder,
        };
        let request = builder.body(body).expect("valid request");
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible router");

        for value in response.headers().get_all(SET_COOKIE) {
            let value = value.to_str().expect("ascii cookie");
            let Some(pair) = value.split(';').next() else {
                continue;
            };
            if let Some(token) = pair.strip_prefix("session=") {
                self.cookie = if value.contains("Max-Age=0") {
                    None
                } else {
                    Some(token.to_string())
                };
            }
        }

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("readable body");

        TestResponse {
            status,
            headers,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        }
    }

    async fn get(&mut self, uri: &str) -> TestResponse {
        self.send(Request::builder().uri(uri), Body::empty()).await
    }

    async fn post_form(&mut self, uri: &str, fields: &[(&str, &str)]) -> TestResponse {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();
        self.send(
            Request::builder()
                .method(Method::POST)
                .uri(uri)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded"),
            Body::from(body),
        )
        .await
    }

    /// Fetch a form page and return the CSRF token embedded in it.
    async fn csrf_token(&mut self, uri: &str) -> String {
        let page = self.get(uri).await;
        assert_eq!(page.status, StatusCode::OK, "GET {uri}");
        extract_csrf_token(&page.body).expect("csrf token in page")
    }

    async fn signup(&mut self, name: &str, email: &str, password: &str) -> TestResponse {
        let token = self.csrf_token("/user/signup").await;
        self.post_form(
            "/user/signup",
            &[
                ("csrf_token", token.as_str()),
                ("name", name),
                ("email", email),
                ("password", password),
            ],
        )
        .await
    }

    async fn login(&mut self, email: &str, password: &str) -> TestResponse {
        let token = self.csrf_token("/user/login").await;
        self.post_form(
            "/user/login",
            &[
                ("csrf_token", token.as_str()),
                ("email", email),
                ("password", password),
            ],
        )
        .await
    }

    async fn session_value(&self, key: &str) -> Option<serde_json::Value> {
        let token = self.cookie.as_ref()?;
        let record = self
            .sessions
            .find(&hash_token(token))
            .await
            .expect("memory store");
        record.and_then(|record| record.data.get(key).cloned())
    }
}

fn extract_csrf_token(body: &str) -> Option<String> {
    let marker = "name='csrf_token' value='";
    let start = body.find(marker)? + marker.len();
    let end = body[start..].find('\'')?;
    Some(body[start..start + end].to_string())
}

#[tokio::test]
async fn home_lists_snippets_with_secure_headers() {
    let mut app = TestApp::new();
    let response = app.get("/").await;

    assert_eq!(response.status, StatusCode::OK);
    assert!(response.body.contains("An old silent pond"));

    for (name, value) in [
        (
            "content-security-policy",
            "default-src 'self'; style-src 'self' fonts.googleapis.com; font-src fonts.gstatic.com",
        ),
        ("referrer-policy", "origin-when-cross-origin"),
        ("x-content-type-options", "nosniff"),
        ("x-frame-options", "deny"),
        ("x-xss-protection", "0"),
    ] {
        assert_eq!(
            response.headers.get(name).and_then(|v| v.to_str().ok()),
            Some(value),
            "{name}"
        );
    }
    assert!(response.headers.contains_key("x-request-id"));
}

#[tokio::test]
async fn view_snippet_by_id() {
    let mut app = TestApp::new();

    let cases = [
        ("/snippet/view/1", StatusCode::OK),
        ("/snippet/view/2", StatusCode::NOT_FOUND),
        ("/snippet/view/-1", StatusCode::BAD_REQUEST),
        ("/snippet/view/0", StatusCode::BAD_REQUEST),
        ("/snippet/view/1.23", StatusCode::BAD_REQUEST),
        ("/snippet/view/foo", StatusCode::BAD_REQUEST),
    ];

    for (uri, expected) in cases {
        let response = app.get(uri).await;
        assert_eq!(response.status, expected, "GET {uri}");
        if expected == StatusCode::OK {
            assert!(response.body.contains("An old silent pond..."));
        }
    }
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let mut app = TestApp::new();
    assert_eq!(app.get("/missing").await.status, StatusCode::NOT_FOUND);
    assert_eq!(app.get("/static/missing.css").await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn static_files_are_served() {
    let mut app = TestApp::new();
    let response = app.get("/static/css/main.css").await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.body.contains("font-family"));
    assert!(
        !response.headers.contains_key(SET_COOKIE),
        "static files never touch the session"
    );
}

#[tokio::test]
async fn protected_routes_redirect_anonymous_users() {
    let mut app = TestApp::new();

    let response = app.get("/snippet/create").await;
    assert_eq!(response.status, StatusCode::SEE_OTHER);
    assert_eq!(response.location(), Some("/user/login"));

    let token = app.csrf_token("/user/login").await;
    let response = app
        .post_form("/user/logout", &[("csrf_token", token.as_str())])
        .await;
    assert_eq!(response.status, StatusCode::SEE_OTHER);
    assert_eq!(response.location(), Some("/user/login"));
}

#[tokio::test]
async fn post_without_valid_csrf_token_is_rejected() {
    let mut app = TestApp::new();

    // No session at all.
    let response = app
        .post_form(
            "/user/signup",
            &[("name", "Bob"), ("email", "bob@example.com"), ("password", "validPa$$word")],
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    // Session exists, wrong token.
    let _ = app.csrf_token("/user/signup").await;
    let response = app
        .post_form(
            "/user/signup",
            &[
                ("csrf_token", "wrongToken"),
                ("name", "Bob"),
                ("email", "bob@example.com"),
                ("password", "validPa$$word"),
            ],
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    assert!(app.users.get(1).await.is_err(), "handler must not run");
}

#[tokio::test]
async fn csrf_header_is_accepted() {
    let mut app = TestApp::new();
    let token = app.csrf_token("/user/signup").await;

    let body = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs([("name", "Bob"), ("email", "bob@example.com"), ("password", "validPa$$word")])
        .finish();
    let response = app
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/user/signup")
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .header("X-CSRF-Token", token),
            Body::from(body),
        )
        .await;

    assert_eq!(response.status, StatusCode::SEE_OTHER);
    assert_eq!(response.location(), Some("/user/login"));
}

#[tokio::test]
async fn signup_validation_errors_rerender_form() {
    let mut app = TestApp::new();
    let long_name = "a".repeat(101);
    let long_email = format!("{}@example.com", "b".repeat(89));
    let long_password = "p".repeat(101);

    let cases = [
        ("", "bob@example.com", "validPa$$word", validator::BLANK),
        ("Bob", "", "validPa$$word", validator::BLANK),
        ("Bob", "bob@example.", "validPa$$word", validator::INVALID_EMAIL),
        ("Bob", "bob@example.com", "pa$$", validator::TOO_SHORT),
        (long_name.as_str(), "bob@example.com", "validPa$$word", validator::TOO_LONG),
        ("Bob", long_email.as_str(), "validPa$$word", validator::TOO_LONG),
        ("Bob", "bob@example.com", long_password.as_str(), validator::TOO_LONG),
    ];

    for (name, email, password, message) in cases {
        let response = app.signup(name, email, password).await;
        assert_eq!(
            response.status,
            StatusCode::UNPROCESSABLE_ENTITY,
            "{name}/{email}/{password}"
        );
        assert!(response.body.contains(message), "missing {message:?}");
        assert!(!response.body.contains("validPa$$word"), "password echoed");
    }
}

#[tokio::test]
async fn login_validation_errors_rerender_form() {
    let mut app = TestApp::new();
    let long_email = format!("{}@example.com", "c".repeat(89));
    let long_password = "p".repeat(101);

    let cases = [
        ("", "pa$$word", validator::BLANK),
        ("carol@", "pa$$word", validator::INVALID_EMAIL),
        (long_email.as_str(), "pa$$word", validator::TOO_LONG),
        ("carol@example.com", long_password.as_str(), validator::TOO_LONG),
    ];

    for (email, password, message) in cases {
        let response = app.login(email, password).await;
        assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY, "{email}");
        assert!(response.body.contains(message), "missing {message:?}");
        assert!(!response.body.contains(long_password.as_str()), "password echoed");
    }
    assert!(app.session_value(USER_NAME).await.is_none());
}

#[tokio::test]
async fn oversized_user_form_is_rejected() {
    let mut app = TestApp::new();
    let token = app.csrf_token("/user/signup").await;
    let name = "a".repeat(5000);

    let response = app
        .post_form(
            "/user/signup",
            &[
                ("csrf_token", token.as_str()),
                ("name", name.as_str()),
                ("email", "bob@example.com"),
                ("password", "validPa$$word"),
            ],
        )
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn user_form_body_is_capped_before_csrf_check() {
    let mut app = TestApp::new();
    let token = app.csrf_token("/user/login").await;

    let polled = Arc::new(AtomicUsize::new(0));
    let counter = polled.clone();
    let prefix = format!("csrf_token={token}&email=alice%40example.com&pad=");
    let chunks = std::iter::once(prefix.into_bytes())
        .chain(std::iter::repeat(vec![b'a'; 1024]).take(256));
    let body = stream::iter(chunks)
        .inspect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .map(Ok::<_, std::io::Error>);

    let response = app
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/user/login")
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded"),
            Body::from_stream(body),
        )
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    let read = polled.load(Ordering::SeqCst);
    assert!(read <= 6, "read {read} chunks of an oversized body");
}

#[tokio::test]
async fn non_form_body_is_rejected() {
    let mut app = TestApp::new();
    let token = app.csrf_token("/user/login").await;
    let response = app
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/user/login")
                .header(CONTENT_TYPE, "text/plain")
                .header("X-CSRF-Token", token),
            Body::from("email=alice@example.com"),
        )
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn alice_signs_up_logs_in_and_out() {
    let mut app = TestApp::new();

    // First signup succeeds and flashes on the login page.
    let response = app.signup("Alice", "alice@example.com", "pa$$word").await;
    assert_eq!(response.status, StatusCode::SEE_OTHER);
    assert_eq!(response.location(), Some("/user/login"));

    let login_page = app.get("/user/login").await;
    assert!(login_page
        .body
        .contains("Your signup was successful. Please log in."));

    // Duplicate email.
    let response = app.signup("Alice", "Alice@Example.com", "pa$$word").await;
    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(response.body.contains(validator::DUPLICATE_EMAIL));

    // Wrong password and unknown email look the same.
    for (email, password) in [
        ("alice@example.com", "wrongPa$$word"),
        ("nobody@example.com", "pa$$word"),
    ] {
        let response = app.login(email, password).await;
        assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(response.body.contains(validator::INVALID_CREDENTIALS));
    }

    // Successful login renews the token.
    let _ = app.csrf_token("/user/login").await;
    let anonymous_token = app.cookie.clone().expect("anonymous session");
    let response = app.login("alice@example.com", "pa$$word").await;
    assert_eq!(response.status, StatusCode::SEE_OTHER);
    assert_eq!(response.location(), Some("/snippet/create"));

    let authenticated_token = app.cookie.clone().expect("authenticated session");
    assert_ne!(anonymous_token, authenticated_token);
    assert!(app
        .sessions
        .find(&hash_token(&anonymous_token))
        .await
        .expect("memory store")
        .is_none());
    assert_eq!(
        app.session_value(USER_NAME).await,
        Some(serde_json::json!("Alice"))
    );

    // Protected page is reachable and not cacheable.
    let response = app.get("/snippet/create").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.headers.get(CACHE_CONTROL).and_then(|v| v.to_str().ok()),
        Some("no-store")
    );
    assert!(response.body.contains("Logout (Alice)"));
    assert!(response.body.contains("value='365' checked"));

    // Logout renews again and drops the user.
    let token = extract_csrf_token(&response.body).expect("csrf token");
    let response = app
        .post_form("/user/logout", &[("csrf_token", token.as_str())])
        .await;
    assert_eq!(response.status, StatusCode::SEE_OTHER);
    assert_eq!(response.location(), Some("/"));
    assert_ne!(app.cookie.as_deref(), Some(authenticated_token.as_str()));
    assert_eq!(app.session_value(USER_NAME).await, None);

    let home = app.get("/").await;
    assert!(home.body.contains("You&#x27;ve been logged out successfully!"));
    assert!(home.body.contains("href='/user/login'"));

    let response = app.get("/snippet/create").await;
    assert_eq!(response.status, StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn create_snippet_flow() {
    let mut app = TestApp::new();
    app.signup("Alice", "alice@example.com", "pa$$word").await;
    app.login("alice@example.com", "pa$$word").await;

    let token = app.csrf_token("/snippet/create").await;

    let response = app
        .post_form(
            "/snippet/create",
            &[
                ("csrf_token", token.as_str()),
                ("title", ""),
                ("content", "Climb Mount Fuji"),
                ("expires", "30"),
            ],
        )
        .await;
    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(response.body.contains(validator::BLANK));
    assert!(response.body.contains(validator::NOT_PERMITTED));
    assert!(response.body.contains("Climb Mount Fuji"));

    let response = app
        .post_form(
            "/snippet/create",
            &[
                ("csrf_token", token.as_str()),
                ("title", "O snail"),
                ("content", "Climb Mount Fuji"),
                ("expires", "7"),
            ],
        )
        .await;
    assert_eq!(response.status, StatusCode::SEE_OTHER);
    assert_eq!(response.location(), Some("/snippet/view/2"));
    assert_eq!(
        app.session_value(crate::snippetbox::FLASH).await,
        Some(serde_json::json!("Snippet successfully created!"))
    );

    let response = app
        .post_form(
            "/snippet/create",
            &[
                ("csrf_token", token.as_str()),
                ("title", "O snail"),
                ("content", "Climb Mount Fuji"),
                ("expires", "soon"),
            ],
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn deleted_user_is_logged_out() {
    let mut app = TestApp::new();
    app.signup("Alice", "alice@example.com", "pa$$word").await;
    let response = app.login("alice@example.com", "pa$$word").await;
    assert_eq!(response.status, StatusCode::SEE_OTHER);

    app.users.delete(1);

    let response = app.get("/snippet/create").await;
    assert_eq!(response.status, StatusCode::SEE_OTHER);
    assert_eq!(response.location(), Some("/user/login"));
    assert_eq!(
        app.session_value(crate::snippetbox::AUTHENTICATED_USER_ID).await,
        None
    );
}
