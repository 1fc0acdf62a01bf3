use crate::models::{PgSnippetStore, PgUserStore, SnippetStore, UserStore};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, MatchedPath},
    http::{
        header::{
            CONTENT_SECURITY_POLICY, REFERRER_POLICY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS,
            X_XSS_PROTECTION,
        },
        HeaderName, HeaderValue, Request,
    },
    middleware::from_fn,
    routing::{get, post},
    Extension, Router,
};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::PropagateRequestIdLayer,
    services::ServeDir,
    set_header::{SetRequestHeaderLayer, SetResponseHeaderLayer},
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;

pub mod csrf;
pub mod handlers;
pub mod middleware;
pub mod session;
pub mod templates;
pub mod validator;

use self::{
    handlers::{snippets, users},
    session::{PgSessionStore, SessionConfig, SessionManager, SessionStore},
    templates::Templates,
};

/// Session key holding the id of the logged in user.
pub const AUTHENTICATED_USER_ID: &str = "authenticatedUserID";
pub const USER_NAME: &str = "userName";
pub const FLASH: &str = "flash";

/// Largest accepted form body on the user routes.
pub const MAX_USER_FORM_BYTES: usize = 4096;

const REQUEST_ID: &str = "x-request-id";
const CONTENT_SECURITY_POLICY_VALUE: &str =
    "default-src 'self'; style-src 'self' fonts.googleapis.com; font-src fonts.gstatic.com";

/// Dependencies shared by every handler.
#[derive(Clone)]
pub struct Application {
    pub users: Arc<dyn UserStore>,
    pub snippets: Arc<dyn SnippetStore>,
    pub templates: Templates,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    static_dir: PathBuf,
    bcrypt_cost: u32,
    session: SessionConfig,
    session_cleanup_interval: Duration,
}

impl ServerConfig {
    #[must_use]
    pub fn new(static_dir: PathBuf) -> Self {
        Self {
            static_dir,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            session: SessionConfig::new(),
            session_cleanup_interval: Duration::from_secs(300),
        }
    }

    #[must_use]
    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    #[must_use]
    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    #[must_use]
    pub fn with_session_cleanup_interval(mut self, interval: Duration) -> Self {
        self.session_cleanup_interval = interval;
        self
    }
}

/// Build the application router.
///
/// Dynamic routes run session load/save, the CSRF guard and authentication;
/// `/snippet/create` and `/user/logout` additionally require a logged in user.
/// User routes cap form bodies at [`MAX_USER_FORM_BYTES`], the CSRF guard
/// included.
pub fn router(app: Application, sessions: SessionManager, static_dir: &Path) -> Router {
    let snippet_routes = Router::new()
        .route("/", get(snippets::home))
        .route("/snippet/view/:id", get(snippets::view))
        .merge(
            Router::new()
                .route(
                    "/snippet/create",
                    get(snippets::create).post(snippets::create_post),
                )
                .route_layer(from_fn(middleware::require_authentication)),
        );

    let user_routes = Router::new()
        .route(
            "/user/signup",
            get(users::signup)
                .post(users::signup_post)
                .layer(DefaultBodyLimit::max(MAX_USER_FORM_BYTES)),
        )
        .route(
            "/user/login",
            get(users::login)
                .post(users::login_post)
                .layer(DefaultBodyLimit::max(MAX_USER_FORM_BYTES)),
        )
        .merge(
            Router::new()
                .route(
                    "/user/logout",
                    post(users::logout_post).layer(DefaultBodyLimit::max(MAX_USER_FORM_BYTES)),
                )
                .route_layer(from_fn(middleware::require_authentication)),
        );

    let dynamic = with_dynamic_layers(snippet_routes).merge(
        with_dynamic_layers(user_routes)
            .route_layer(Extension(csrf::FormLimit(MAX_USER_FORM_BYTES))),
    );

    let secure_headers = ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(CONTENT_SECURITY_POLICY_VALUE),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            REFERRER_POLICY,
            HeaderValue::from_static("origin-when-cross-origin"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            X_FRAME_OPTIONS,
            HeaderValue::from_static("deny"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            X_XSS_PROTECTION,
            HeaderValue::from_static("0"),
        ));

    dynamic
        .nest_service("/static", ServeDir::new(static_dir))
        .fallback(handlers::fallback)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static(REQUEST_ID),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    REQUEST_ID,
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(secure_headers)
                .layer(CatchPanicLayer::custom(middleware::handle_panic))
                .layer(Extension(app))
                .layer(Extension(sessions)),
        )
}

fn with_dynamic_layers(routes: Router) -> Router {
    routes.route_layer(
        ServiceBuilder::new()
            .layer(from_fn(session::load_and_save))
            .layer(from_fn(csrf::guard))
            .layer(from_fn(middleware::authenticate)),
    )
}

/// Start the server
/// # Errors
/// Return error if the database is unreachable, templates fail to compile or
/// the listener cannot be bound
pub async fn new(port: u16, dsn: &SecretString, config: ServerConfig) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn.expose_secret())
        .await
        .context("Failed to connect to database")?;

    let templates = Templates::new()?;

    let app = Application {
        users: Arc::new(PgUserStore::new(pool.clone()).with_bcrypt_cost(config.bcrypt_cost)),
        snippets: Arc::new(PgSnippetStore::new(pool.clone())),
        templates,
    };

    let store: Arc<dyn SessionStore> = Arc::new(PgSessionStore::new(pool.clone()));
    let cleanup = session::spawn_cleanup(store.clone(), config.session_cleanup_interval);
    let sessions = SessionManager::new(store, config.session);

    let app = router(app, sessions, &config.static_dir)
        .route(
            "/health",
            get(handlers::health).options(handlers::health),
        )
        .layer(Extension(pool));

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cleanup.abort();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {err}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Gracefully shutdown");
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
