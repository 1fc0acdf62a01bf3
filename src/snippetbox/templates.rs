//! Handlebars page registry.
//!
//! All templates are compiled into the binary and registered once at startup.
//! Pages fill the `title` and `main` inline partials of the `base` layout.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use handlebars::{handlebars_helper, Handlebars};
use serde::Serialize;
use std::sync::Arc;

use crate::models::Snippet;

const BASE: &str = include_str!("../../ui/html/base.hbs");
const NAV: &str = include_str!("../../ui/html/partials/nav.hbs");

const PAGES: &[(&str, &str)] = &[
    ("home", include_str!("../../ui/html/pages/home.hbs")),
    ("view", include_str!("../../ui/html/pages/view.hbs")),
    ("create", include_str!("../../ui/html/pages/create.hbs")),
    ("signup", include_str!("../../ui/html/pages/signup.hbs")),
    ("login", include_str!("../../ui/html/pages/login.hbs")),
];

/// Values every page can rely on.
#[derive(Debug, Default, Serialize)]
pub struct TemplateData {
    pub current_year: i32,
    pub flash: Option<String>,
    pub is_authenticated: bool,
    pub csrf_token: String,
    pub user_name: Option<String>,
    pub form: Option<serde_json::Value>,
    pub snippet: Option<Snippet>,
    pub snippets: Vec<Snippet>,
}

/// Format a timestamp as `02 Jan 2006 at 15:04` in UTC.
#[must_use]
pub fn human_date(value: &DateTime<Utc>) -> String {
    value.format("%d %b %Y at %H:%M").to_string()
}

handlebars_helper!(human_date_helper: |value: str| {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| human_date(&parsed.with_timezone(&Utc)))
        .unwrap_or_default()
});

#[derive(Clone)]
pub struct Templates {
    registry: Arc<Handlebars<'static>>,
}

impl Templates {
    /// Compile the layout, partials and every page.
    ///
    /// # Errors
    /// Returns an error if a template fails to parse.
    pub fn new() -> Result<Self> {
        let mut registry = Handlebars::new();

        registry
            .register_partial("base", BASE)
            .context("failed to register base layout")?;
        registry
            .register_partial("nav", NAV)
            .context("failed to register nav partial")?;

        for (name, source) in PAGES {
            registry
                .register_template_string(name, source)
                .with_context(|| format!("failed to register template {name}"))?;
        }

        registry.register_helper("human_date", Box::new(human_date_helper));

        Ok(Self {
            registry: Arc::new(registry),
        })
    }

    #[must_use]
    pub fn has_page(&self, page: &str) -> bool {
        self.registry.has_template(page)
    }

    /// Render a page into a string.
    ///
    /// # Errors
    /// Returns an error if the page does not exist or rendering fails.
    pub fn render<T: Serialize>(&self, page: &str, data: &T) -> Result<String> {
        self.registry
            .render(page, data)
            .with_context(|| format!("failed to render template {page}"))
    }
}
