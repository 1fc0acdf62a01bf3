//! Form validation helpers.

use regex::Regex;
use serde::Serialize;
use std::{collections::HashMap, sync::LazyLock};

pub const BLANK: &str = "This field cannot be blank";
pub const TOO_LONG: &str = "This field cannot be more than 100 characters long";
pub const TOO_SHORT: &str = "This field must be at least 8 characters long";
pub const INVALID_EMAIL: &str = "This field must be a valid email address";
pub const DUPLICATE_EMAIL: &str = "Email address is already in use";
pub const INVALID_CREDENTIALS: &str = "Email or password is incorrect";
pub const NOT_PERMITTED: &str = "This field must equal 1, 7 or 365";

static EMAIL_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());

/// Accumulates field-scoped and form-scoped errors for one submission.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Validator {
    pub field_errors: HashMap<String, String>,
    pub non_field_errors: Vec<String>,
}

impl Validator {
    #[must_use]
    pub fn valid(&self) -> bool {
        self.field_errors.is_empty() && self.non_field_errors.is_empty()
    }

    /// Record an error for `key`; the first error for a field wins.
    pub fn add_field_error(&mut self, key: &str, message: &str) {
        self.field_errors
            .entry(key.to_string())
            .or_insert_with(|| message.to_string());
    }

    pub fn add_non_field_error(&mut self, message: &str) {
        self.non_field_errors.push(message.to_string());
    }

    pub fn check_field(&mut self, ok: bool, key: &str, message: &str) {
        if !ok {
            self.add_field_error(key, message);
        }
    }
}

#[must_use]
pub fn not_blank(value: &str) -> bool {
    !value.trim().is_empty()
}

/// Counts characters, not bytes.
#[must_use]
pub fn max_chars(value: &str, n: usize) -> bool {
    value.chars().count() <= n
}

#[must_use]
pub fn min_chars(value: &str, n: usize) -> bool {
    value.chars().count() >= n
}

#[must_use]
pub fn matches_email(email: &str) -> bool {
    EMAIL_RE.as_ref().is_some_and(|re| re.is_match(email))
}

#[must_use]
pub fn permitted_value<T: PartialEq>(value: &T, permitted: &[T]) -> bool {
    permitted.contains(value)
}

/// Emails are compared and stored trimmed and lowercased.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
