//! # Snippetbox
//!
//! `snippetbox` is a server-rendered web application for pasting and sharing
//! short text snippets. Users sign up, log in, create snippets and view them.
//!
//! ## Sessions
//!
//! Sessions are server-side: the browser only holds an opaque, random token in
//! an `HttpOnly` cookie, and the store keeps the SHA-256 hash of that token
//! next to a small key/value bag. Tokens are replaced on every privilege change
//! (login and logout) so a token planted before authentication never becomes
//! an authenticated one.
//!
//! ## Forms
//!
//! Every state-changing request must carry the per-session CSRF token, either
//! as the `csrf_token` form field or the `X-CSRF-Token` header. Requests without
//! a matching token are rejected before any handler runs.
//!
//! ## Credentials
//!
//! Passwords are hashed with bcrypt. Login failures never reveal whether the
//! email exists: unknown emails and wrong passwords produce the same error.

pub mod cli;
pub mod models;
pub mod snippetbox;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
