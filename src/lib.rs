//! # Opsgate (operator console core)
//!
//! `opsgate` is the authentication and authorization core of a role-based
//! operator console. It owns the login lifecycle (password, then a mandatory
//! time-based second factor), the persisted session, and the static mapping
//! from role to reachable capabilities.
//!
//! ## Session lifecycle
//!
//! [`auth::SessionController`] is the only writer of session state. It accepts
//! credential and code submissions, publishes [`auth::AuthSnapshot`] values to
//! subscribers, and writes the session through to a [`auth::SessionStore`]
//! before any transition into or out of the authenticated state is visible.
//!
//! ## Authorization
//!
//! [`gate`] is a pure function of the current role. It is re-evaluated on every
//! navigation or action; nothing caches a verdict across session changes. A
//! missing role denies everything, so "not logged in" and "not allowed" look
//! the same to callers.
//!
//! ## Downstream calls
//!
//! [`api::ConsoleApi`] attaches the bearer token to console requests and turns
//! any `401` into an invalidation of the session that sent it.

pub mod api;
pub mod auth;
pub mod cli;
pub mod gate;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
