//! Login lifecycle: credentials, second factor, and the persisted session.
//!
//! Flow Overview:
//! 1) [`CredentialValidator`] checks username and password with the
//!    [`IdentityProvider`] and yields a [`PendingAuthentication`] when a code is
//!    still owed.
//! 2) [`SecondFactorVerifier`] exchanges the pending login and a six-digit code
//!    for a [`Session`].
//! 3) [`SessionController`] drives both steps, persists the session through a
//!    [`SessionStore`], and publishes [`AuthSnapshot`] values.
//!
//! Passwords and tokens travel as `SecretString` and never reach the logs.

pub mod controller;
pub mod error;
pub mod provider;
pub mod store;
pub mod types;
pub mod validator;
pub mod verifier;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::{AuthSnapshot, AuthState, ControllerConfig, LoginStep, SessionController};
pub use error::{AuthError, StoreError};
pub use provider::{HttpIdentityProvider, IdentityProvider, LoginReply};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};
pub use types::{Credentials, Identity, PendingAuthentication, Role, Session};
pub use validator::{CredentialValidator, LoginOutcome};
pub use verifier::{valid_code, SecondFactorVerifier};
