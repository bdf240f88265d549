use crate::auth::{
    error::AuthError,
    provider::{IdentityProvider, LoginReply},
    types::{Credentials, PendingAuthentication, Session},
};
use secrecy::ExposeSecret;
use std::{sync::Arc, time::Duration};
use tokio::time::timeout;
use tracing::{debug, instrument};

/// Result of a password check that did not fail.
#[derive(Debug, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Password accepted, second factor outstanding.
    MfaRequired(PendingAuthentication),
    /// Password accepted and the account has no second factor.
    Authenticated(Session),
}

/// Checks username and password against the identity provider.
///
/// Safe to retry; it keeps no state between calls.
#[derive(Debug)]
pub struct CredentialValidator<P> {
    provider: Arc<P>,
    timeout: Duration,
}

impl<P: IdentityProvider> CredentialValidator<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Consumes the credentials; they are dropped before this returns.
    ///
    /// # Errors
    /// [`AuthError::InvalidCredentials`] for an unknown user or wrong password
    /// (also for blank input, without a network call), [`AuthError::Timeout`]
    /// when the provider does not answer in time, [`AuthError::Unavailable`]
    /// for any other provider failure.
    #[instrument(skip_all, fields(identifier = %credentials.identifier()))]
    pub async fn validate(&self, credentials: Credentials) -> Result<LoginOutcome, AuthError> {
        let identifier = credentials.identifier().trim();

        if identifier.is_empty() || credentials.secret().expose_secret().is_empty() {
            debug!("blank credentials rejected locally");
            return Err(AuthError::InvalidCredentials);
        }

        let reply = timeout(
            self.timeout,
            self.provider.login(identifier, credentials.secret()),
        )
        .await
        .map_err(|_| AuthError::Timeout)??;

        Ok(match reply {
            LoginReply::MfaRequired => {
                LoginOutcome::MfaRequired(PendingAuthentication::new(identifier))
            }
            LoginReply::Authenticated { identity, token } => {
                LoginOutcome::Authenticated(Session::issue(identity, token))
            }
        })
    }
}
