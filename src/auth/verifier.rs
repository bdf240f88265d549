use crate::auth::{
    error::AuthError,
    provider::IdentityProvider,
    types::{PendingAuthentication, Session},
};
use regex::Regex;
use std::{sync::Arc, time::Duration};
use tokio::time::timeout;
use tracing::{debug, instrument};

/// A TOTP code is exactly six ASCII digits.
#[must_use]
pub fn valid_code(code: &str) -> bool {
    Regex::new(r"^[0-9]{6}$").is_ok_and(|re| re.is_match(code))
}

/// Checks a second-factor code for a login whose password was accepted.
///
/// Taking a [`PendingAuthentication`] makes "no pending login" unrepresentable
/// here. A rejection leaves the pending login alone; whether to retry is the
/// controller's call.
#[derive(Debug)]
pub struct SecondFactorVerifier<P> {
    provider: Arc<P>,
    timeout: Duration,
}

impl<P: IdentityProvider> SecondFactorVerifier<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// # Errors
    /// [`AuthError::MalformedMfaCode`] when the code is not six digits (no
    /// network call), [`AuthError::InvalidMfaCode`] when the provider rejects
    /// it, [`AuthError::Timeout`] or [`AuthError::Unavailable`] otherwise.
    #[instrument(skip(self, code), fields(identifier = %pending.identifier()))]
    pub async fn verify(
        &self,
        pending: &PendingAuthentication,
        code: &str,
    ) -> Result<Session, AuthError> {
        if !valid_code(code) {
            debug!("malformed code rejected locally");
            return Err(AuthError::MalformedMfaCode);
        }

        let (identity, token) = timeout(
            self.timeout,
            self.provider.verify_mfa(pending.identifier(), code),
        )
        .await
        .map_err(|_| AuthError::Timeout)??;

        Ok(Session::issue(identity, token))
    }
}
