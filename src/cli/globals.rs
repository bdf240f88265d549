use crate::auth::{
    ControllerConfig, FileSessionStore, HttpIdentityProvider, SessionController,
};
use anyhow::{Context, Result};
use std::{path::PathBuf, time::Duration};
use url::Url;

pub type Controller = SessionController<HttpIdentityProvider, FileSessionStore>;

/// Settings shared by every subcommand.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub api_url: Url,
    pub timeout: Duration,
    pub session_file: PathBuf,
    pub session_ttl: Option<Duration>,
    pub max_mfa_attempts: u32,
}

impl GlobalArgs {
    #[must_use]
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig::new()
            .with_request_timeout(self.timeout)
            .with_session_ttl(self.session_ttl)
            .with_max_mfa_attempts(self.max_mfa_attempts)
    }

    /// Controller rehydrated from the session file.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn controller(&self) -> Result<Controller> {
        let provider = HttpIdentityProvider::new(self.api_url.clone(), self.timeout)
            .context("failed to build identity provider client")?;

        Ok(SessionController::new(
            provider,
            FileSessionStore::new(&self.session_file),
            self.controller_config(),
        ))
    }
}
