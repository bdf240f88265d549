//! Authenticated console API client.
//!
//! Every call is checked against the gate before anything leaves the process,
//! carries the current bearer token, and reports a `401` back to the
//! controller so the session that sent it is torn down.

use crate::{
    auth::{
        provider::{IdentityProvider, REQUEST_ID_HEADER},
        store::SessionStore,
        valid_code, SessionController,
    },
    gate::{self, Capability},
    APP_USER_AGENT,
};
use reqwest::{Client, Method, StatusCode};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use ulid::Ulid;
use url::Url;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Access denied: {0} is not granted to this session")]
    Forbidden(Capability),
    #[error("Session expired or invalid, please log in again")]
    Unauthorized,
    #[error("timeout")]
    Timeout,
    #[error("request failed: {0}")]
    Transport(String),
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("Verification code must be exactly 6 digits")]
    MalformedCode,
}

/// Authenticator enrollment material returned by `setup-mfa`. The secret is
/// meant for the user's device and is never logged.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MfaEnrollment {
    #[serde(alias = "secretKey")]
    pub secret: String,
    #[serde(alias = "qrCodeUrl")]
    pub qr_code_url: String,
}

impl std::fmt::Debug for MfaEnrollment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MfaEnrollment")
            .field("secret", &"[REDACTED]")
            .field("qr_code_url", &self.qr_code_url)
            .finish()
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err.to_string())
        }
    }
}

pub struct ConsoleApi<P, S> {
    client: Client,
    base_url: Url,
    controller: Arc<SessionController<P, S>>,
}

impl<P: IdentityProvider, S: SessionStore> ConsoleApi<P, S> {
    /// # Errors
    /// Returns [`ApiError::Transport`] if the HTTP client cannot be built.
    pub fn new(
        base_url: Url,
        timeout: Duration,
        controller: Arc<SessionController<P, S>>,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url,
            controller,
        })
    }

    /// Virtual machine inventory.
    ///
    /// # Errors
    /// See [`ApiError`].
    pub async fn vms(&self) -> Result<Value, ApiError> {
        self.call(Method::GET, &["vms"], Some(Capability::ViewVms), None)
            .await
    }

    /// Requests SSH access to one virtual machine.
    ///
    /// # Errors
    /// See [`ApiError`].
    pub async fn vm_access(&self, vm_id: &str) -> Result<Value, ApiError> {
        self.call(
            Method::POST,
            &["vms", vm_id, "access"],
            Some(Capability::SshConnect),
            None,
        )
        .await
    }

    /// # Errors
    /// See [`ApiError`].
    pub async fn logs(&self) -> Result<Value, ApiError> {
        self.call(Method::GET, &["logs"], Some(Capability::ViewLogs), None)
            .await
    }

    /// # Errors
    /// See [`ApiError`].
    pub async fn alerts(&self) -> Result<Value, ApiError> {
        self.call(
            Method::GET,
            &["logs", "alerts"],
            Some(Capability::ViewAlerts),
            None,
        )
            .await
    }

    /// Profile of the signed-in user; any session may read it.
    ///
    /// # Errors
    /// See [`ApiError`].
    pub async fn profile(&self) -> Result<Value, ApiError> {
        self.call(Method::GET, &["users", "profile"], None, None)
            .await
    }

    /// Starts authenticator enrollment for the signed-in user. The server
    /// stores a fresh secret but keeps MFA off until [`Self::enable_mfa`].
    ///
    /// # Errors
    /// See [`ApiError`].
    pub async fn setup_mfa(&self) -> Result<MfaEnrollment, ApiError> {
        let reply = self
            .call(
                Method::POST,
                &["auth", "setup-mfa"],
                Some(Capability::ManageSettings),
                None,
            )
            .await?;

        serde_json::from_value(reply).map_err(|err| ApiError::Decode(err.to_string()))
    }

    /// Confirms enrollment with a code from the new authenticator. Returns
    /// the server's verdict.
    ///
    /// # Errors
    /// [`ApiError::MalformedCode`] without a network call when `code` is not
    /// six digits; otherwise see [`ApiError`].
    pub async fn enable_mfa(&self, code: &str) -> Result<bool, ApiError> {
        if !valid_code(code) {
            return Err(ApiError::MalformedCode);
        }

        let reply = self
            .call(
                Method::POST,
                &["auth", "enable-mfa"],
                Some(Capability::ManageSettings),
                Some(json!({ "token": code })),
            )
            .await?;

        serde_json::from_value(reply).map_err(|err| ApiError::Decode(err.to_string()))
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::Transport(format!("invalid base URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    #[instrument(skip(self, segments, capability, body), fields(path = %segments.join("/")))]
    async fn call(
        &self,
        method: Method,
        segments: &[&str],
        capability: Option<Capability>,
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        let (role, token) = self
            .controller
            .authorization()
            .map_err(|_| ApiError::Unauthorized)?;

        if let Some(capability) = capability {
            if !gate::can_access(Some(role), capability) {
                debug!(%capability, %role, "denied before sending");
                return Err(ApiError::Forbidden(capability));
            }
        }

        let url = self.url(segments)?;
        let request_id = Ulid::new().to_string();

        debug!(%url, %request_id, "console request");

        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(token.expose_secret())
            .header(REQUEST_ID_HEADER, request_id);
        if let Some(body) = &body {
            request = request.json(body);
        }

        let response = request.send().await?;

        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            if self.controller.invalidate_token(token.expose_secret()) {
                warn!("server rejected the session token, signed out");
            }
            return Err(ApiError::Unauthorized);
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|err| ApiError::Decode(err.to_string()))
    }
}
