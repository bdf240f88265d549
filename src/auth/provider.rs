//! Identity provider client. The provider owns the user directory and the TOTP
//! secrets; this side only ships credentials and codes and maps the replies onto
//! [`AuthError`]. Passwords and tokens are never logged.

use crate::{
    auth::{
        error::AuthError,
        types::{
            ErrorResponse, Identity, LoginRequest, LoginResponse, TokenResponse,
            VerifyMfaRequest,
        },
    },
    APP_USER_AGENT,
};
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use std::{future::Future, time::Duration};
use tracing::{debug, instrument, warn};
use ulid::Ulid;
use url::Url;

pub const LOGIN_PATH: &str = "/auth/login";
pub const VERIFY_MFA_PATH: &str = "/auth/verify-mfa";
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Reply to a password check.
#[derive(Debug)]
pub enum LoginReply {
    MfaRequired,
    Authenticated {
        identity: Identity,
        token: SecretString,
    },
}

/// Remote side of the login flow.
pub trait IdentityProvider: Send + Sync {
    fn login(
        &self,
        identifier: &str,
        secret: &SecretString,
    ) -> impl Future<Output = Result<LoginReply, AuthError>> + Send;

    fn verify_mfa(
        &self,
        identifier: &str,
        code: &str,
    ) -> impl Future<Output = Result<(Identity, SecretString), AuthError>> + Send;
}

/// Builds `{base}/{path}` without dropping a base path such as `/api/v1`.
#[must_use]
pub fn endpoint_url(base: &Url, path: &str) -> String {
    format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Maps a transport failure onto the auth taxonomy.
pub(crate) fn transport_error(err: &reqwest::Error) -> AuthError {
    if err.is_timeout() {
        AuthError::Timeout
    } else {
        AuthError::Unavailable(err.to_string())
    }
}

#[derive(Clone, Debug)]
pub struct HttpIdentityProvider {
    client: Client,
    base_url: Url,
}

impl HttpIdentityProvider {
    /// # Errors
    /// Returns [`AuthError::Unavailable`] if the HTTP client cannot be built.
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, AuthError> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|err| AuthError::Unavailable(format!("failed to build client: {err}")))?;

        Ok(Self { client, base_url })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn post<B: serde::Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Response, AuthError> {
        let url = endpoint_url(&self.base_url, path);
        let request_id = Ulid::new().to_string();

        debug!(%url, %request_id, "identity provider request");

        self.client
            .post(&url)
            .header(REQUEST_ID_HEADER, request_id)
            .json(body)
            .send()
            .await
            .map_err(|err| transport_error(&err))
    }
}

/// Reads the server message out of an error body, if any.
async fn error_message(response: Response) -> String {
    let status = response.status();
    let body: ErrorResponse = response.json().await.unwrap_or_default();
    body.message
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string())
}

impl IdentityProvider for HttpIdentityProvider {
    #[instrument(skip(self, secret))]
    async fn login(&self, identifier: &str, secret: &SecretString) -> Result<LoginReply, AuthError> {
        let request = LoginRequest {
            username: identifier,
            password: secret.expose_secret(),
        };

        let response = self.post(LOGIN_PATH, &request).await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            debug!("credentials rejected");
            return Err(AuthError::InvalidCredentials);
        }

        if !status.is_success() {
            let message = error_message(response).await;
            warn!("login failed: {status} {message}");
            return Err(AuthError::Unavailable(format!("{status}: {message}")));
        }

        let body: LoginResponse = response
            .json()
            .await
            .map_err(|err| AuthError::Unavailable(format!("malformed login response: {err}")))?;

        if body.require_mfa {
            return Ok(LoginReply::MfaRequired);
        }

        match (body.token, body.user) {
            (Some(token), Some(identity)) => Ok(LoginReply::Authenticated {
                identity,
                token: SecretString::from(token),
            }),
            _ => Err(AuthError::Unavailable(
                "login response missing token or user".to_string(),
            )),
        }
    }

    #[instrument(skip(self, code))]
    async fn verify_mfa(
        &self,
        identifier: &str,
        code: &str,
    ) -> Result<(Identity, SecretString), AuthError> {
        let request = VerifyMfaRequest {
            username: identifier,
            totp_code: code,
        };

        let response = self.post(VERIFY_MFA_PATH, &request).await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            debug!("verification code rejected");
            return Err(AuthError::InvalidMfaCode);
        }

        if !status.is_success() {
            let message = error_message(response).await;
            warn!("MFA verification failed: {status} {message}");
            return Err(AuthError::Unavailable(format!("{status}: {message}")));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|err| AuthError::Unavailable(format!("malformed verify response: {err}")))?;

        Ok((body.user, SecretString::from(body.token)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::types::Role;
    use serde_json::json;
    use std::net::TcpListener;
    use wiremock::matchers::{body_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    fn provider(server: &MockServer) -> HttpIdentityProvider {
        let base = Url::parse(&format!("{}/api/v1", server.uri())).unwrap();
        HttpIdentityProvider::new(base, Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn endpoint_url_keeps_base_path() {
        let base = Url::parse("http://localhost:8000/api/v1/").unwrap();
        assert_eq!(
            endpoint_url(&base, "/auth/login"),
            "http://localhost:8000/api/v1/auth/login"
        );
    }

    #[tokio::test]
    async fn login_reports_mfa_required() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/auth/login"))
            .and(header_exists(REQUEST_ID_HEADER))
            .and(body_json(json!({"username": "admin_user", "password": "admin123"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"requireMfa": true, "message": "MFA required"})),
            )
            .mount(&server)
            .await;

        let reply = provider(&server)
            .login("admin_user", &SecretString::from("admin123".to_string()))
            .await
            .unwrap();
        assert!(matches!(reply, LoginReply::MfaRequired));
    }

    #[tokio::test]
    async fn login_without_mfa_returns_identity_and_token() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token": "jwt-token",
                "user": {"id": "3", "username": "soc_user", "email": "soc@example.com", "role": "soc"}
            })))
            .mount(&server)
            .await;

        let reply = provider(&server)
            .login("soc_user", &SecretString::from("soc123".to_string()))
            .await
            .unwrap();
        match reply {
            LoginReply::Authenticated { identity, token } => {
                assert_eq!(identity.role, Role::Soc);
                assert_eq!(token.expose_secret(), "jwt-token");
            }
            LoginReply::MfaRequired => panic!("expected a session"),
        }
    }

    #[tokio::test]
    async fn login_401_is_generic_invalid_credentials() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/auth/login"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"message": "Unknown user x"})),
            )
            .mount(&server)
            .await;

        let err = provider(&server)
            .login("x", &SecretString::from("wrong".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);
        assert_eq!(err.to_string(), "Invalid credentials");
    }

    #[tokio::test]
    async fn login_server_error_is_unavailable() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/auth/login"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({"message": "down"})))
            .mount(&server)
            .await;

        let err = provider(&server)
            .login("admin_user", &SecretString::from("admin123".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unavailable(message) if message.contains("down")));
    }

    #[tokio::test]
    async fn slow_provider_maps_to_timeout() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/auth/verify-mfa"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let base = Url::parse(&format!("{}/api/v1", server.uri())).unwrap();
        let provider = HttpIdentityProvider::new(base, Duration::from_millis(100)).unwrap();
        let err = provider.verify_mfa("admin_user", "123456").await.unwrap_err();
        assert_eq!(err, AuthError::Timeout);
    }

    #[tokio::test]
    async fn verify_mfa_maps_401_and_success() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/auth/verify-mfa"))
            .and(body_json(json!({"username": "admin_user", "totpCode": "123456"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token": "mock-jwt-token",
                "user": {"id": "1", "username": "admin_user", "email": "admin@example.com", "role": "admin"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/verify-mfa"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"message": "Invalid verification code"})),
            )
            .with_priority(10)
            .mount(&server)
            .await;

        let provider = provider(&server);
        let (identity, token) = provider.verify_mfa("admin_user", "123456").await.unwrap();
        assert_eq!(identity.role, Role::Admin);
        assert_eq!(token.expose_secret(), "mock-jwt-token");

        let err = provider.verify_mfa("admin_user", "000000").await.unwrap_err();
        assert_eq!(err, AuthError::InvalidMfaCode);
    }
}
