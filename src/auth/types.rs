//! Identity, credential, and session types shared by the auth flow, plus the
//! request and response payloads of the identity provider. Credentials and
//! bearer tokens are wrapped in [`SecretString`] so they never reach logs.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    str::FromStr,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Console roles. Each role maps to a fixed capability set in [`crate::gate`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Developer,
    Soc,
}

impl Role {
    pub const ALL: [Self; 3] = [Self::Admin, Self::Developer, Self::Soc];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Developer => "developer",
            Self::Soc => "soc",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "developer" => Ok(Self::Developer),
            "soc" => Ok(Self::Soc),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Identity issued by the server. Immutable once received.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: Role,
}

/// Username and password for a single login attempt. Consumed by the
/// validator and dropped right after, whatever the outcome.
#[derive(Debug)]
pub struct Credentials {
    identifier: String,
    secret: SecretString,
}

impl Credentials {
    #[must_use]
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: SecretString::from(secret.into()),
        }
    }

    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub(crate) fn secret(&self) -> &SecretString {
        &self.secret
    }
}

/// Marker for a login whose password was accepted but whose second factor is
/// still outstanding. Carries no token and grants nothing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingAuthentication {
    identifier: String,
}

impl PendingAuthentication {
    pub(crate) fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
        }
    }

    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Authenticated identity plus its bearer token. A session always holds both;
/// there is no way to build one with only half.
#[derive(Clone, Debug)]
pub struct Session {
    identity: Identity,
    token: SecretString,
    issued_at_ms: u64,
}

impl Session {
    #[must_use]
    pub fn new(identity: Identity, token: SecretString, issued_at_ms: u64) -> Self {
        Self {
            identity,
            token,
            issued_at_ms,
        }
    }

    /// Builds a session stamped with the current time.
    #[must_use]
    pub fn issue(identity: Identity, token: SecretString) -> Self {
        Self::new(identity, token, unix_now_ms())
    }

    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.identity.role
    }

    #[must_use]
    pub fn token(&self) -> &SecretString {
        &self.token
    }

    /// Issue time in unix milliseconds.
    #[must_use]
    pub fn issued_at_ms(&self) -> u64 {
        self.issued_at_ms
    }

    /// True once `ttl` has elapsed since issue, compared in milliseconds.
    /// `None` disables local expiry.
    #[must_use]
    pub fn is_expired_at(&self, ttl: Option<Duration>, now_ms: u64) -> bool {
        ttl.is_some_and(|ttl| {
            u128::from(now_ms.saturating_sub(self.issued_at_ms)) >= ttl.as_millis()
        })
    }

    pub(crate) fn has_token(&self, token: &str) -> bool {
        self.token.expose_secret() == token
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
            && self.issued_at_ms == other.issued_at_ms
            && self.token.expose_secret() == other.token.expose_secret()
    }
}

impl Eq for Session {}

/// Current unix time in milliseconds.
#[must_use]
pub fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}

#[derive(Clone, Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// `POST /auth/login` success body. Either `require_mfa` is set, or both
/// `token` and `user` are present.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(default)]
    pub require_mfa: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user: Option<Identity>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyMfaRequest<'a> {
    pub username: &'a str,
    pub totp_code: &'a str,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    pub user: Identity,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub message: Option<String>,
}
