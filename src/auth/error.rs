use thiserror::Error;

/// Generic message for rejected credentials. Never says which field was wrong.
pub const INVALID_CREDENTIALS: &str = "Invalid credentials";
pub const INVALID_MFA_CODE: &str = "Invalid verification code";

/// Failures of the login flow. Every variant is recoverable: the controller
/// settles in `Unauthenticated` or a retry-eligible `MfaPending` and surfaces
/// the message.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("{}", INVALID_CREDENTIALS)]
    InvalidCredentials,
    #[error("{}", INVALID_MFA_CODE)]
    InvalidMfaCode,
    #[error("Verification code must be exactly 6 digits")]
    MalformedMfaCode,
    #[error("Too many invalid verification codes, please log in again")]
    MfaAttemptsExceeded,
    #[error("timeout")]
    Timeout,
    #[error("Session expired or invalid, please log in again")]
    Unauthorized,
    #[error("Another authentication attempt is in progress")]
    Busy,
    #[error("Already signed in, log out first")]
    AlreadyAuthenticated,
    #[error("No login is waiting for a verification code")]
    NoPendingAuthentication,
    #[error("Login cancelled")]
    Cancelled,
    #[error("Identity provider unavailable: {0}")]
    Unavailable(String),
    #[error("Failed to persist session: {0}")]
    Storage(String),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Failures of the durable session slot.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("session store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("session store holds a partial session")]
    Partial,
}
