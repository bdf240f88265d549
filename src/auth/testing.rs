//! In-process identity provider for unit tests. Knows the three console users,
//! accepts `123456` as the only valid code, and counts calls so tests can
//! assert that local rejections never reach the network.

use crate::auth::{
    error::AuthError,
    provider::{IdentityProvider, LoginReply},
    types::{Identity, Role},
};
use secrecy::{ExposeSecret, SecretString};
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

pub const VALID_CODE: &str = "123456";

#[derive(Clone, Debug, Default)]
pub struct Calls {
    login: Arc<AtomicUsize>,
    verify: Arc<AtomicUsize>,
}

impl Calls {
    pub fn login(&self) -> usize {
        self.login.load(Ordering::SeqCst)
    }

    pub fn verify(&self) -> usize {
        self.verify.load(Ordering::SeqCst)
    }
}

struct User {
    identity: Identity,
    password: &'static str,
}

pub struct FakeProvider {
    users: Vec<User>,
    without_mfa: HashSet<String>,
    delay: Option<Duration>,
    calls: Calls,
}

impl Default for FakeProvider {
    fn default() -> Self {
        let user = |id: &str, username: &str, email: &str, password, role| User {
            identity: Identity {
                id: id.to_string(),
                username: username.to_string(),
                email: email.to_string(),
                role,
            },
            password,
        };

        Self {
            users: vec![
                user("1", "admin_user", "admin@example.com", "admin123", Role::Admin),
                user("2", "developer_user", "developer@example.com", "dev123", Role::Developer),
                user("3", "soc_user", "soc@example.com", "soc123", Role::Soc),
            ],
            without_mfa: HashSet::new(),
            delay: None,
            calls: Calls::default(),
        }
    }
}

impl FakeProvider {
    pub fn without_mfa(mut self, username: &str) -> Self {
        self.without_mfa.insert(username.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Calls {
        self.calls.clone()
    }

    fn find(&self, username: &str) -> Option<&User> {
        self.users.iter().find(|u| u.identity.username == username)
    }

    fn token_for(&self, username: &str) -> SecretString {
        let n = self.calls.login() + self.calls.verify();
        SecretString::from(format!("token-{username}-{n}"))
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl IdentityProvider for FakeProvider {
    async fn login(&self, identifier: &str, secret: &SecretString) -> Result<LoginReply, AuthError> {
        self.calls.login.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        let user = self
            .find(identifier)
            .filter(|u| u.password == secret.expose_secret())
            .ok_or(AuthError::InvalidCredentials)?;

        if self.without_mfa.contains(identifier) {
            return Ok(LoginReply::Authenticated {
                identity: user.identity.clone(),
                token: self.token_for(identifier),
            });
        }

        Ok(LoginReply::MfaRequired)
    }

    async fn verify_mfa(
        &self,
        identifier: &str,
        code: &str,
    ) -> Result<(Identity, SecretString), AuthError> {
        self.calls.verify.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        match self.find(identifier) {
            Some(user) if code == VALID_CODE => {
                Ok((user.identity.clone(), self.token_for(identifier)))
            }
            _ => Err(AuthError::InvalidMfaCode),
        }
    }
}
