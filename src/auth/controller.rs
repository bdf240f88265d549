//! Session lifecycle controller.
//!
//! Flow Overview:
//! 1) `submit_credentials` moves `Unauthenticated` to `Authenticating` and asks
//!    the validator. The reply lands in `MfaPending`, `Authenticated`, or back
//!    in `Unauthenticated` with the failure attached as the error.
//! 2) `submit_code` verifies the second factor for the pending login. A wrong
//!    code keeps the pending login until the attempt budget runs out.
//! 3) `logout`, `invalidate` (a downstream 401) and local expiry leave
//!    `Authenticated` and clear the persisted session first.
//!
//! The phase itself is the lock: a submission while another one is in flight
//! is refused with [`AuthError::Busy`] instead of racing. The mutex is never
//! held across a network call. `cancel` and `logout` bump an epoch so the late
//! reply of an abandoned call is dropped.

use crate::{
    auth::{
        error::AuthError,
        provider::IdentityProvider,
        store::SessionStore,
        types::{unix_now_ms, Credentials, Identity, PendingAuthentication, Role, Session},
        validator::{CredentialValidator, LoginOutcome},
        verifier::SecondFactorVerifier,
    },
    gate::{self, AccessLevel, Capability},
};
use secrecy::SecretString;
use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 10;
const DEFAULT_SESSION_TTL_SECONDS: u64 = 30 * 60;
const DEFAULT_MAX_MFA_ATTEMPTS: u32 = 5;

/// Controller settings, fixed at construction.
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    request_timeout: Duration,
    session_ttl: Option<Duration>,
    max_mfa_attempts: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECONDS),
            session_ttl: Some(Duration::from_secs(DEFAULT_SESSION_TTL_SECONDS)),
            max_mfa_attempts: DEFAULT_MAX_MFA_ATTEMPTS,
        }
    }

    /// Upper bound for every validator and verifier call.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Local session lifetime; `None` relies on server 401s alone.
    #[must_use]
    pub fn with_session_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Wrong codes allowed per pending login; `0` means unlimited.
    #[must_use]
    pub fn with_max_mfa_attempts(mut self, attempts: u32) -> Self {
        self.max_mfa_attempts = attempts;
        self
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[must_use]
    pub fn session_ttl(&self) -> Option<Duration> {
        self.session_ttl
    }

    #[must_use]
    pub fn max_mfa_attempts(&self) -> u32 {
        self.max_mfa_attempts
    }
}

/// Authentication state as seen by presentation code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticating,
    MfaPending { identifier: String },
    Authenticated(Session),
}

impl AuthState {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::Authenticated(session) => Some(session),
            _ => None,
        }
    }
}

/// Immutable view of the controller published after every transition.
/// A rejected login shows up as `Unauthenticated` with `error` set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthSnapshot {
    pub state: AuthState,
    pub error: Option<String>,
    /// A validator or verifier call is outstanding.
    pub loading: bool,
}

impl AuthSnapshot {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state.is_authenticated()
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.state.session()
    }

    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.session().map(Session::identity)
    }

    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.session().map(Session::role)
    }

    #[must_use]
    pub fn can_access(&self, capability: Capability) -> bool {
        gate::can_access(self.role(), capability)
    }

    #[must_use]
    pub fn access_level(&self, capability: Capability) -> Option<AccessLevel> {
        gate::access_level(self.role(), capability)
    }

    #[must_use]
    pub fn visible_capabilities(&self) -> BTreeSet<Capability> {
        gate::visible_capabilities(self.role())
    }
}

/// Where a successful credential submission left the login.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoginStep {
    MfaRequired,
    Authenticated(Identity),
}

#[derive(Debug)]
enum Phase {
    Unauthenticated,
    Authenticating,
    MfaPending {
        pending: PendingAuthentication,
        failed_attempts: u32,
        verifying: bool,
    },
    Authenticated(Session),
}

#[derive(Debug)]
struct Inner {
    phase: Phase,
    error: Option<String>,
    epoch: u64,
}

impl Inner {
    fn snapshot(&self) -> AuthSnapshot {
        let (state, loading) = match &self.phase {
            Phase::Unauthenticated => (AuthState::Unauthenticated, false),
            Phase::Authenticating => (AuthState::Authenticating, true),
            Phase::MfaPending {
                pending, verifying, ..
            } => (
                AuthState::MfaPending {
                    identifier: pending.identifier().to_string(),
                },
                *verifying,
            ),
            Phase::Authenticated(session) => (AuthState::Authenticated(session.clone()), false),
        };

        AuthSnapshot {
            state,
            error: self.error.clone(),
            loading,
        }
    }
}

/// Single writer of session state and of the session store.
pub struct SessionController<P, S> {
    validator: CredentialValidator<P>,
    verifier: SecondFactorVerifier<P>,
    store: S,
    config: ControllerConfig,
    inner: Mutex<Inner>,
    snapshots: watch::Sender<AuthSnapshot>,
}

impl<P: IdentityProvider, S: SessionStore> SessionController<P, S> {
    /// Builds the controller and rehydrates it from `store`. An expired,
    /// partial, or unreadable persisted session is cleared and ignored.
    pub fn new(provider: P, store: S, config: ControllerConfig) -> Self {
        let provider = Arc::new(provider);
        let phase = rehydrate(&store, config.session_ttl);

        let inner = Inner {
            phase,
            error: None,
            epoch: 0,
        };
        let (snapshots, _) = watch::channel(inner.snapshot());

        Self {
            validator: CredentialValidator::new(Arc::clone(&provider), config.request_timeout),
            verifier: SecondFactorVerifier::new(provider, config.request_timeout),
            store,
            config,
            inner: Mutex::new(inner),
            snapshots,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    #[must_use]
    pub fn snapshot(&self) -> AuthSnapshot {
        self.lock().snapshot()
    }

    /// Receiver that observes every published snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.snapshots.subscribe()
    }

    /// Starts a login.
    ///
    /// # Errors
    /// [`AuthError::Busy`] while another login is in flight or waiting for a
    /// code, [`AuthError::AlreadyAuthenticated`] with an active session,
    /// [`AuthError::Cancelled`] if the attempt was abandoned meanwhile, and
    /// any validator or storage failure (also attached to the snapshot).
    #[instrument(skip_all, fields(identifier = %credentials.identifier()))]
    pub async fn submit_credentials(&self, credentials: Credentials) -> Result<LoginStep, AuthError> {
        let epoch = {
            let mut guard = self.lock();
            let inner = &mut *guard;

            match inner.phase {
                Phase::Authenticating | Phase::MfaPending { .. } => {
                    debug!("login refused, another attempt is in progress");
                    return Err(AuthError::Busy);
                }
                Phase::Authenticated(_) => return Err(AuthError::AlreadyAuthenticated),
                Phase::Unauthenticated => {}
            }

            inner.epoch += 1;
            inner.phase = Phase::Authenticating;
            inner.error = None;
            self.publish(inner);
            inner.epoch
        };

        let result = self.validator.validate(credentials).await;

        let mut guard = self.lock();
        let inner = &mut *guard;

        if inner.epoch != epoch {
            debug!("dropping reply of an abandoned login");
            return Err(AuthError::Cancelled);
        }

        match result {
            Ok(LoginOutcome::MfaRequired(pending)) => {
                info!("password accepted, second factor required");
                inner.phase = Phase::MfaPending {
                    pending,
                    failed_attempts: 0,
                    verifying: false,
                };
                inner.error = None;
                self.publish(inner);
                Ok(LoginStep::MfaRequired)
            }
            Ok(LoginOutcome::Authenticated(session)) => {
                self.commit(inner, session).map(LoginStep::Authenticated)
            }
            Err(err) => {
                warn!("login failed: {err}");
                inner.phase = Phase::Unauthenticated;
                inner.error = Some(err.to_string());
                self.publish(inner);
                Err(err)
            }
        }
    }

    /// Verifies the second factor of the pending login.
    ///
    /// # Errors
    /// [`AuthError::NoPendingAuthentication`] outside `MfaPending`,
    /// [`AuthError::Busy`] while a code is already being verified,
    /// [`AuthError::MfaAttemptsExceeded`] once the attempt budget is spent,
    /// and any verifier or storage failure.
    #[instrument(skip_all)]
    pub async fn submit_code(&self, code: &str) -> Result<Identity, AuthError> {
        let (pending, epoch) = {
            let mut guard = self.lock();
            let inner = &mut *guard;

            let pending = match &mut inner.phase {
                Phase::MfaPending {
                    verifying: true, ..
                }
                | Phase::Authenticating => return Err(AuthError::Busy),
                Phase::MfaPending {
                    pending, verifying, ..
                } => {
                    *verifying = true;
                    pending.clone()
                }
                Phase::Unauthenticated | Phase::Authenticated(_) => {
                    return Err(AuthError::NoPendingAuthentication)
                }
            };

            inner.error = None;
            self.publish(inner);
            (pending, inner.epoch)
        };

        let result = self.verifier.verify(&pending, code).await;

        let mut guard = self.lock();
        let inner = &mut *guard;

        if inner.epoch != epoch {
            debug!("dropping reply of an abandoned verification");
            return Err(AuthError::Cancelled);
        }

        let err = match result {
            Ok(session) => return self.commit(inner, session),
            Err(err) => err,
        };

        let max_attempts = self.config.max_mfa_attempts;
        let mut exhausted = false;

        if let Phase::MfaPending {
            failed_attempts,
            verifying,
            ..
        } = &mut inner.phase
        {
            *verifying = false;

            if err == AuthError::InvalidMfaCode {
                *failed_attempts += 1;
                exhausted = max_attempts > 0 && *failed_attempts >= max_attempts;
            }
        }

        if exhausted {
            warn!(max_attempts, "verification attempts exhausted, login abandoned");
            inner.phase = Phase::Unauthenticated;
            inner.error = Some(AuthError::MfaAttemptsExceeded.to_string());
            self.publish(inner);
            return Err(AuthError::MfaAttemptsExceeded);
        }

        debug!("verification failed: {err}");
        inner.error = Some(err.to_string());
        self.publish(inner);
        Err(err)
    }

    /// Abandons a login in `Authenticating` or `MfaPending`. The store is not
    /// touched. Returns `false` when there was nothing to cancel.
    pub fn cancel(&self) -> bool {
        let mut guard = self.lock();
        let inner = &mut *guard;

        if !matches!(
            inner.phase,
            Phase::Authenticating | Phase::MfaPending { .. }
        ) {
            return false;
        }

        info!("login cancelled");
        inner.epoch += 1;
        inner.phase = Phase::Unauthenticated;
        inner.error = None;
        self.publish(inner);
        true
    }

    /// Ends any session or login in progress. Calling it again is a no-op.
    /// A login that never reached `Authenticated` is abandoned as by
    /// [`Self::cancel`] and the store is left alone.
    ///
    /// # Errors
    /// [`AuthError::Storage`] if the persisted session could not be removed;
    /// the in-memory session is dropped regardless.
    pub fn logout(&self) -> Result<(), AuthError> {
        let mut guard = self.lock();

        if !matches!(guard.phase, Phase::Authenticated(_)) {
            drop(guard);
            if !self.cancel() {
                self.clear_error();
            }
            return Ok(());
        }

        let inner = &mut *guard;
        if let Phase::Authenticated(session) = &inner.phase {
            info!(username = %session.identity().username, "logout");
        }

        inner.epoch += 1;
        let cleared = self.store.clear();
        inner.phase = Phase::Unauthenticated;
        inner.error = None;

        if let Err(err) = cleared {
            error!("failed to clear persisted session: {err}");
            let err = AuthError::from(err);
            inner.error = Some(err.to_string());
            self.publish(inner);
            return Err(err);
        }

        self.publish(inner);
        Ok(())
    }

    /// Drops the error without changing the authentication state.
    pub fn clear_error(&self) {
        let mut guard = self.lock();
        if guard.error.take().is_some() {
            self.publish(&guard);
        }
    }

    /// Downstream unauthorized signal: ends the current session whatever its
    /// token. Returns `false` when no session was active.
    pub fn invalidate(&self) -> bool {
        let mut guard = self.lock();
        let inner = &mut *guard;

        if !matches!(inner.phase, Phase::Authenticated(_)) {
            return false;
        }

        warn!("session rejected downstream");
        self.end_session(inner);
        true
    }

    /// Like [`Self::invalidate`], but only when `token` is still the current
    /// session's token. A late 401 for a replaced session is ignored.
    pub fn invalidate_token(&self, token: &str) -> bool {
        let mut guard = self.lock();
        let inner = &mut *guard;

        match &inner.phase {
            Phase::Authenticated(session) if session.has_token(token) => {
                warn!("session rejected downstream");
                self.end_session(inner);
                true
            }
            _ => false,
        }
    }

    /// Ends the session if its local lifetime is over. Returns `true` when it
    /// did.
    pub fn check_expiry(&self) -> bool {
        let mut guard = self.lock();
        let inner = &mut *guard;
        self.expire_if_due(inner)
    }

    /// Token for an authenticated call, after an expiry check.
    ///
    /// # Errors
    /// [`AuthError::Unauthorized`] without a live session.
    pub fn bearer_token(&self) -> Result<SecretString, AuthError> {
        self.authorization().map(|(_, token)| token)
    }

    /// Role and token of the live session, read under one lock so a gate
    /// verdict on the role always matches the token that gets sent.
    ///
    /// # Errors
    /// [`AuthError::Unauthorized`] without a live session.
    pub fn authorization(&self) -> Result<(Role, SecretString), AuthError> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        self.expire_if_due(inner);

        match &inner.phase {
            Phase::Authenticated(session) => Ok((session.role(), session.token().clone())),
            _ => Err(AuthError::Unauthorized),
        }
    }

    fn expire_if_due(&self, inner: &mut Inner) -> bool {
        let expired = match &inner.phase {
            Phase::Authenticated(session) => {
                session.is_expired_at(self.config.session_ttl, unix_now_ms())
            }
            _ => false,
        };

        if expired {
            info!("session expired locally");
            self.end_session(inner);
        }

        expired
    }

    /// Writes the session through to the store, then publishes it.
    fn commit(&self, inner: &mut Inner, session: Session) -> Result<Identity, AuthError> {
        if let Err(err) = self.store.save(&session) {
            error!("failed to persist session: {err}");
            let err = AuthError::from(err);
            inner.phase = Phase::Unauthenticated;
            inner.error = Some(err.to_string());
            self.publish(inner);
            return Err(err);
        }

        let identity = session.identity().clone();
        info!(username = %identity.username, role = %identity.role, "session established");

        inner.phase = Phase::Authenticated(session);
        inner.error = None;
        self.publish(inner);
        Ok(identity)
    }

    fn end_session(&self, inner: &mut Inner) {
        if let Err(err) = self.store.clear() {
            error!("failed to clear persisted session: {err}");
        }

        inner.epoch += 1;
        inner.phase = Phase::Unauthenticated;
        inner.error = Some(AuthError::Unauthorized.to_string());
        self.publish(inner);
    }

    fn publish(&self, inner: &Inner) {
        self.snapshots.send_replace(inner.snapshot());
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn rehydrate<S: SessionStore>(store: &S, ttl: Option<Duration>) -> Phase {
    let discard = |reason: &str| {
        warn!("discarding persisted session: {reason}");
        if let Err(err) = store.clear() {
            error!("failed to clear persisted session: {err}");
        }
        Phase::Unauthenticated
    };

    match store.load() {
        Ok(Some(session)) if session.is_expired_at(ttl, unix_now_ms()) => discard("expired"),
        Ok(Some(session)) => {
            info!(
                username = %session.identity().username,
                role = %session.role(),
                "session rehydrated"
            );
            Phase::Authenticated(session)
        }
        Ok(None) => Phase::Unauthenticated,
        Err(err) => discard(&err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{
        error::StoreError,
        store::MemorySessionStore,
        testing::{FakeProvider, VALID_CODE},
    };
    use secrecy::ExposeSecret;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Controller = SessionController<FakeProvider, Arc<MemorySessionStore>>;

    fn controller_with(provider: FakeProvider, config: ControllerConfig) -> (Controller, Arc<MemorySessionStore>) {
        let store = Arc::new(MemorySessionStore::new());
        (
            SessionController::new(provider, Arc::clone(&store), config),
            store,
        )
    }

    fn controller() -> (Controller, Arc<MemorySessionStore>) {
        controller_with(FakeProvider::default(), ControllerConfig::new())
    }

    fn identity(role: Role) -> Identity {
        Identity {
            id: "1".to_string(),
            username: format!("{role}_user"),
            email: format!("{role}@example.com"),
            role,
        }
    }

    fn assert_consistent(snapshot: &AuthSnapshot) {
        assert_eq!(snapshot.is_authenticated(), snapshot.session().is_some());
        if let Some(session) = snapshot.session() {
            assert!(!session.token().expose_secret().is_empty());
            assert!(!session.identity().username.is_empty());
        }
    }

    async fn login<S: SessionStore>(
        controller: &SessionController<FakeProvider, S>,
        user: &str,
        password: &str,
    ) {
        assert_eq!(
            controller
                .submit_credentials(Credentials::new(user, password))
                .await
                .unwrap(),
            LoginStep::MfaRequired
        );
        controller.submit_code(VALID_CODE).await.unwrap();
    }

    #[tokio::test]
    async fn admin_login_with_mfa() {
        let (controller, store) = controller();

        let step = controller
            .submit_credentials(Credentials::new("admin_user", "admin123"))
            .await
            .unwrap();
        assert_eq!(step, LoginStep::MfaRequired);
        assert_eq!(
            controller.snapshot().state,
            AuthState::MfaPending {
                identifier: "admin_user".to_string()
            }
        );
        assert_eq!(store.load().unwrap(), None);

        let identity = controller.submit_code("123456").await.unwrap();
        assert_eq!(identity.role, Role::Admin);

        let snapshot = controller.snapshot();
        assert_consistent(&snapshot);
        assert!(snapshot.is_authenticated());
        assert!(snapshot.can_access(Capability::ViewVms));
        assert!(!snapshot.can_access(Capability::SshConnect));
        assert_eq!(store.load().unwrap().as_ref(), snapshot.session());
    }

    #[tokio::test]
    async fn rejected_credentials_surface_error() {
        let (controller, store) = controller();

        let err = controller
            .submit_credentials(Credentials::new("x", "wrong"))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.state, AuthState::Unauthenticated);
        assert!(snapshot.error.as_deref().is_some_and(|e| !e.is_empty()));
        assert!(!snapshot.loading);
        assert_eq!(store.load().unwrap(), None);
    }

    #[tokio::test]
    async fn second_login_while_mfa_pending_is_busy() {
        let (controller, _) = controller();
        controller
            .submit_credentials(Credentials::new("admin_user", "admin123"))
            .await
            .unwrap();
        let before = controller.snapshot();

        let err = controller
            .submit_credentials(Credentials::new("soc_user", "soc123"))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::Busy);
        assert_eq!(controller.snapshot(), before);
    }

    #[tokio::test]
    async fn second_login_while_authenticating_is_busy() {
        let provider = FakeProvider::default().with_delay(Duration::from_millis(50));
        let calls = provider.calls();
        let (controller, _) = controller_with(provider, ControllerConfig::new());

        let (first, second) = tokio::join!(
            controller.submit_credentials(Credentials::new("admin_user", "admin123")),
            controller.submit_credentials(Credentials::new("soc_user", "soc123")),
        );

        assert_eq!(first.unwrap(), LoginStep::MfaRequired);
        assert_eq!(second.unwrap_err(), AuthError::Busy);
        assert_eq!(calls.login(), 1);
    }

    #[tokio::test]
    async fn concurrent_codes_are_busy() {
        let provider = FakeProvider::default().with_delay(Duration::from_millis(50));
        let calls = provider.calls();
        let (controller, _) = controller_with(provider, ControllerConfig::new());
        controller
            .submit_credentials(Credentials::new("developer_user", "dev123"))
            .await
            .unwrap();

        let (first, second) = tokio::join!(
            controller.submit_code(VALID_CODE),
            controller.submit_code(VALID_CODE),
        );

        assert_eq!(first.unwrap().role, Role::Developer);
        assert_eq!(second.unwrap_err(), AuthError::Busy);
        assert_eq!(calls.verify(), 1);
    }

    #[tokio::test]
    async fn loading_is_published_while_in_flight() {
        let provider = FakeProvider::default().with_delay(Duration::from_millis(50));
        let (controller, _) = controller_with(provider, ControllerConfig::new());
        let mut rx = controller.subscribe();

        let (result, observed) = tokio::join!(
            controller.submit_credentials(Credentials::new("admin_user", "admin123")),
            async {
                rx.changed().await.unwrap();
                rx.borrow_and_update().clone()
            }
        );

        result.unwrap();
        assert_eq!(observed.state, AuthState::Authenticating);
        assert!(observed.loading);
        assert!(!controller.snapshot().loading);
    }

    #[tokio::test]
    async fn downstream_unauthorized_ends_session() {
        let (controller, store) = controller();
        login(&controller, "developer_user", "dev123").await;
        assert!(store.load().unwrap().is_some());

        assert!(controller.invalidate());

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.state, AuthState::Unauthenticated);
        assert_eq!(snapshot.error, Some(AuthError::Unauthorized.to_string()));
        assert_eq!(store.load().unwrap(), None);
        for capability in Capability::ALL {
            assert!(!snapshot.can_access(capability));
        }
        assert!(!controller.invalidate());
    }

    #[tokio::test]
    async fn stale_token_does_not_end_newer_session() {
        let (controller, _) = controller();
        login(&controller, "soc_user", "soc123").await;
        let old = controller.bearer_token().unwrap();
        controller.logout().unwrap();
        login(&controller, "soc_user", "soc123").await;

        assert!(!controller.invalidate_token(old.expose_secret()));
        assert!(controller.snapshot().is_authenticated());

        let current = controller.bearer_token().unwrap();
        assert!(controller.invalidate_token(current.expose_secret()));
        assert!(!controller.snapshot().is_authenticated());
    }

    #[tokio::test]
    async fn malformed_code_is_local_and_free() {
        let provider = FakeProvider::default();
        let calls = provider.calls();
        let (controller, _) =
            controller_with(provider, ControllerConfig::new().with_max_mfa_attempts(1));
        controller
            .submit_credentials(Credentials::new("developer_user", "dev123"))
            .await
            .unwrap();

        for _ in 0..3 {
            let err = controller.submit_code("12").await.unwrap_err();
            assert_eq!(err, AuthError::MalformedMfaCode);
        }

        let snapshot = controller.snapshot();
        assert_eq!(
            snapshot.state,
            AuthState::MfaPending {
                identifier: "developer_user".to_string()
            }
        );
        assert!(snapshot.error.is_some());
        assert_eq!(calls.verify(), 0);

        controller.submit_code(VALID_CODE).await.unwrap();
        assert!(controller.snapshot().is_authenticated());
    }

    #[tokio::test]
    async fn wrong_code_keeps_pending_until_budget_is_spent() {
        let (controller, store) =
            controller_with(FakeProvider::default(), ControllerConfig::new().with_max_mfa_attempts(3));
        controller
            .submit_credentials(Credentials::new("admin_user", "admin123"))
            .await
            .unwrap();

        for _ in 0..2 {
            assert_eq!(
                controller.submit_code("000000").await.unwrap_err(),
                AuthError::InvalidMfaCode
            );
            let snapshot = controller.snapshot();
            assert!(matches!(snapshot.state, AuthState::MfaPending { .. }));
            assert_eq!(snapshot.error.as_deref(), Some("Invalid verification code"));
        }

        assert_eq!(
            controller.submit_code("000000").await.unwrap_err(),
            AuthError::MfaAttemptsExceeded
        );
        assert_eq!(controller.snapshot().state, AuthState::Unauthenticated);
        assert_eq!(
            controller.submit_code(VALID_CODE).await.unwrap_err(),
            AuthError::NoPendingAuthentication
        );
        assert_eq!(store.load().unwrap(), None);
    }

    #[tokio::test]
    async fn unlimited_attempts_when_budget_is_zero() {
        let (controller, _) =
            controller_with(FakeProvider::default(), ControllerConfig::new().with_max_mfa_attempts(0));
        controller
            .submit_credentials(Credentials::new("admin_user", "admin123"))
            .await
            .unwrap();

        for _ in 0..10 {
            assert_eq!(
                controller.submit_code("000000").await.unwrap_err(),
                AuthError::InvalidMfaCode
            );
        }
        controller.submit_code(VALID_CODE).await.unwrap();
    }

    #[tokio::test]
    async fn logout_twice_is_clean() {
        let (controller, store) = controller();
        login(&controller, "admin_user", "admin123").await;

        controller.logout().unwrap();
        let first = controller.snapshot();
        controller.logout().unwrap();
        let second = controller.snapshot();

        assert_eq!(first, second);
        assert_eq!(second.state, AuthState::Unauthenticated);
        assert_eq!(second.error, None);
        assert_eq!(store.load().unwrap(), None);
    }

    #[tokio::test]
    async fn clear_error_keeps_state() {
        let (controller, _) = controller();
        controller
            .submit_credentials(Credentials::new("admin_user", "admin123"))
            .await
            .unwrap();
        controller.submit_code("000000").await.unwrap_err();

        controller.clear_error();
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.error, None);
        assert!(matches!(snapshot.state, AuthState::MfaPending { .. }));
    }

    #[tokio::test]
    async fn cancel_discards_pending_without_touching_store() {
        let session = Session::issue(identity(Role::Soc), SecretString::from("kept".to_string()));
        let store = Arc::new(MemorySessionStore::new());
        let controller =
            SessionController::new(FakeProvider::default(), Arc::clone(&store), ControllerConfig::new());

        controller
            .submit_credentials(Credentials::new("admin_user", "admin123"))
            .await
            .unwrap();
        // a foreign writer must not be disturbed by cancel
        store.save(&session).unwrap();

        assert!(controller.cancel());
        assert_eq!(controller.snapshot().state, AuthState::Unauthenticated);
        assert_eq!(store.load().unwrap(), Some(session));
        assert!(!controller.cancel());
    }

    #[tokio::test]
    async fn cancel_drops_late_reply() {
        let provider = FakeProvider::default()
            .without_mfa("soc_user")
            .with_delay(Duration::from_millis(50));
        let (controller, store) = controller_with(provider, ControllerConfig::new());

        let (result, cancelled) = tokio::join!(
            controller.submit_credentials(Credentials::new("soc_user", "soc123")),
            async { controller.cancel() },
        );

        assert!(cancelled);
        assert_eq!(result.unwrap_err(), AuthError::Cancelled);
        assert_eq!(controller.snapshot().state, AuthState::Unauthenticated);
        assert_eq!(store.load().unwrap(), None);
    }

    #[tokio::test]
    async fn login_without_mfa_persists_immediately() {
        let provider = FakeProvider::default().without_mfa("soc_user");
        let (controller, store) = controller_with(provider, ControllerConfig::new());

        let step = controller
            .submit_credentials(Credentials::new("soc_user", "soc123"))
            .await
            .unwrap();
        assert!(matches!(step, LoginStep::Authenticated(identity) if identity.role == Role::Soc));
        assert_eq!(store.load().unwrap().as_ref(), controller.snapshot().session());
        assert_eq!(
            controller
                .submit_credentials(Credentials::new("soc_user", "soc123"))
                .await
                .unwrap_err(),
            AuthError::AlreadyAuthenticated
        );
    }

    #[tokio::test]
    async fn timeout_returns_to_stable_state() {
        let provider = FakeProvider::default().with_delay(Duration::from_secs(5));
        let (controller, _) = controller_with(
            provider,
            ControllerConfig::new().with_request_timeout(Duration::from_millis(50)),
        );

        let err = controller
            .submit_credentials(Credentials::new("admin_user", "admin123"))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::Timeout);

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.state, AuthState::Unauthenticated);
        assert_eq!(snapshot.error.as_deref(), Some("timeout"));
        assert!(!snapshot.loading);
    }

    #[test]
    fn rehydrates_live_session() {
        let session = Session::issue(identity(Role::Developer), SecretString::from("t".to_string()));
        let store = Arc::new(MemorySessionStore::with_session(session.clone()));

        let controller =
            SessionController::new(FakeProvider::default(), store, ControllerConfig::new());
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.session(), Some(&session));
        assert!(snapshot.can_access(Capability::SshConnect));
    }

    #[test]
    fn rehydration_drops_expired_session() {
        let session = Session::new(identity(Role::Admin), SecretString::from("t".to_string()), 0);
        let store = Arc::new(MemorySessionStore::with_session(session));

        let controller =
            SessionController::new(FakeProvider::default(), Arc::clone(&store), ControllerConfig::new());
        assert_eq!(controller.snapshot().state, AuthState::Unauthenticated);
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn rehydration_keeps_old_session_without_ttl() {
        let session = Session::new(identity(Role::Admin), SecretString::from("t".to_string()), 0);
        let store = Arc::new(MemorySessionStore::with_session(session));

        let controller = SessionController::new(
            FakeProvider::default(),
            store,
            ControllerConfig::new().with_session_ttl(None),
        );
        assert!(controller.snapshot().is_authenticated());
    }

    #[tokio::test]
    async fn bearer_token_expires_locally() {
        let provider = FakeProvider::default().without_mfa("admin_user");
        let (controller, store) = controller_with(
            provider,
            ControllerConfig::new().with_session_ttl(Some(Duration::from_secs(1))),
        );
        controller
            .submit_credentials(Credentials::new("admin_user", "admin123"))
            .await
            .unwrap();
        assert!(controller.bearer_token().is_ok());

        tokio::time::sleep(Duration::from_millis(1_100)).await;

        assert_eq!(controller.bearer_token().unwrap_err(), AuthError::Unauthorized);
        assert_eq!(controller.snapshot().state, AuthState::Unauthenticated);
        assert_eq!(store.load().unwrap(), None);
    }

    #[tokio::test]
    async fn sub_second_ttl_session_is_usable_right_away() {
        let provider = FakeProvider::default().without_mfa("admin_user");
        let (controller, _) = controller_with(
            provider,
            ControllerConfig::new().with_session_ttl(Some(Duration::from_millis(500))),
        );
        controller
            .submit_credentials(Credentials::new("admin_user", "admin123"))
            .await
            .unwrap();

        assert!(controller.bearer_token().is_ok());
        assert!(controller.snapshot().is_authenticated());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(controller.bearer_token().unwrap_err(), AuthError::Unauthorized);
    }

    #[tokio::test]
    async fn authorization_pairs_role_with_token() {
        let (controller, _) = controller();
        assert_eq!(controller.authorization().unwrap_err(), AuthError::Unauthorized);

        login(&controller, "soc_user", "soc123").await;
        let (role, token) = controller.authorization().unwrap();
        assert_eq!(role, Role::Soc);
        assert_eq!(
            token.expose_secret(),
            controller.bearer_token().unwrap().expose_secret()
        );
    }

    #[tokio::test]
    async fn logout_during_mfa_leaves_store_alone() {
        let store = Arc::new(MemorySessionStore::new());
        let controller = SessionController::new(
            FakeProvider::default(),
            RecordingStore(Arc::clone(&store), Arc::default()),
            ControllerConfig::new(),
        );
        controller
            .submit_credentials(Credentials::new("admin_user", "admin123"))
            .await
            .unwrap();

        controller.logout().unwrap();

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.state, AuthState::Unauthenticated);
        assert_eq!(snapshot.error, None);
        assert_eq!(controller.store.1.load(Ordering::SeqCst), 0);
        assert_eq!(
            controller.submit_code(VALID_CODE).await.unwrap_err(),
            AuthError::NoPendingAuthentication
        );

        login(&controller, "admin_user", "admin123").await;
        controller.logout().unwrap();
        assert_eq!(controller.store.1.load(Ordering::SeqCst), 1);
        assert_eq!(store.load().unwrap(), None);
    }

    /// Counts `clear` calls on top of an in-memory store.
    struct RecordingStore(Arc<MemorySessionStore>, Arc<AtomicUsize>);

    impl SessionStore for RecordingStore {
        fn load(&self) -> Result<Option<Session>, StoreError> {
            self.0.load()
        }

        fn save(&self, session: &Session) -> Result<(), StoreError> {
            self.0.save(session)
        }

        fn clear(&self) -> Result<(), StoreError> {
            self.1.fetch_add(1, Ordering::SeqCst);
            self.0.clear()
        }
    }

    struct BrokenStore;

    impl SessionStore for BrokenStore {
        fn load(&self) -> Result<Option<Session>, StoreError> {
            Err(StoreError::Partial)
        }

        fn save(&self, _session: &Session) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk full")))
        }

        fn clear(&self) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::other("read-only")))
        }
    }

    #[tokio::test]
    async fn failed_write_through_aborts_login() {
        let controller =
            SessionController::new(FakeProvider::default(), BrokenStore, ControllerConfig::new());
        assert_eq!(controller.snapshot().state, AuthState::Unauthenticated);

        controller
            .submit_credentials(Credentials::new("admin_user", "admin123"))
            .await
            .unwrap();
        let err = controller.submit_code(VALID_CODE).await.unwrap_err();
        assert!(matches!(err, AuthError::Storage(_)));

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.state, AuthState::Unauthenticated);
        assert!(snapshot.error.is_some());
        controller.logout().unwrap();
        assert_eq!(controller.snapshot().state, AuthState::Unauthenticated);
        assert_eq!(controller.snapshot().error, None);
    }

    struct StickyStore(MemorySessionStore);

    impl SessionStore for StickyStore {
        fn load(&self) -> Result<Option<Session>, StoreError> {
            self.0.load()
        }

        fn save(&self, session: &Session) -> Result<(), StoreError> {
            self.0.save(session)
        }

        fn clear(&self) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::other("read-only")))
        }
    }

    #[tokio::test]
    async fn failed_clear_still_drops_session() {
        let controller = SessionController::new(
            FakeProvider::default(),
            StickyStore(MemorySessionStore::new()),
            ControllerConfig::new(),
        );
        login(&controller, "developer_user", "dev123").await;

        assert!(matches!(controller.logout(), Err(AuthError::Storage(_))));
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.state, AuthState::Unauthenticated);
        assert!(snapshot.error.is_some());
    }

    #[tokio::test]
    async fn every_published_snapshot_is_consistent() {
        let (controller, _) = controller();
        let mut rx = controller.subscribe();

        controller
            .submit_credentials(Credentials::new("x", "wrong"))
            .await
            .unwrap_err();
        assert_consistent(&rx.borrow_and_update());
        login(&controller, "developer_user", "dev123").await;
        assert_consistent(&rx.borrow_and_update());
        controller.invalidate();
        assert_consistent(&rx.borrow_and_update());
        controller.logout().unwrap();
        assert_consistent(&rx.borrow_and_update());
    }
}
