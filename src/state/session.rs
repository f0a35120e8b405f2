//! Auth-session state for the current user.
//!
//! SYSTEM CONTEXT
//! ==============
//! Owns the one active identity for this client: acquires it through the
//! credential + profile exchange, persists it as two store entries
//! (`access_token`, `user_data`), restores it on startup, and tears it down
//! on logout or when any protected call reports 401. Dependents hold an
//! `Arc<SessionManager>` and either poll [`SessionManager::state`] or watch
//! [`SessionManager::subscribe`].
//!
//! STATE MACHINE
//! =============
//! `Unauthenticated -> Authenticating -> Authenticated`, back to
//! `Unauthenticated` on logout/401. Only one attempt may be in flight; a
//! failed attempt returns to whatever phase preceded it. Logout bumps an
//! epoch so an attempt that finishes afterwards is discarded instead of
//! resurrecting the session.
//! A re-login does not hide the session it may replace: until the attempt
//! succeeds, [`SessionManager::session`] keeps returning the old one.
//!
//! A token is never persisted without its profile. If the profile fetch
//! fails after a successful credential exchange, the token is dropped and
//! the attempt fails as a whole.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use time::OffsetDateTime;
use tokio::sync::watch;

use crate::net::api::{ApiClient, ApiError};
use crate::net::types::{UserId, UserProfile};
use crate::util::storage::{KeyValueStore, StoreError};

pub const TOKEN_KEY: &str = "access_token";
pub const USER_KEY: &str = "user_data";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("another sign-in attempt is already in progress")]
    Busy,
    #[error("sign-in was superseded by a logout")]
    Superseded,
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("could not persist session: {0}")]
    Store(#[from] StoreError),
}

// =============================================================================
// SESSION
// =============================================================================

/// The authenticated identity plus its bearer credential.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: UserId,
    pub email: String,
    pub username: String,
    pub token: String,
    pub created_at: OffsetDateTime,
}

impl Session {
    #[must_use]
    pub fn new(token: String, profile: UserProfile) -> Self {
        Self {
            user_id: profile.id,
            email: profile.email,
            username: profile.username,
            token,
            created_at: profile.created_at,
        }
    }

    #[must_use]
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.user_id,
            email: self.email.clone(),
            username: self.username.clone(),
            created_at: self.created_at,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("username", &self.username)
            .field("token", &"***")
            .field("created_at", &self.created_at)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthPhase {
    #[default]
    Unauthenticated,
    Authenticating,
    Authenticated,
}

/// Snapshot published to dependents on every transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    pub phase: AuthPhase,
    pub user: Option<UserProfile>,
}

impl AuthState {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.phase == AuthPhase::Authenticated && self.user.is_some()
    }
}

// =============================================================================
// MANAGER
// =============================================================================

#[derive(Debug, Default)]
struct Inner {
    phase: AuthPhase,
    session: Option<Session>,
    epoch: u64,
}

pub struct SessionManager {
    api: Arc<ApiClient>,
    store: Arc<dyn KeyValueStore>,
    inner: Mutex<Inner>,
    notify: watch::Sender<AuthState>,
}

impl SessionManager {
    #[must_use]
    pub fn new(api: Arc<ApiClient>, store: Arc<dyn KeyValueStore>) -> Self {
        let (notify, _) = watch::channel(AuthState::default());
        Self { api, store, inner: Mutex::new(Inner::default()), notify }
    }

    #[must_use]
    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, inner: &Inner) {
        self.notify.send_replace(AuthState {
            phase: inner.phase,
            user: inner.session.as_ref().map(Session::profile),
        });
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn state(&self) -> AuthState {
        self.notify.borrow().clone()
    }

    /// Receiver that observes every transition, including 401 teardown.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.notify.subscribe()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.lock().phase == AuthPhase::Authenticated
    }

    /// The active session. A re-login in flight does not hide it: the old
    /// session stays usable until the attempt replaces it or a logout clears
    /// it.
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.lock().session.clone()
    }

    #[must_use]
    pub fn current_user(&self) -> Option<UserProfile> {
        self.session().map(|s| s.profile())
    }

    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.session().map(|s| s.token)
    }

    // -------------------------------------------------------------------------
    // Restore
    // -------------------------------------------------------------------------

    /// Load the persisted session. Both entries must be present and the
    /// profile must parse; anything else clears both entries and leaves the
    /// session signed out. Returns whether a session was restored.
    pub fn restore(&self) -> bool {
        let token = self.read_entry(TOKEN_KEY);
        let profile = self.read_entry(USER_KEY);

        let restored = match (token, profile) {
            (None, None) => None,
            (Some(token), Some(raw)) if !token.trim().is_empty() => {
                match serde_json::from_str::<UserProfile>(&raw) {
                    Ok(profile) => Some(Session::new(token, profile)),
                    Err(e) => {
                        tracing::warn!(error = %e, "persisted profile is corrupt; clearing session");
                        self.clear_persisted();
                        None
                    }
                }
            }
            _ => {
                tracing::warn!("partial session state on disk; clearing");
                self.clear_persisted();
                None
            }
        };

        let mut inner = self.lock();
        inner.epoch += 1;
        let ok = restored.is_some();
        if let Some(session) = &restored {
            tracing::info!(user_id = session.user_id, "session restored");
        }
        inner.phase = if ok { AuthPhase::Authenticated } else { AuthPhase::Unauthenticated };
        inner.session = restored;
        self.publish(&inner);
        ok
    }

    fn read_entry(&self, key: &str) -> Option<String> {
        self.store.get(key).unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "session store read failed");
            None
        })
    }

    fn clear_persisted(&self) {
        for key in [TOKEN_KEY, USER_KEY] {
            if let Err(e) = self.store.remove(key) {
                tracing::error!(key, error = %e, "failed to clear persisted session entry");
            }
        }
    }

    fn persist(&self, session: &Session) -> Result<(), SessionError> {
        let profile = serde_json::to_string(&session.profile()).map_err(StoreError::from)?;
        let result = self
            .store
            .set(TOKEN_KEY, &session.token)
            .and_then(|()| self.store.set(USER_KEY, &profile));
        if let Err(e) = result {
            self.clear_persisted();
            return Err(e.into());
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Login / register
    // -------------------------------------------------------------------------

    /// Sign in. Failures are logged and reported as `false`.
    pub async fn login(&self, email: &str, password: &str) -> bool {
        match self.try_login(email, password).await {
            Ok(session) => {
                tracing::info!(user_id = session.user_id, "signed in");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, email = email.trim(), "login failed");
                false
            }
        }
    }

    /// Sign in, reporting why it failed.
    ///
    /// # Errors
    ///
    /// `MissingField` before any network call for blank input, `Busy` while
    /// another attempt is in flight, `Api` for credential/profile failures,
    /// `Store` if the session cannot be persisted.
    pub async fn try_login(&self, email: &str, password: &str) -> Result<Session, SessionError> {
        let (email, password) = validate_credentials(email, password)?;
        let attempt = self.begin_attempt()?;
        let result = self.exchange(email, password).await;
        self.complete(attempt, result)
    }

    /// Create an account and sign straight into it. Failure at either step
    /// is logged and reported as `false`.
    pub async fn register(&self, email: &str, username: &str, password: &str) -> bool {
        match self.try_register(email, username, password).await {
            Ok(session) => {
                tracing::info!(user_id = session.user_id, "registered and signed in");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, email = email.trim(), "registration failed");
                false
            }
        }
    }

    /// Create an account and sign in, reporting why it failed.
    ///
    /// # Errors
    ///
    /// Same as [`Self::try_login`], plus `Api(Rejected)` when the server
    /// refuses the registration.
    pub async fn try_register(&self, email: &str, username: &str, password: &str) -> Result<Session, SessionError> {
        let (email, password) = validate_credentials(email, password)?;
        let username = username.trim();
        if username.is_empty() {
            return Err(SessionError::MissingField("username"));
        }
        let attempt = self.begin_attempt()?;
        let result = self.register_and_exchange(email, username, password).await;
        self.complete(attempt, result)
    }

    async fn register_and_exchange(&self, email: &str, username: &str, password: &str) -> Result<Session, SessionError> {
        self.api.register(email, username, password).await?;
        tracing::info!(email, "account created");
        self.exchange(email, password).await
    }

    async fn exchange(&self, email: &str, password: &str) -> Result<Session, SessionError> {
        let token = self.api.login(email, password).await?;
        let profile = self
            .api
            .current_user(&token)
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "profile fetch failed after token issue; discarding token"))?;
        Ok(Session::new(token, profile))
    }

    pub(crate) fn begin_attempt(&self) -> Result<Attempt<'_>, SessionError> {
        let mut inner = self.lock();
        if inner.phase == AuthPhase::Authenticating {
            return Err(SessionError::Busy);
        }
        let previous = inner.phase;
        inner.phase = AuthPhase::Authenticating;
        inner.epoch += 1;
        let epoch = inner.epoch;
        self.publish(&inner);
        Ok(Attempt { manager: self, epoch, previous, settled: false })
    }

    fn complete(&self, mut attempt: Attempt<'_>, result: Result<Session, SessionError>) -> Result<Session, SessionError> {
        attempt.settled = true;
        let mut inner = self.lock();
        if inner.epoch != attempt.epoch {
            return Err(SessionError::Superseded);
        }

        let outcome = result.and_then(|session| self.persist(&session).map(|()| session));
        match outcome {
            Ok(session) => {
                inner.phase = AuthPhase::Authenticated;
                inner.session = Some(session.clone());
                self.publish(&inner);
                Ok(session)
            }
            Err(e) => {
                inner.phase = attempt.previous;
                self.publish(&inner);
                Err(e)
            }
        }
    }

    fn abandon(&self, epoch: u64, previous: AuthPhase) {
        let mut inner = self.lock();
        if inner.epoch == epoch && inner.phase == AuthPhase::Authenticating {
            tracing::debug!("sign-in attempt dropped before completion");
            inner.phase = previous;
            self.publish(&inner);
        }
    }

    // -------------------------------------------------------------------------
    // Teardown
    // -------------------------------------------------------------------------

    /// Clear persisted entries and deactivate the session. Any attempt still
    /// in flight is superseded.
    pub fn logout(&self) {
        let mut inner = self.lock();
        inner.epoch += 1;
        inner.phase = AuthPhase::Unauthenticated;
        let had_session = inner.session.take().is_some();
        self.clear_persisted();
        self.publish(&inner);
        if had_session {
            tracing::info!("signed out");
        }
    }

    /// Called by dependents when a protected call returns 401.
    pub fn handle_unauthorized(&self) {
        tracing::warn!("authorization expired; signing out");
        self.logout();
    }
}

/// In-flight guard. Dropping it unsettled (e.g. a cancelled future) puts the
/// phase back where it was.
pub(crate) struct Attempt<'a> {
    manager: &'a SessionManager,
    epoch: u64,
    previous: AuthPhase,
    settled: bool,
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.manager.abandon(self.epoch, self.previous);
        }
    }
}

fn validate_credentials<'a>(email: &'a str, password: &'a str) -> Result<(&'a str, &'a str), SessionError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(SessionError::MissingField("email"));
    }
    if password.is_empty() {
        return Err(SessionError::MissingField("password"));
    }
    Ok((email, password))
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;
