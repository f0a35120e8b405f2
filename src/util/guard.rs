//! Route gating shared by every front end.
//!
//! SYSTEM CONTEXT
//! ==============
//! Surfaces should apply identical unauthenticated redirect behavior: the
//! task list requires a session, the login/register surfaces are pointless
//! with one, and nothing moves while an attempt is in flight.

use crate::state::session::{AuthPhase, AuthState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Login,
    Register,
    Tasks,
}

/// True when auth has settled and no user is present.
#[must_use]
pub fn should_redirect_unauth(state: &AuthState) -> bool {
    state.phase == AuthPhase::Unauthenticated && state.user.is_none()
}

/// Where a request for `requested` should actually land.
#[must_use]
pub fn resolve(requested: Route, state: &AuthState) -> Route {
    match (requested, state.phase) {
        (_, AuthPhase::Authenticating) => requested,
        (Route::Tasks, _) if should_redirect_unauth(state) => Route::Login,
        (Route::Login | Route::Register, AuthPhase::Authenticated) => Route::Tasks,
        _ => requested,
    }
}

#[cfg(test)]
#[path = "guard_test.rs"]
mod tests;
