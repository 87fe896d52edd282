//! Auth session model and state-change notification.
//!
//! Credential acquisition (email+password, third-party identity) is
//! delegated to an external identity provider; this module only models
//! the resulting session and broadcasts sign-in/sign-out transitions on
//! a watch channel the sync engine subscribes to.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// The authenticated user as reported by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

/// An active session: the bearer token plus its user
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub user: AuthUser,
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthSession")
            .field("access_token", &"[REDACTED]")
            .field("user", &self.user)
            .finish()
    }
}

/// Authentication state observed by the engine
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthState {
    /// No session; local stores are the only data source
    #[default]
    SignedOut,
    /// Session active; remote mirroring and reconciliation are enabled
    SignedIn(AuthSession),
}

impl AuthState {
    /// The active session, if signed in
    #[must_use]
    pub const fn session(&self) -> Option<&AuthSession> {
        match self {
            Self::SignedOut => None,
            Self::SignedIn(session) => Some(session),
        }
    }

    /// Whether a session is active
    #[must_use]
    pub const fn is_signed_in(&self) -> bool {
        matches!(self, Self::SignedIn(_))
    }
}

/// Publisher side of the auth-state channel.
///
/// The surrounding app calls [`AuthChannel::sign_in`] / [`sign_out`] when
/// the identity provider reports a change; every subscriber receives the
/// transition. Subscribers unsubscribe by dropping their receiver, and
/// receiver loops terminate when the channel itself is dropped.
///
/// [`sign_out`]: AuthChannel::sign_out
pub struct AuthChannel {
    tx: watch::Sender<AuthState>,
}

impl AuthChannel {
    /// Create a channel in the given initial state
    #[must_use]
    pub fn new(initial: AuthState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Subscribe to state transitions (also yields the current state)
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.tx.subscribe()
    }

    /// Publish a sign-in transition
    pub fn sign_in(&self, session: AuthSession) {
        self.tx.send_replace(AuthState::SignedIn(session));
    }

    /// Publish a sign-out transition
    pub fn sign_out(&self) {
        self.tx.send_replace(AuthState::SignedOut);
    }

    /// Current state snapshot
    #[must_use]
    pub fn current(&self) -> AuthState {
        self.tx.borrow().clone()
    }
}

impl Default for AuthChannel {
    fn default() -> Self {
        Self::new(AuthState::SignedOut)
    }
}
