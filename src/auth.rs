//! Authentication collaborators
//!
//! The monitor only needs two things from the host: a way to log the
//! session out and a way to send the user to the login surface.

use crate::error::MonitorError;
use crate::models::Session;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Supplies the logout operation for the protected session
pub trait AuthProvider: Send + Sync {
    /// Invalidate `session` and clear any stored credentials.
    ///
    /// Called at most once per monitored session. Failures are logged by
    /// the monitor and never retried.
    fn logout(&self, session: &Session) -> Result<(), MonitorError>;
}

/// Host view navigation
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: &str);
}

/// In-memory holder of the signed-in session
#[derive(Debug, Default)]
pub struct SessionStore {
    current: RwLock<Option<Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the session returned by a successful login
    pub fn login(&self, session: Session) {
        debug!("Stored session {} for user {}", session.id, session.username);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(session);
    }

    pub fn current(&self) -> Option<Session> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current().is_some_and(|session| !session.is_expired())
    }

    /// Route guard: authenticated, unexpired and holding one of `roles`
    pub fn authorize(&self, roles: &[&str]) -> bool {
        self.current()
            .is_some_and(|session| !session.is_expired() && session.has_role(roles))
    }

    /// Bearer header value for API calls
    pub fn authorization_header(&self) -> Option<String> {
        self.current()
            .map(|session| format!("Bearer {}", session.token))
    }
}

impl AuthProvider for SessionStore {
    fn logout(&self, session: &Session) -> Result<(), MonitorError> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);

        match current.as_ref() {
            Some(stored) if stored.id == session.id => {
                *current = None;
                debug!("Cleared credentials for session {}", session.id);
            }
            // A newer login replaced this session; keep it.
            Some(stored) => {
                debug!(
                    "Session {} already replaced by {}, nothing to clear",
                    session.id, stored.id
                );
            }
            None => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(user: &str) -> Session {
        Session::new(1, user.to_string(), "admin".to_string(), format!("token-{}", user))
    }

    #[test]
    fn test_login_logout() {
        let store = SessionStore::new();
        assert!(!store.is_authenticated());

        let session = session("admin");
        store.login(session.clone());
        assert!(store.is_authenticated());
        assert_eq!(
            store.authorization_header().as_deref(),
            Some("Bearer token-admin")
        );

        store.logout(&session).unwrap();
        assert!(store.current().is_none());
        assert_eq!(store.authorization_header(), None);

        // Logging out twice is harmless
        store.logout(&session).unwrap();
    }

    #[test]
    fn test_authorize_by_role() {
        let store = SessionStore::new();
        assert!(!store.authorize(&[]));

        store.login(session("admin"));
        assert!(store.authorize(&[]));
        assert!(store.authorize(&["admin"]));
        assert!(!store.authorize(&["pegawai"]));
    }

    #[test]
    fn test_logout_keeps_newer_session() {
        let store = SessionStore::new();
        let old = session("old");
        let new = session("new");

        store.login(old.clone());
        store.login(new.clone());
        store.logout(&old).unwrap();

        assert_eq!(store.current().map(|s| s.id), Some(new.id));
    }
}
