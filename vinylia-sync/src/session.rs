//! Session provider seam
//!
//! Authentication itself happens elsewhere; the synchronizer only needs to
//! know who the current user is and which bearer token to send.

use std::sync::RwLock;

/// Authenticated user as seen by the synchronizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub access_token: String,
}

impl Session {
    pub fn new(user_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: access_token.into(),
        }
    }
}

/// Supplies the current session, if any
pub trait SessionProvider: Send + Sync {
    fn current(&self) -> Option<Session>;
}

/// Session holder updated by the sign-in / sign-out flow
#[derive(Debug, Default)]
pub struct StaticSession {
    inner: RwLock<Option<Session>>,
}

impl StaticSession {
    /// Provider with no active session
    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn signed_in(session: Session) -> Self {
        Self {
            inner: RwLock::new(Some(session)),
        }
    }

    pub fn sign_in(&self, session: Session) {
        tracing::info!(user_id = %session.user_id, "Session started");
        *self.write() = Some(session);
    }

    pub fn sign_out(&self) {
        if let Some(session) = self.write().take() {
            tracing::info!(user_id = %session.user_id, "Session ended");
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Option<Session>> {
        // poisoning cannot leave the Option half-written
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl SessionProvider for StaticSession {
    fn current(&self) -> Option<Session> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_in_and_out() {
        let provider = StaticSession::signed_out();
        assert!(provider.current().is_none());

        provider.sign_in(Session::new("u1", "token"));
        assert_eq!(provider.current().unwrap().user_id, "u1");

        provider.sign_out();
        assert!(provider.current().is_none());
    }
}
