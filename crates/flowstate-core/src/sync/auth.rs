//! Auth collaborator seam.
//!
//! Session management lives outside this crate. The reconciler only asks for
//! the current session at the start of each pass and skips the pass when
//! there is none.

use std::sync::RwLock;

use crate::storage::RemoteConfig;
use crate::sync::types::AuthSession;

pub const ACCESS_TOKEN_ENV: &str = "FLOWSTATE_ACCESS_TOKEN";
pub const USER_ID_ENV: &str = "FLOWSTATE_USER_ID";

/// Supplies the signed-in user's identity and bearer token.
pub trait AuthProvider: Send + Sync {
    /// Returns `None` when nobody is signed in.
    fn session(&self) -> Option<AuthSession>;
}

/// Session held in memory, replaceable at runtime.
#[derive(Debug, Default)]
pub struct StaticAuth {
    session: RwLock<Option<AuthSession>>,
}

impl StaticAuth {
    pub fn new(session: Option<AuthSession>) -> Self {
        Self {
            session: RwLock::new(session),
        }
    }

    pub fn signed_in(user_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self::new(Some(AuthSession {
            user_id: user_id.into(),
            access_token: access_token.into(),
        }))
    }

    pub fn signed_out() -> Self {
        Self::new(None)
    }

    /// Build from config, letting `FLOWSTATE_USER_ID` and
    /// `FLOWSTATE_ACCESS_TOKEN` override the stored values.
    pub fn from_config(remote: &RemoteConfig) -> Self {
        let user_id = std::env::var(USER_ID_ENV).unwrap_or_else(|_| remote.user_id.clone());
        let access_token =
            std::env::var(ACCESS_TOKEN_ENV).unwrap_or_else(|_| remote.access_token.clone());
        Self::new(session_from_parts(user_id, access_token))
    }

    pub fn replace(&self, session: Option<AuthSession>) {
        match self.session.write() {
            Ok(mut guard) => *guard = session,
            Err(poisoned) => *poisoned.into_inner() = session,
        }
    }
}

impl AuthProvider for StaticAuth {
    fn session(&self) -> Option<AuthSession> {
        match self.session.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

fn session_from_parts(user_id: String, access_token: String) -> Option<AuthSession> {
    let user_id = user_id.trim();
    let access_token = access_token.trim();
    if user_id.is_empty() || access_token.is_empty() {
        return None;
    }
    Some(AuthSession {
        user_id: user_id.to_string(),
        access_token: access_token.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_credentials_mean_signed_out() {
        assert!(session_from_parts(String::new(), "token".into()).is_none());
        assert!(session_from_parts("user".into(), "  ".into()).is_none());
        let session = session_from_parts(" user ".into(), "token".into()).unwrap();
        assert_eq!(session.user_id, "user");
    }

    #[test]
    fn replace_swaps_session() {
        let auth = StaticAuth::signed_out();
        assert!(auth.session().is_none());

        auth.replace(Some(AuthSession {
            user_id: "u".into(),
            access_token: "t".into(),
        }));
        assert_eq!(auth.session().map(|s| s.user_id), Some("u".to_string()));

        auth.replace(None);
        assert!(auth.session().is_none());
    }
}
